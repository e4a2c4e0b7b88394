use super::opcode::{Opcode, OpcodeKind};
use crate::{
    error::{Error, Result},
    io::{Reader, Writer},
};
use std::fmt;

/// A named list of opcodes that plays one sound effect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub name: String,
    pub codes: Vec<Opcode>,
}

impl Script {
    pub fn new(name: impl Into<String>, codes: Vec<Opcode>) -> Self {
        Self { name: name.into(), codes }
    }

    /// Unpacks big-endian opcode words.
    pub fn decompile(name: impl Into<String>, data: &[u8]) -> Result<Self> {
        if data.len() % 4 != 0 {
            return Err(Error::format(format!("script length {} is not a whole number of words", data.len())));
        }

        let mut r = Reader::big_endian(data);
        let mut codes = Vec::with_capacity(data.len() / 4);
        while r.remaining() > 0 {
            codes.push(Opcode::unpack(r.read_u32()?)?);
        }

        Ok(Self { name: name.into(), codes })
    }

    pub fn compile(&self) -> Vec<u8> {
        let mut w = Writer::big_endian();
        for code in &self.codes {
            w.write_u32(code.pack());
        }

        w.into_vec()
    }

    fn last_sound_id(&self) -> Option<usize> {
        self.codes.iter().rposition(|c| c.kind() == OpcodeKind::SetSoundId)
    }

    /// Value of the last set-sound-id opcode, or -1 when there is none.
    pub fn sound_id(&self) -> i32 {
        self.last_sound_id().map_or(-1, |i| self.codes[i].value())
    }

    /// Rewrites the last set-sound-id opcode. Returns false if the script has none.
    pub fn set_sound_id(&mut self, id: i32) -> bool {
        match self.last_sound_id() {
            Some(i) => {
                self.codes[i].set_value(id);
                true
            },
            None => false,
        }
    }

    /// Drops null opcodes.
    pub fn clean(&mut self) {
        self.codes.retain(|c| c.kind() != OpcodeKind::Null);
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - ID: {}", self.name, self.sound_id())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn script() -> Script {
        Script::new(
            "jump",
            vec![
                Opcode::with_value(OpcodeKind::SetSoundId, 4),
                Opcode::with_value(OpcodeKind::Play, 0x7F).with_timer(10),
                Opcode::new(OpcodeKind::Null),
                Opcode::with_value(OpcodeKind::SetSoundId, 9),
                Opcode::with_value(OpcodeKind::AddPitch, -300).with_timer(2),
                Opcode::new(OpcodeKind::EndPlayback),
            ],
        )
    }

    #[test]
    fn compile_and_decompile() {
        let script = script();
        let bytes = script.compile();

        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[..8], &[0x01, 0, 0, 4, 0x06, 0, 10, 0x7F]);
        assert_eq!(Script::decompile("jump", &bytes).unwrap(), script);
    }

    #[test]
    fn sound_id_uses_last_opcode() {
        let mut script = script();
        assert_eq!(script.sound_id(), 9);
        assert_eq!(script.to_string(), "jump - ID: 9");

        assert!(script.set_sound_id(12));
        assert_eq!(script.codes[0].value(), 4);
        assert_eq!(script.sound_id(), 12);

        let mut silent = Script::new("silent", vec![Opcode::new(OpcodeKind::EndPlayback)]);
        assert_eq!(silent.sound_id(), -1);
        assert!(!silent.set_sound_id(3));
    }

    #[test]
    fn clean_drops_nulls() {
        let mut script = script();
        script.clean();
        assert_eq!(script.codes.len(), 5);
        assert!(script.codes.iter().all(|c| c.kind() != OpcodeKind::Null));
    }

    #[test]
    fn rejects_partial_words() {
        assert!(Script::decompile("x", &[0, 0, 0]).is_err());
        assert!(Script::decompile("x", &[0x30, 0, 0, 0]).is_err());
        assert!(Script::decompile("x", &[]).unwrap().codes.is_empty());
    }
}
