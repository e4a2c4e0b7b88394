//! Script packages (`.spkg`): one script bank bundled with the sound bank it plays.
//!
//! Unlike the game's own files, packages are little-endian.

use super::{bank::Script, sem::script_name};
use crate::{
    error::{Error, Result},
    io::{Reader, Writer},
    ssm::SoundBank,
};
use std::{collections::BTreeMap, path::Path};
use tracing::debug;

const SSM_SIZE_OFFSET: usize = 0x0C;
const SCRIPT_TABLE_OFFSET: usize = 0x14;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptPackage {
    pub group_flags: u32,
    pub flags: u32,
    pub scripts: Vec<Script>,
    pub sound_bank: Option<SoundBank>,
}

impl ScriptPackage {
    pub fn new(scripts: Vec<Script>, sound_bank: Option<SoundBank>) -> Self {
        Self { scripts, sound_bank, ..Default::default() }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::read(&std::fs::read(path)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn read(data: &[u8]) -> Result<Self> {
        let mut r = Reader::little_endian(data);
        r.expect_magic(b"SPKG", "SPKG")?;

        let group_flags = r.read_u32()?;
        let flags = r.read_u32()?;
        let ssm_size = r.read_count()?;
        let script_count = r.read_count()?;

        let mut scripts = Vec::with_capacity(script_count.min(r.remaining() / 8));
        for index in 0..script_count {
            let offset = r.read_u32()? as usize;
            let len = r.read_count()?;
            scripts.push(Script::decompile(script_name(index), r.get_section(offset, len)?)?);
        }

        let name_len = r.read_u8()? as usize;
        let name = String::from_utf8_lossy(r.read_bytes(name_len)?).into_owned();

        let sound_bank = match ssm_size {
            0 => None,
            size => Some(SoundBank::read(name, r.read_bytes(size)?)?),
        };

        debug!(script_count, ssm_size, "read script package");

        Ok(Self { group_flags, flags, scripts, sound_bank })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let name = self.sound_bank.as_ref().map(|b| b.name.as_str()).unwrap_or_default();
        let name_len = u8::try_from(name.len())
            .map_err(|_| Error::invalid_input(format!("sound bank name is {} bytes, at most 255 fit", name.len())))?;

        let mut w = Writer::little_endian();
        w.write_bytes(b"SPKG");
        w.write_u32(self.group_flags);
        w.write_u32(self.flags);
        w.write_i32(0);
        w.write_i32(self.scripts.len() as i32);
        w.write_zeros(self.scripts.len() * 8);

        w.write_u8(name_len);
        w.write_bytes(name.as_bytes());

        if let Some(bank) = &self.sound_bank {
            let ssm = bank.to_bytes()?;
            w.patch_i32_at(SSM_SIZE_OFFSET, ssm.len() as i32);
            w.write_bytes(&ssm);
        }

        for (index, script) in self.scripts.iter().enumerate() {
            let code = script.compile();
            let slot = SCRIPT_TABLE_OFFSET + index * 8;
            w.patch_u32_at(slot, w.position() as u32);
            w.patch_i32_at(slot + 4, code.len() as i32);
            w.write_bytes(&code);
        }

        Ok(w.into_vec())
    }

    /// Drops sounds that no script plays and renumbers the scripts' sound ids to
    /// match. Returns how many sounds were removed.
    pub fn remove_unused_sounds(&mut self) -> usize {
        let Some(bank) = &mut self.sound_bank else {
            return 0;
        };

        let used: Vec<bool> = (0..bank.sounds.len())
            .map(|index| self.scripts.iter().any(|s| s.sound_id() == index as i32))
            .collect();

        let mut remap = BTreeMap::new();
        let mut kept = Vec::new();
        for (index, sound) in std::mem::take(&mut bank.sounds).into_iter().enumerate() {
            if used[index] {
                remap.insert(index as i32, kept.len() as i32);
                kept.push(sound);
            }
        }

        let removed = used.len() - kept.len();
        bank.sounds = kept;

        for script in &mut self.scripts {
            if let Some(&id) = remap.get(&script.sound_id()) {
                script.set_sound_id(id);
            }
        }

        debug!(removed, "removed unused sounds");
        removed
    }
}
