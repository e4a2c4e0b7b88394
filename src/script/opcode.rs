use crate::error::{Error, Result};
use std::fmt;

/// Instruction discriminant, stored in the top byte of each 32-bit word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpcodeKind {
    SetTimer = 0x00,
    SetSoundId = 0x01,
    SetLoop = 0x02,
    ExecuteLoop = 0x03,
    SetPriority = 0x04,
    AddPriority = 0x05,
    Play = 0x06,
    PlayAddVolume = 0x07,
    SetChannelBalance = 0x08,
    AddChannelBalance = 0x09,
    SetUnused = 0x0A,
    AddUnused = 0x0B,
    SetPitch = 0x0C,
    AddPitch = 0x0D,
    EndPlayback = 0x0E,
    LoopPlayback = 0x0F,
    SetReverb1 = 0x10,
    AddReverb1 = 0x11,
    SetReverb2 = 0x12,
    AddReverb2 = 0x13,
    SetReverb3 = 0x14,
    SetReverb4 = 0x15,
    Null = 0xFD,
}

/// How the low 24 bits of a word are split between timer and value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Timer24,
    Value24 { min: i32, max: i32 },
    Timer16Value8 { signed: bool },
    Timer8Value16,
}

const U24_MAX: i32 = 0xFF_FFFF;
const U24_MASK: u32 = 0xFF_FFFF;

impl OpcodeKind {
    pub fn from_u8(discriminant: u8) -> Option<Self> {
        use OpcodeKind::*;

        Some(match discriminant {
            0x00 => SetTimer,
            0x01 => SetSoundId,
            0x02 => SetLoop,
            0x03 => ExecuteLoop,
            0x04 => SetPriority,
            0x05 => AddPriority,
            0x06 => Play,
            0x07 => PlayAddVolume,
            0x08 => SetChannelBalance,
            0x09 => AddChannelBalance,
            0x0A => SetUnused,
            0x0B => AddUnused,
            0x0C => SetPitch,
            0x0D => AddPitch,
            0x0E => EndPlayback,
            0x0F => LoopPlayback,
            0x10 => SetReverb1,
            0x11 => AddReverb1,
            0x12 => SetReverb2,
            0x13 => AddReverb2,
            0x14 => SetReverb3,
            0x15 => SetReverb4,
            0xFD => Null,
            _ => return None,
        })
    }

    /// Two ranges are narrower than their 24-bit field. Sound id -1 is stored
    /// as 0xFFFFFF, so real ids stop at 0xFFFFFE. Priority deltas are signed
    /// 24-bit, so a stored word never unpacks to a different value than was set.
    pub fn layout(self) -> Layout {
        use OpcodeKind::*;

        match self {
            SetTimer => Layout::Timer24,
            SetSoundId => Layout::Value24 { min: -1, max: U24_MAX - 1 },
            AddPriority => Layout::Value24 { min: -0x80_0000, max: 0x7F_FFFF },
            SetLoop | ExecuteLoop | SetPriority | EndPlayback | LoopPlayback | SetReverb3
            | SetReverb4 | Null => Layout::Value24 { min: 0, max: U24_MAX },
            Play => Layout::Timer16Value8 { signed: false },
            PlayAddVolume | SetChannelBalance | AddChannelBalance | SetUnused | AddUnused
            | SetReverb1 | AddReverb1 | SetReverb2 | AddReverb2 => Layout::Timer16Value8 { signed: true },
            SetPitch | AddPitch => Layout::Timer8Value16,
        }
    }

    pub fn max_timer(self) -> u32 {
        match self.layout() {
            Layout::Timer24 => U24_MASK,
            Layout::Value24 { .. } => 0,
            Layout::Timer16Value8 { .. } => u16::MAX as u32,
            Layout::Timer8Value16 => u8::MAX as u32,
        }
    }

    /// Inclusive value range, `None` for opcodes without a value field.
    pub fn value_range(self) -> Option<(i32, i32)> {
        match self.layout() {
            Layout::Timer24 => None,
            Layout::Value24 { min, max } => Some((min, max)),
            Layout::Timer16Value8 { signed: true } => Some((i8::MIN as i32, i8::MAX as i32)),
            Layout::Timer16Value8 { signed: false } => Some((0, u8::MAX as i32)),
            Layout::Timer8Value16 => Some((i16::MIN as i32, i16::MAX as i32)),
        }
    }

    pub fn has_timer(self) -> bool {
        self.max_timer() != 0
    }

    /// End and loop markers carry a value field that nothing reads.
    fn shows_value(self) -> bool {
        self.value_range().is_some() && !matches!(self, OpcodeKind::EndPlayback | OpcodeKind::LoopPlayback)
    }
}

/// One script instruction. Setters saturate to the range of the opcode's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    kind: OpcodeKind,
    value: i32,
    timer: u32,
}

impl Opcode {
    pub fn new(kind: OpcodeKind) -> Self {
        Self { kind, value: 0, timer: 0 }
    }

    pub fn with_value(kind: OpcodeKind, value: i32) -> Self {
        let mut opcode = Self::new(kind);
        opcode.set_value(value);
        opcode
    }

    pub fn with_timer(mut self, timer: u32) -> Self {
        self.set_timer(timer);
        self
    }

    pub fn kind(&self) -> OpcodeKind {
        self.kind
    }

    pub fn value(&self) -> i32 {
        self.value
    }

    pub fn timer(&self) -> u32 {
        self.timer
    }

    pub fn set_value(&mut self, value: i32) {
        self.value = match self.kind.value_range() {
            Some((min, max)) => value.clamp(min, max),
            None => 0,
        };
    }

    pub fn set_timer(&mut self, timer: u32) {
        self.timer = timer.min(self.kind.max_timer());
    }

    pub fn pack(&self) -> u32 {
        let field = match self.kind.layout() {
            Layout::Timer24 => self.timer & U24_MASK,
            Layout::Value24 { .. } => self.value as u32 & U24_MASK,
            Layout::Timer16Value8 { .. } => ((self.timer & 0xFFFF) << 8) | (self.value as u32 & 0xFF),
            Layout::Timer8Value16 => ((self.timer & 0xFF) << 16) | (self.value as u32 & 0xFFFF),
        };

        ((self.kind as u32) << 24) | field
    }

    pub fn unpack(word: u32) -> Result<Self> {
        let discriminant = (word >> 24) as u8;
        let kind = OpcodeKind::from_u8(discriminant)
            .ok_or_else(|| Error::format(format!("unknown script opcode {discriminant:#04x}")))?;

        let (timer, value) = match kind.layout() {
            Layout::Timer24 => (word & U24_MASK, 0),
            Layout::Value24 { min, .. } => {
                let raw = word & U24_MASK;
                let value = match min {
                    -1 if raw == U24_MASK => -1,
                    // Sign-extend from 24 bits.
                    min if min < -1 => ((raw << 8) as i32) >> 8,
                    _ => raw as i32,
                };
                (0, value)
            },
            Layout::Timer16Value8 { signed } => {
                let value = if signed { word as u8 as i8 as i32 } else { (word & 0xFF) as i32 };
                ((word >> 8) & 0xFFFF, value)
            },
            Layout::Timer8Value16 => ((word >> 16) & 0xFF, word as u16 as i16 as i32),
        };

        Ok(Self { kind, value, timer })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;

        if self.kind.shows_value() {
            write!(f, " = {}", self.value)?;
        }

        if self.kind.has_timer() && self.timer != 0 {
            write!(f, " then wait {} ticks", self.timer)?;
        }

        Ok(())
    }
}
