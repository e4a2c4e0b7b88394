//! Sound banks (`.ssm`): many short sounds sharing one big-endian data section.
//!
//! Channel records use the same layout as a raw `.dsp` header, with their
//! nibble addresses counted from the start of the data section.

use crate::{
    dsp::ChannelInfo,
    error::{Error, Result},
    io::{Reader, Writer},
    math::{align_up, DivideByRoundUp},
    sound::{GcAdpcmContext, Sound},
};
use std::path::Path;
use tracing::{debug, trace};

const BANK_HEADER_SIZE: usize = 0x10;
const SOUND_HEADER_SIZE: usize = 8;
const CHANNEL_RECORD_SIZE: usize = 0x40;
const DATA_ALIGNMENT: usize = 0x20;
const CHANNEL_ALIGNMENT: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoundBank {
    pub name: String,
    /// Sound id of the first sound, as referenced by scripts.
    pub start_index: i32,
    pub sounds: Vec<Sound>,
}

impl SoundBank {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn add_sound(&mut self, sound: Sound) -> usize {
        self.sounds.push(sound);
        self.sounds.len() - 1
    }

    pub fn remove_sound(&mut self, index: usize) -> Option<Sound> {
        (index < self.sounds.len()).then(|| self.sounds.remove(index))
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        Self::read(name, &std::fs::read(path)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn read(name: impl Into<String>, data: &[u8]) -> Result<Self> {
        let mut r = Reader::big_endian(data);

        let header_size = r.read_count()?;
        let data_size = r.read_count()?;
        let sound_count = r.read_count()?;
        let start_index = r.read_i32()?;
        let data_start = BANK_HEADER_SIZE + header_size;

        debug!(header_size, data_size, sound_count, start_index, "read ssm header");

        let mut sounds = Vec::with_capacity(sound_count.min(r.remaining() / SOUND_HEADER_SIZE));
        for index in 0..sound_count {
            let channel_count = r.read_count()?;
            let sample_rate = r.read_u32()?;
            if channel_count == 0 || channel_count > 2 {
                return Err(Error::unsupported(format!("ssm sound {index} has {channel_count} channels")));
            }

            let mut channels = Vec::with_capacity(channel_count);
            for _ in 0..channel_count {
                let info = ChannelInfo::read(&mut r)?;
                let loop_context = GcAdpcmContext::read(&mut r)?;
                r.skip(2)?;
                info.ensure_adpcm()?;

                let nibble_count = info.nibble_count()?;
                let offset = data_offset(info.current_address)?;
                trace!(index, offset, nibble_count, "ssm channel");

                let payload = r
                    .get_section(data_start + offset, nibble_count.divide_by_2_round_up())?
                    .to_vec();
                channels.push(info.into_channel(payload, nibble_count, loop_context));
            }

            sounds.push(Sound::new(sample_rate, channels)?);
        }

        Ok(Self { name: name.into(), start_index, sounds })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let header_size: usize = self
            .sounds
            .iter()
            .map(|s| SOUND_HEADER_SIZE + s.channels.len() * CHANNEL_RECORD_SIZE)
            .sum();
        let data_start = align_up(BANK_HEADER_SIZE + header_size, DATA_ALIGNMENT);

        // Lay out channel data first so the records can point at it.
        let mut offsets = Vec::new();
        let mut cursor = 0;
        for sound in &self.sounds {
            for channel in &sound.channels {
                channel.validate()?;
                offsets.push(cursor);
                cursor = align_up(cursor + channel.nibble_count.divide_by_2_round_up(), CHANNEL_ALIGNMENT);
            }
        }
        let data_size = align_up(cursor, DATA_ALIGNMENT);

        let mut w = Writer::big_endian();
        w.write_i32((data_start - BANK_HEADER_SIZE) as i32);
        w.write_i32(data_size as i32);
        w.write_i32(self.sounds.len() as i32);
        w.write_i32(self.start_index);

        let mut offset = offsets.iter();
        for sound in &self.sounds {
            w.write_i32(sound.channels.len() as i32);
            w.write_u32(sound.sample_rate);

            for channel in &sound.channels {
                let start = offset.next().copied().unwrap_or_default();
                ChannelInfo::for_channel(channel, start * 2 + 2).write(&mut w);
                channel.loop_context.write(&mut w);
                w.write_i16(0);
            }
        }
        w.write_zeros(data_start - w.position());

        for sound in &self.sounds {
            for channel in &sound.channels {
                w.write_bytes(&channel.data[..channel.nibble_count.divide_by_2_round_up()]);
                w.align(CHANNEL_ALIGNMENT);
            }
        }
        w.write_zeros(data_start + data_size - w.position());

        Ok(w.into_vec())
    }
}

/// Byte offset into the data section for a channel's current address.
fn data_offset(current_address: i32) -> Result<usize> {
    if current_address < 2 || current_address % 2 != 0 {
        return Err(Error::format(format!("channel address {current_address:#x} is not frame aligned")));
    }

    Ok((current_address as usize - 2) / 2)
}
