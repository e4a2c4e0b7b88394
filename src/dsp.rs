//! Raw single channel `.dsp` files: a 0x60 byte big-endian header followed by the
//! ADPCM payload padded to 8 bytes.

use crate::{
    error::{Error, Result},
    io::{Reader, Writer},
    math::{nibble_count_to_sample_count, DivideByRoundUp},
    sound::{Channel, GcAdpcmContext, Sound, FORMAT_ADPCM},
};
use std::path::Path;
use tracing::debug;

const HEADER_SIZE: usize = 0x60;
const DATA_ALIGNMENT: usize = 8;

/// Nibble address of the first sample when the payload starts at byte 0.
pub const CURRENT_ADDRESS: usize = 2;

/// The 0x38 byte channel description shared by `.dsp`, `.hps` and `.ssm` headers.
/// Addresses are in nibbles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub looping: bool,
    pub format: i16,
    pub start_address: i32,
    pub end_address: i32,
    pub current_address: i32,
    pub coefficients: [i16; 16],
    pub gain: i16,
    pub start_context: GcAdpcmContext,
}

impl ChannelInfo {
    pub const SIZE: usize = 0x38;

    pub fn read(reader: &mut Reader) -> Result<Self> {
        let looping = reader.read_i16()? != 0;
        let format = reader.read_i16()?;
        let start_address = reader.read_i32()?;
        let end_address = reader.read_i32()?;
        let current_address = reader.read_i32()?;
        let coefficients = reader.read_i16_array::<16>()?;
        let gain = reader.read_i16()?;
        let start_context = GcAdpcmContext::read(reader)?;

        Ok(Self {
            looping,
            format,
            start_address,
            end_address,
            current_address,
            coefficients,
            gain,
            start_context,
        })
    }

    pub fn write(&self, writer: &mut Writer) {
        writer.write_i16(self.looping as i16);
        writer.write_i16(self.format);
        writer.write_i32(self.start_address);
        writer.write_i32(self.end_address);
        writer.write_i32(self.current_address);
        writer.write_i16_slice(&self.coefficients);
        writer.write_i16(self.gain);
        self.start_context.write(writer);
    }

    /// Describes `channel` with its first sample nibble at `current_address`.
    pub fn for_channel(channel: &Channel, current_address: usize) -> Self {
        let start_address = if channel.looping { current_address + channel.loop_start } else { current_address };

        Self {
            looping: channel.looping,
            format: channel.format,
            start_address: start_address as i32,
            end_address: (current_address + channel.nibble_count) as i32 - 3,
            current_address: current_address as i32,
            coefficients: channel.coefficients,
            gain: channel.gain,
            start_context: channel.start_context,
        }
    }

    pub fn nibble_count(&self) -> Result<usize> {
        usize::try_from(self.end_address as i64 - self.current_address as i64 + 3)
            .map_err(|_| Error::format(format!("end address {:#x} precedes the data", self.end_address)))
    }

    pub fn loop_start(&self) -> usize {
        (self.start_address as i64 - self.current_address as i64).max(0) as usize
    }

    pub fn ensure_adpcm(&self) -> Result<()> {
        if self.format != FORMAT_ADPCM {
            return Err(Error::unsupported(format!("channel format {}", self.format)));
        }

        Ok(())
    }

    pub fn into_channel(self, data: Vec<u8>, nibble_count: usize, loop_context: GcAdpcmContext) -> Channel {
        Channel {
            looping: self.looping,
            format: self.format,
            loop_start: if self.looping { self.loop_start() } else { 0 },
            coefficients: self.coefficients,
            gain: self.gain,
            start_context: self.start_context,
            loop_context,
            data,
            nibble_count,
        }
    }
}

pub fn read(data: &[u8]) -> Result<Sound> {
    let (sample_rate, channel) = read_channel(data)?;
    Sound::new(sample_rate, vec![channel])
}

pub fn read_channel(data: &[u8]) -> Result<(u32, Channel)> {
    let mut r = Reader::big_endian(data);

    let sample_count = r.read_u32()?;
    let nibble_count = r.read_u32()? as usize;
    let sample_rate = r.read_u32()?;
    let info = ChannelInfo::read(&mut r)?;
    let loop_context = GcAdpcmContext::read(&mut r)?;

    info.ensure_adpcm()?;

    r.seek(HEADER_SIZE)?;
    let payload = r.read_bytes(nibble_count.divide_by_2_round_up())?.to_vec();

    debug!(sample_count, nibble_count, sample_rate, looping = info.looping, "read dsp");

    Ok((sample_rate, info.into_channel(payload, nibble_count, loop_context)))
}

pub fn write_channel(sample_rate: u32, channel: &Channel) -> Result<Vec<u8>> {
    channel.validate()?;

    let mut w = Writer::big_endian();
    w.write_u32(nibble_count_to_sample_count(channel.nibble_count) as u32);
    w.write_u32(channel.nibble_count as u32);
    w.write_u32(sample_rate);
    ChannelInfo::for_channel(channel, CURRENT_ADDRESS).write(&mut w);
    channel.loop_context.write(&mut w);
    w.write_i16(0);
    w.write_zeros(HEADER_SIZE - w.position());

    w.write_bytes(&channel.data[..channel.nibble_count.divide_by_2_round_up()]);
    w.align(DATA_ALIGNMENT);

    Ok(w.into_vec())
}

/// Joins per-channel `.dsp` files, as written for stereo sounds, back into one sound.
pub fn open_channels<P: AsRef<Path>>(paths: &[P]) -> Result<Sound> {
    let mut sample_rate = 0;
    let mut channels = Vec::with_capacity(paths.len());

    for path in paths {
        let (rate, channel) = read_channel(&std::fs::read(path)?)?;
        sample_rate = rate;
        channels.push(channel);
    }

    Sound::new(sample_rate, channels)
}
