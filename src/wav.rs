//! 16-bit PCM RIFF/WAVE, with the loop start carried in a `smpl` chunk.
//!
//! `hound` handles the format and sample data. It stops at the data chunk, so
//! the `smpl` chunk that follows is found and appended here.

use crate::{
    error::{Error, Result},
    io::{Reader, Writer},
};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::Cursor;
use tracing::{debug, trace};

const RIFF_HEADER_SIZE: usize = 12;
const SMPL_CHUNK_SIZE: u32 = 0x3C;
const MIDI_UNITY_NOTE: u32 = 0x3C;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Wave {
    pub sample_rate: u32,
    /// One sample vector per channel.
    pub channels: Vec<Vec<i16>>,
    pub loop_point: Option<usize>,
}

impl Wave {
    pub fn read(data: &[u8]) -> Result<Self> {
        let mut reader = WavReader::new(Cursor::new(data))?;
        let format = reader.spec();

        if format.sample_format != SampleFormat::Int || format.bits_per_sample != 16 {
            return Err(Error::unsupported(format!(
                "{}-bit {:?} wave, only 16-bit integer samples are accepted",
                format.bits_per_sample, format.sample_format
            )));
        }

        let channel_count = format.channels as usize;
        if !(1..=2).contains(&channel_count) {
            return Err(Error::unsupported(format!("{channel_count} channel wave")));
        }

        let interleaved = reader.samples::<i16>().collect::<std::result::Result<Vec<_>, _>>()?;
        let frame_count = interleaved.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frame_count); channel_count];
        for frame in interleaved.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }

        let loop_point = find_loop(data)?;
        debug!(sample_rate = format.sample_rate, channels = channel_count, frame_count, ?loop_point, "read wave");

        Ok(Self { sample_rate: format.sample_rate, channels, loop_point })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let frame_count = self.channels.iter().map(Vec::len).min().unwrap_or(0);
        let format = WavSpec {
            channels: u16::try_from(self.channels.len())
                .map_err(|_| Error::invalid_input(format!("{} channel wave", self.channels.len())))?,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        let mut writer = WavWriter::new(&mut cursor, format)?;
        for i in 0..frame_count {
            for channel in &self.channels {
                writer.write_sample(channel[i])?;
            }
        }
        writer.finalize()?;

        let mut out = cursor.into_inner();
        if let Some(loop_point) = self.loop_point {
            out.extend_from_slice(&self.sampler_chunk(loop_point, frame_count));

            let riff_size = u32::try_from(out.len() - 8)
                .map_err(|_| Error::invalid_input("wave does not fit a RIFF file"))?;
            out[4..8].copy_from_slice(&riff_size.to_le_bytes());
        }

        Ok(out)
    }

    /// One forward loop from `loop_point` to the last sample, played forever.
    fn sampler_chunk(&self, loop_point: usize, frame_count: usize) -> Vec<u8> {
        let sample_period = if self.sample_rate == 0 { 0 } else { 1_000_000_000 / self.sample_rate };

        let mut w = Writer::little_endian();
        w.write_bytes(b"smpl");
        w.write_u32(SMPL_CHUNK_SIZE);
        w.write_u32(0); // manufacturer
        w.write_u32(0); // product
        w.write_u32(sample_period);
        w.write_u32(MIDI_UNITY_NOTE);
        w.write_u32(0); // pitch fraction
        w.write_u32(0); // SMPTE format
        w.write_u32(0); // SMPTE offset
        w.write_u32(1); // loop count
        w.write_u32(0); // sampler data

        w.write_u32(0); // cue point
        w.write_u32(0); // forward loop
        w.write_u32(loop_point as u32);
        w.write_u32(frame_count.saturating_sub(1) as u32);
        w.write_u32(0); // fraction
        w.write_u32(0); // play count
        w.into_vec()
    }
}

/// Walks the RIFF chunks for a `smpl` chunk and returns its first loop's start.
fn find_loop(data: &[u8]) -> Result<Option<usize>> {
    let mut reader = Reader::little_endian(data);
    reader.seek(RIFF_HEADER_SIZE)?;

    while reader.remaining() >= 8 {
        let id = reader.read_bytes(4)?;
        let size = reader.read_u32()? as usize;
        if size > reader.remaining() {
            trace!(chunk = %String::from_utf8_lossy(id), size, "wave chunk runs past the end");
            break;
        }

        let body = reader.read_bytes(size)?;
        if id == b"smpl" {
            return read_loop(body);
        }

        // Chunks are word aligned.
        if size % 2 == 1 && reader.remaining() > 0 {
            reader.skip(1)?;
        }
    }

    Ok(None)
}

fn read_loop(body: &[u8]) -> Result<Option<usize>> {
    let mut r = Reader::little_endian(body);
    r.skip(28)?;
    let loop_count = r.read_u32()?;
    r.skip(4)?;

    if loop_count == 0 {
        return Ok(None);
    }

    r.skip(8)?; // cue point, type
    Ok(Some(r.read_u32()? as usize))
}

#[cfg(test)]
mod test {
    use super::*;

    fn wave() -> Wave {
        Wave {
            sample_rate: 44100,
            channels: vec![vec![1, -2, 3, i16::MIN, i16::MAX], vec![10, 20, 30, 40, 50]],
            loop_point: None,
        }
    }

    fn riff_size(bytes: &[u8]) -> usize {
        u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize
    }

    #[test]
    fn roundtrip_with_and_without_loop() {
        let mut wave = wave();
        let plain = wave.to_bytes().unwrap();
        assert_eq!(Wave::read(&plain).unwrap(), wave);

        wave.loop_point = Some(3);
        let looped = wave.to_bytes().unwrap();
        assert_eq!(looped.len(), plain.len() + 8 + SMPL_CHUNK_SIZE as usize);
        assert_eq!(riff_size(&looped), looped.len() - 8);
        assert_eq!(Wave::read(&looped).unwrap(), wave);

        wave.loop_point = Some(0);
        assert_eq!(Wave::read(&wave.to_bytes().unwrap()).unwrap().loop_point, Some(0));
    }

    #[test]
    fn sampler_chunk_follows_the_samples() {
        let mut wave = wave();
        wave.loop_point = Some(2);
        let bytes = wave.to_bytes().unwrap();

        let smpl = bytes.len() - 8 - SMPL_CHUNK_SIZE as usize;
        assert_eq!(&bytes[smpl..smpl + 4], b"smpl");

        let field = |offset: usize| {
            let at = smpl + 8 + offset;
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        assert_eq!(field(28), 1);
        assert_eq!(field(44), 2);
        assert_eq!(field(48), 4);

        let format = WavReader::new(Cursor::new(&bytes[..])).unwrap().spec();
        assert_eq!((format.channels, format.sample_rate, format.bits_per_sample), (2, 44100, 16));
    }

    #[test]
    fn unknown_chunks_are_skipped() {
        let mut original = wave();
        original.loop_point = Some(1);
        let mut bytes = original.to_bytes().unwrap();

        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&[7, 7, 7, 0]);
        let size = (bytes.len() - 8) as u32;
        bytes[4..8].copy_from_slice(&size.to_le_bytes());

        assert_eq!(Wave::read(&bytes).unwrap(), original);
        assert_eq!(find_loop(&bytes).unwrap(), Some(1));
    }

    #[test]
    fn mono_and_empty_waves() {
        let mono = Wave { sample_rate: 8000, channels: vec![vec![5, 6, 7]], loop_point: Some(1) };
        assert_eq!(Wave::read(&mono.to_bytes().unwrap()).unwrap(), mono);

        let empty = Wave { sample_rate: 8000, channels: vec![Vec::new()], loop_point: None };
        assert_eq!(Wave::read(&empty.to_bytes().unwrap()).unwrap(), empty);
    }

    #[test]
    fn rejects_unsupported_variants() {
        let bytes = wave().to_bytes().unwrap();

        let mut float = bytes.clone();
        float[20] = 3;
        assert!(Wave::read(&float).unwrap_err().is_format_mismatch());

        let eight_bit = {
            let format = WavSpec { channels: 1, sample_rate: 8000, bits_per_sample: 8, sample_format: SampleFormat::Int };
            let mut cursor = Cursor::new(Vec::new());
            let mut writer = WavWriter::new(&mut cursor, format).unwrap();
            writer.write_sample(3i8).unwrap();
            writer.finalize().unwrap();
            cursor.into_inner()
        };
        assert!(matches!(Wave::read(&eight_bit), Err(Error::Unsupported(_))));

        let mut riff = bytes.clone();
        riff[0] = b'X';
        assert!(Wave::read(&riff).unwrap_err().is_format_mismatch());

        assert!(Wave::read(&bytes[..bytes.len() - 6]).unwrap_err().is_format_mismatch());
        assert!(Wave::read(&bytes[..36]).unwrap_err().is_format_mismatch());
        assert!(Wave::read(&[]).unwrap_err().is_format_mismatch());
    }
}
