//! The loop-aware streaming container (`.hps`).
//!
//! A 0x80 byte header describes each channel, followed by a chain of chunks.
//! Every chunk carries the decoder state at its first sample so playback can
//! jump into it, and the last chunk points back at the chunk where the loop
//! starts. The loop point is moved forward to a 0x20 byte boundary so that it
//! always lands on the first byte of a chunk.

use crate::{
    dsp::{ChannelInfo, CURRENT_ADDRESS},
    error::{Error, Result},
    io::{Reader, Writer},
    math::{align_up, sample_to_nibble, DivideByRoundUp},
    sound::{GcAdpcmContext, Sound},
    History, BYTES_PER_FRAME, SAMPLES_PER_FRAME,
};
use std::collections::BTreeMap;
use tracing::{debug, trace};

const MAGIC: &[u8; 8] = b" HALPST\0";
const HEADER_SIZE: usize = 0x80;
const CHUNK_HEADER_SIZE: usize = 0x20;
const CHUNK_ALIGNMENT: usize = 0x20;
/// Bytes of ADPCM data per chunk, shared by all channels.
const CHUNK_WINDOW: usize = 0x10000;
/// Loop points are moved to a multiple of this many samples (0x20 bytes).
const LOOP_ALIGNMENT: usize = 56;
const MAX_CHANNELS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Chunk {
    /// Byte offset into every channel's data.
    start: usize,
    actual: usize,
    padded: usize,
}

/// Chunk layout of one sound, computed before anything is written.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChunkPlan {
    chunks: Vec<Chunk>,
    loop_chunk: Option<usize>,
}

impl ChunkPlan {
    fn new(data_len: usize, channel_count: usize, loop_byte: Option<usize>) -> Result<Self> {
        let base = CHUNK_WINDOW / channel_count;
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < data_len {
            let size = match loop_byte {
                Some(loop_byte) => Self::chunk_size(chunks.len(), base, loop_byte),
                None => base,
            };

            let actual = size.min(data_len - start);
            chunks.push(Chunk { start, actual, padded: align_up(actual, CHUNK_ALIGNMENT) });
            start += actual;
        }

        let loop_chunk = match loop_byte {
            Some(loop_byte) => Some(
                chunks
                    .iter()
                    .position(|chunk| chunk.start == loop_byte)
                    .ok_or_else(|| Error::invalid_input(format!("loop byte {loop_byte:#x} is past the data")))?,
            ),
            None => None,
        };

        Ok(Self { chunks, loop_chunk })
    }

    /// The chunk holding the loop point ends right at it. When that leaves the chunk
    /// less than half full, the chunk before it hands over its second half.
    fn chunk_size(index: usize, base: usize, loop_byte: usize) -> usize {
        let loop_index = loop_byte / base;
        let remainder = loop_byte % base;

        if remainder == 0 {
            return base;
        }

        let split = loop_index != 0 && remainder * 2 < base;
        if index == loop_index {
            if split {
                remainder + base / 2
            } else {
                remainder
            }
        } else if split && index + 1 == loop_index {
            base - base / 2
        } else {
            base
        }
    }

    fn offsets(&self, channel_count: usize) -> Vec<usize> {
        let mut offset = HEADER_SIZE;
        self.chunks
            .iter()
            .map(|chunk| {
                let this = offset;
                offset += CHUNK_HEADER_SIZE + chunk.padded * channel_count;
                this
            })
            .collect()
    }
}

/// The sample a loop at `sample` moves to when written. Loops that would move past
/// the end move back instead.
pub fn aligned_loop_sample(sample: usize, sample_count: usize) -> usize {
    let up = align_up(sample, LOOP_ALIGNMENT);
    if up < sample_count {
        up
    } else {
        sample - sample % LOOP_ALIGNMENT
    }
}

pub fn write(sound: &Sound) -> Result<Vec<u8>> {
    let channel_count = sound.channels.len();
    if channel_count == 0 || channel_count > MAX_CHANNELS {
        return Err(Error::unsupported(format!("{channel_count} channel hps")));
    }

    let nibble_count = sound.channels[0].nibble_count;
    for channel in &sound.channels {
        channel.validate()?;
        if channel.nibble_count != nibble_count {
            return Err(Error::invalid_input("hps channels must have equal lengths"));
        }
    }

    let data_len = nibble_count.divide_by_2_round_up();
    if data_len == 0 {
        return Err(Error::invalid_input("cannot write an empty hps"));
    }

    let loop_sample = sound
        .loop_sample()
        .map(|sample| aligned_loop_sample(sample, sound.sample_count()));
    let loop_byte = loop_sample.map(|sample| sample / SAMPLES_PER_FRAME * BYTES_PER_FRAME);

    let plan = ChunkPlan::new(data_len, channel_count, loop_byte)?;
    let offsets = plan.offsets(channel_count);
    let pcm: Vec<Vec<i16>> = sound.channels.iter().map(|c| c.decode()).collect();

    debug!(
        channels = channel_count,
        chunks = plan.chunks.len(),
        ?loop_sample,
        ?loop_byte,
        "planned hps chunks"
    );

    let mut w = Writer::big_endian();
    w.write_bytes(MAGIC);
    w.write_u32(sound.sample_rate);
    w.write_i32(channel_count as i32);

    for channel in &sound.channels {
        let mut info = ChannelInfo::for_channel(channel, CURRENT_ADDRESS);
        if let Some(sample) = loop_sample {
            info.start_address = sample_to_nibble(sample) as i32;
        }
        info.write(&mut w);
    }
    w.write_zeros(HEADER_SIZE - w.position());

    for (index, chunk) in plan.chunks.iter().enumerate() {
        let next = match offsets.get(index + 1) {
            Some(&offset) => offset as i32,
            None => plan.loop_chunk.map_or(-1, |i| offsets[i] as i32),
        };

        trace!(index, offset = w.position(), ?chunk, next, "writing hps chunk");

        w.write_i32((chunk.padded * channel_count) as i32);
        w.write_i32((chunk.actual * 2 - 1) as i32);
        w.write_i32(next);

        let start_sample = chunk.start / BYTES_PER_FRAME * SAMPLES_PER_FRAME;
        for slot in 0..MAX_CHANNELS {
            match sound.channels.get(slot) {
                Some(channel) => {
                    let history = if chunk.start == 0 {
                        channel.start_context.history()
                    } else {
                        History::before(&pcm[slot], start_sample)
                    };
                    w.write_i16(channel.data[chunk.start] as i16);
                    w.write_i16(history.hist_1);
                    w.write_i16(history.hist_2);
                    w.write_i16(0);
                },
                None => w.write_zeros(8),
            }
        }
        w.write_zeros(4);

        for channel in &sound.channels {
            w.write_bytes(&channel.data[chunk.start..chunk.start + chunk.actual]);
            w.write_zeros(chunk.padded - chunk.actual);
        }
    }

    Ok(w.into_vec())
}

pub fn read(data: &[u8]) -> Result<Sound> {
    let mut r = Reader::big_endian(data);
    r.expect_magic(MAGIC, "HPS")?;

    let sample_rate = r.read_u32()?;
    let channel_count = r.read_count()?;
    if channel_count == 0 || channel_count > MAX_CHANNELS {
        return Err(Error::unsupported(format!("{channel_count} channel hps")));
    }

    let mut infos = Vec::with_capacity(channel_count);
    for _ in 0..channel_count {
        let info = ChannelInfo::read(&mut r)?;
        info.ensure_adpcm()?;
        infos.push(info);
    }

    if infos.iter().any(|info| info.end_address != infos[0].end_address) {
        return Err(Error::format("hps channels have unequal lengths"));
    }

    debug!(sample_rate, channel_count, "read hps header");

    r.seek(HEADER_SIZE)?;
    let mut payloads = vec![Vec::new(); channel_count];
    // Chunk offset to the byte position of its data and its embedded contexts.
    let mut chunks = BTreeMap::new();

    let loop_offset = loop {
        let offset = r.position();
        let size = r.read_count()?;
        let end_nibble = r.read_i32()?;
        let next = r.read_i32()?;

        let mut contexts = [GcAdpcmContext::default(); MAX_CHANNELS];
        for context in &mut contexts {
            *context = GcAdpcmContext::read(&mut r)?;
            r.skip(2)?; // gain
        }
        r.skip(4)?;

        let padded = size / channel_count;
        let keep = (((end_nibble as i64 + 1) / 2).max(0) as usize).min(padded);
        chunks.insert(offset, (payloads[0].len(), contexts));

        for payload in &mut payloads {
            let bytes = r.read_bytes(padded)?;
            payload.extend_from_slice(&bytes[..keep]);
        }

        trace!(offset, size, end_nibble, next, "read hps chunk");

        match next {
            -1 => break None,
            n if n < 0 => return Err(Error::format(format!("chunk at {offset:#x} has next offset {n}"))),
            n if n as usize <= offset => break Some(n as usize),
            n => r.seek(n as usize)?,
        }
    };

    let loop_target = match loop_offset {
        Some(offset) => Some(chunks.get(&offset).ok_or_else(|| {
            Error::format(format!("loop offset {offset:#x} does not start a chunk"))
        })?),
        None => None,
    };

    let mut channels = Vec::with_capacity(channel_count);
    for (slot, (info, mut payload)) in infos.into_iter().zip(payloads).enumerate() {
        let nibble_count = match info.nibble_count() {
            Ok(count) if count.divide_by_2_round_up() <= payload.len() => count,
            _ => payload.len() * 2,
        };
        payload.truncate(nibble_count.divide_by_2_round_up());

        let mut channel = info.into_channel(payload, nibble_count, GcAdpcmContext::default());
        match loop_target {
            Some((byte, contexts)) => {
                channel.looping = true;
                channel.loop_start = byte * 2;
                channel.loop_context = contexts[slot];
            },
            None => {
                channel.looping = false;
                channel.loop_start = 0;
            },
        }

        channels.push(channel);
    }

    Sound::new(sample_rate, channels)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{test_util::music, wav::Wave};

    fn sound(channels: usize, len: usize, loop_point: Option<usize>) -> Sound {
        let wave = Wave {
            sample_rate: 32000,
            channels: (0..channels).map(|i| music(len, i as u32 + 7)).collect(),
            loop_point,
        };
        Sound::from_wave(&wave).unwrap()
    }

    fn sizes(plan: &ChunkPlan) -> Vec<usize> {
        plan.chunks.iter().map(|c| c.actual).collect()
    }

    #[test]
    fn plan_without_loop() {
        let plan = ChunkPlan::new(0x14000, 2, None).unwrap();
        assert_eq!(sizes(&plan), vec![0x8000, 0x8000, 0x4000]);
        assert_eq!(plan.loop_chunk, None);

        let plan = ChunkPlan::new(0x10010, 1, None).unwrap();
        assert_eq!(sizes(&plan), vec![0x10000, 0x10]);
        assert_eq!(plan.chunks[1].padded, 0x20);
    }

    #[test]
    fn plan_splits_short_loop_chunk() {
        let plan = ChunkPlan::new(0x30000, 2, Some(0x11000)).unwrap();
        assert_eq!(&sizes(&plan)[..4], &[0x8000, 0x4000, 0x5000, 0x8000]);
        assert_eq!(plan.loop_chunk, Some(3));
        assert_eq!(plan.chunks[3].start, 0x11000);
    }

    #[test]
    fn plan_without_split() {
        let plan = ChunkPlan::new(0x30000, 2, Some(0xE000)).unwrap();
        assert_eq!(&sizes(&plan)[..3], &[0x8000, 0x6000, 0x8000]);
        assert_eq!(plan.loop_chunk, Some(2));

        let plan = ChunkPlan::new(0x30000, 2, Some(0x1000)).unwrap();
        assert_eq!(&sizes(&plan)[..2], &[0x1000, 0x8000]);
        assert_eq!(plan.loop_chunk, Some(1));

        let plan = ChunkPlan::new(0x30000, 2, Some(0x10000)).unwrap();
        assert_eq!(plan.loop_chunk, Some(2));

        let plan = ChunkPlan::new(0x30000, 2, Some(0)).unwrap();
        assert_eq!(plan.loop_chunk, Some(0));
    }

    #[test]
    fn loop_alignment() {
        assert_eq!(aligned_loop_sample(0, 1000), 0);
        assert_eq!(aligned_loop_sample(56, 1000), 56);
        assert_eq!(aligned_loop_sample(57, 1000), 112);
        assert_eq!(aligned_loop_sample(12000, 480000), 12040);
        assert_eq!(aligned_loop_sample(990, 1000), 952);
    }

    #[test]
    fn roundtrip_stereo_with_aligned_loop() {
        let original = sound(2, 20000, Some(56 * 100));
        let parsed = read(&write(&original).unwrap()).unwrap();

        assert_eq!(parsed, original);
        assert_eq!(parsed.loop_sample(), Some(5600));
    }

    #[test]
    fn roundtrip_without_loop() {
        let original = sound(1, 3001, None);
        let parsed = read(&write(&original).unwrap()).unwrap();

        assert_eq!(parsed, original);
        assert!(!parsed.is_looping());
    }

    #[test]
    fn unaligned_loop_moves_forward() {
        let original = sound(2, 5000, Some(100));
        let parsed = read(&write(&original).unwrap()).unwrap();

        assert_eq!(parsed.loop_sample(), Some(112));
        for channel in &parsed.channels {
            assert_eq!(channel.decode_loop(), channel.decode()[112..]);
        }
    }

    #[test]
    fn loop_across_many_chunks() {
        // Stereo chunks hold 0x8000 bytes, 57344 samples.
        let original = sound(2, 130_000, Some(60_000));
        let bytes = write(&original).unwrap();
        let parsed = read(&bytes).unwrap();

        let loop_sample = aligned_loop_sample(60_000, 130_000);
        assert_eq!(parsed.loop_sample(), Some(loop_sample));

        for (source, result) in original.channels.iter().zip(&parsed.channels) {
            assert_eq!(source.data, result.data);
            assert_eq!(result.decode_loop(), result.decode()[loop_sample..]);
        }
    }

    #[test]
    fn byte_layout() {
        let original = sound(1, 1000, None);
        let bytes = write(&original).unwrap();
        let mut r = Reader::big_endian(&bytes);

        assert_eq!(r.read_bytes(8).unwrap(), MAGIC);
        assert_eq!(r.read_u32().unwrap(), 32000);
        assert_eq!(r.read_i32().unwrap(), 1);

        r.seek(HEADER_SIZE).unwrap();
        let data_len = original.channels[0].data.len();
        assert_eq!(r.read_i32().unwrap() as usize, align_up(data_len, 0x20));
        assert_eq!(r.read_i32().unwrap() as usize, data_len * 2 - 1);
        assert_eq!(r.read_i32().unwrap(), -1);
        assert_eq!(r.read_i16().unwrap(), original.channels[0].data[0] as i16);

        assert_eq!(bytes.len(), HEADER_SIZE + CHUNK_HEADER_SIZE + align_up(data_len, 0x20));
    }

    #[test]
    fn rejects_bad_input() {
        let bytes = write(&sound(2, 500, None)).unwrap();

        let mut magic = bytes.clone();
        magic[1] = b'X';
        assert!(matches!(read(&magic), Err(Error::InvalidSignature { .. })));

        let mut three = bytes.clone();
        three[0x0F] = 3;
        assert!(matches!(read(&three), Err(Error::Unsupported(_))));

        assert!(read(&bytes[..0x90]).unwrap_err().is_format_mismatch());

        let mut uneven = sound(2, 500, None);
        uneven.channels[1] = sound(1, 300, None).channels.remove(0);
        assert!(matches!(write(&uneven), Err(Error::InvalidInput(_))));
    }
}
