//! Read-only support for the multi-track streaming container (`.brstm`).
//!
//! Only 4-bit ADPCM streams with one or two channels are accepted. Channel data
//! is stored in interleaved blocks which are split back into one buffer per
//! channel.

use crate::{
    error::{Error, Result},
    io::{Endian, Reader},
    math::{sample_count_to_nibble_count, sample_to_nibble, DivideByRoundUp},
    sound::{Channel, GcAdpcmContext, Sound, FORMAT_ADPCM},
};
use tracing::{debug, trace};

const CODEC_ADPCM: u8 = 2;
const BYTE_ORDER_MARK: u16 = 0xFEFF;
const HEAD_OFFSET_POSITION: usize = 0x10;

#[derive(Debug, Clone, PartialEq, Eq)]
struct StreamInfo {
    codec: u8,
    looping: bool,
    channel_count: usize,
    sample_rate: u16,
    loop_start: usize,
    total_samples: usize,
    data_offset: usize,
    block_count: usize,
    block_size: usize,
    final_block_size: usize,
    final_block_padded_size: usize,
}

impl StreamInfo {
    fn read(r: &mut Reader) -> Result<Self> {
        let codec = r.read_u8()?;
        let looping = r.read_u8()? != 0;
        let channel_count = r.read_u8()? as usize;
        r.skip(1)?;
        let sample_rate = r.read_u16()?;
        r.skip(2)?;
        let loop_start = r.read_u32()? as usize;
        let total_samples = r.read_u32()? as usize;
        let data_offset = r.read_u32()? as usize;
        let block_count = r.read_u32()? as usize;
        let block_size = r.read_u32()? as usize;
        r.skip(4)?; // samples per block
        let final_block_size = r.read_u32()? as usize;
        r.skip(4)?; // samples in final block
        let final_block_padded_size = r.read_u32()? as usize;

        Ok(Self {
            codec,
            looping,
            channel_count,
            sample_rate,
            loop_start,
            total_samples,
            data_offset,
            block_count,
            block_size,
            final_block_size,
            final_block_padded_size,
        })
    }

    /// Where channel `channel`'s part of `block` lives in the file, and its length.
    /// `None` when the offset does not fit in memory.
    fn block_range(&self, block: usize, channel: usize) -> Option<(usize, usize)> {
        let row = self
            .block_size
            .checked_mul(self.channel_count)?
            .checked_mul(block)?
            .checked_add(self.data_offset)?;
        let (stride, len) = if block + 1 == self.block_count {
            (self.final_block_padded_size, self.final_block_size)
        } else {
            (self.block_size, self.block_size)
        };

        Some((row.checked_add(channel.checked_mul(stride)?)?, len))
    }

    /// Rejects block layouts that reach past the end of a `file_len` byte file.
    /// The last channel of the final block ends furthest out.
    fn check_layout(&self, file_len: usize) -> Result<()> {
        let Some(last) = self.block_count.checked_sub(1) else {
            return Ok(());
        };

        let end = self
            .block_range(last, self.channel_count - 1)
            .and_then(|(offset, len)| offset.checked_add(len));

        match end {
            Some(end) if end <= file_len => Ok(()),
            _ => Err(Error::format(format!(
                "brstm blocks ({} of {:#x} bytes from {:#x}) run past the {file_len:#x} byte file",
                self.block_count, self.block_size, self.data_offset
            ))),
        }
    }
}

struct ChannelHeader {
    coefficients: [i16; 16],
    gain: i16,
    start_context: GcAdpcmContext,
    loop_context: GcAdpcmContext,
}

pub fn read(data: &[u8]) -> Result<Sound> {
    let mut r = Reader::big_endian(data);
    r.expect_magic(b"RSTM", "BRSTM")?;

    let endian = match r.read_u16()? {
        BYTE_ORDER_MARK => Endian::Big,
        mark if mark == BYTE_ORDER_MARK.swap_bytes() => Endian::Little,
        mark => return Err(Error::format(format!("byte order mark {mark:#06x}"))),
    };
    r.set_endian(endian);

    r.seek(HEAD_OFFSET_POSITION)?;
    let head_offset = r.read_u32()? as usize;
    r.seek(head_offset)?;
    r.expect_magic(b"HEAD", "BRSTM HEAD")?;
    r.skip(4)?;

    // Offsets inside HEAD are relative to the end of its 8 byte header.
    let base = head_offset + 8;
    let mut references = [0usize; 3];
    for reference in &mut references {
        r.skip(4)?;
        *reference = base + r.read_u32()? as usize;
    }

    r.seek(references[0])?;
    let info = StreamInfo::read(&mut r)?;
    debug!(?info, ?endian, "read brstm stream info");

    if info.codec != CODEC_ADPCM {
        return Err(Error::unsupported(format!("brstm codec {}", info.codec)));
    }

    if info.channel_count == 0 || info.channel_count > 2 {
        return Err(Error::unsupported(format!("{} channel brstm", info.channel_count)));
    }

    info.check_layout(data.len())?;

    r.seek(references[2])?;
    let listed = r.read_u8()? as usize;
    if listed < info.channel_count {
        return Err(Error::format(format!(
            "brstm lists {listed} channel headers for {} channels",
            info.channel_count
        )));
    }
    r.skip(3)?;

    let mut channel_offsets = Vec::with_capacity(info.channel_count);
    for _ in 0..info.channel_count {
        r.skip(4)?;
        channel_offsets.push(base + r.read_u32()? as usize);
    }

    let mut headers = Vec::with_capacity(info.channel_count);
    for offset in channel_offsets {
        r.seek(offset)?;
        r.skip(4)?;
        let adpcm_offset = base + r.read_u32()? as usize;
        r.seek(adpcm_offset)?;

        let coefficients = r.read_i16_array::<16>()?;
        let gain = r.read_i16()?;
        let start_context = GcAdpcmContext::read(&mut r)?;
        let loop_context = GcAdpcmContext::read(&mut r)?;
        headers.push(ChannelHeader { coefficients, gain, start_context, loop_context });
    }

    let nibble_count = sample_count_to_nibble_count(info.total_samples);
    let byte_count = nibble_count.divide_by_2_round_up();

    let mut channels = Vec::with_capacity(info.channel_count);
    for (index, header) in headers.into_iter().enumerate() {
        let mut payload = Vec::with_capacity(byte_count.min(data.len()));
        for block in 0..info.block_count {
            let (offset, len) = info
                .block_range(block, index)
                .ok_or_else(|| Error::format(format!("brstm block {block} offset overflows")))?;
            trace!(channel = index, block, offset, len, "brstm block");
            payload.extend_from_slice(r.get_section(offset, len)?);
        }

        if payload.len() < byte_count {
            return Err(Error::format(format!(
                "brstm channel {index} holds {} bytes, {} samples need {byte_count}",
                payload.len(),
                info.total_samples
            )));
        }
        payload.truncate(byte_count);

        let mut channel = Channel {
            format: FORMAT_ADPCM,
            coefficients: header.coefficients,
            gain: header.gain,
            start_context: header.start_context,
            data: payload,
            nibble_count,
            ..Default::default()
        };

        if info.looping {
            channel.looping = true;
            channel.loop_start = sample_to_nibble(info.loop_start) - 2;
            channel.loop_context = header.loop_context;
        }

        channels.push(channel);
    }

    Sound::new(info.sample_rate as u32, channels)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{io::Writer, math::align_up, test_util::music, wav::Wave};

    /// Lays out `sound` the way stream files do, with tiny blocks so that several
    /// blocks and a padded final block show up.
    fn build(sound: &Sound, block_size: usize, endian: Endian) -> Vec<u8> {
        let channel_count = sound.channels.len();
        let data_len = sound.channels[0].data.len();
        let block_count = data_len.divide_by_round_up(block_size);
        let final_size = data_len - (block_count - 1) * block_size;
        let final_padded = align_up(final_size, 0x20);

        let head_offset = 0x40;
        let info_rel = 0x20;
        let tracks_rel = 0x60;
        let channels_rel = 0x70;
        let channel_rel = |i: usize| 0x80 + i * 0x40;
        let data_offset = 0x200;

        let mut w = Writer::new(endian);
        w.write_bytes(b"RSTM");
        w.write_u16(BYTE_ORDER_MARK);
        w.write_u16(0x0100);
        w.write_u32(0);
        w.write_u16(0x40);
        w.write_u16(2);
        w.write_u32(head_offset as u32);
        w.write_zeros(head_offset - w.position());

        w.write_bytes(b"HEAD");
        w.write_u32(0);
        for rel in [info_rel, tracks_rel, channels_rel] {
            w.write_u32(0x0100_0000);
            w.write_u32(rel as u32);
        }
        w.write_zeros(head_offset + 8 + info_rel - w.position());

        w.write_u8(CODEC_ADPCM);
        w.write_u8(sound.is_looping() as u8);
        w.write_u8(channel_count as u8);
        w.write_u8(0);
        w.write_u16(sound.sample_rate as u16);
        w.write_u16(0);
        w.write_u32(sound.loop_sample().unwrap_or(0) as u32);
        w.write_u32(sound.sample_count() as u32);
        w.write_u32(data_offset as u32);
        w.write_u32(block_count as u32);
        w.write_u32(block_size as u32);
        w.write_u32((block_size / 8 * 14) as u32);
        w.write_u32(final_size as u32);
        w.write_u32(0);
        w.write_u32(final_padded as u32);
        w.write_zeros(head_offset + 8 + tracks_rel - w.position());

        w.write_u8(1);
        w.write_zeros(head_offset + 8 + channels_rel - w.position());

        w.write_u8(channel_count as u8);
        w.write_zeros(3);
        for i in 0..channel_count {
            w.write_u32(0x0100_0000);
            w.write_u32(channel_rel(i) as u32);
        }

        for (i, channel) in sound.channels.iter().enumerate() {
            w.write_zeros(head_offset + 8 + channel_rel(i) - w.position());
            w.write_u32(0x0100_0000);
            w.write_u32((channel_rel(i) + 8) as u32);
            w.write_i16_slice(&channel.coefficients);
            w.write_i16(channel.gain);
            channel.start_context.write(&mut w);
            channel.loop_context.write(&mut w);
        }
        w.write_zeros(data_offset - w.position());

        for block in 0..block_count {
            let start = block * block_size;
            let (len, padded) =
                if block + 1 == block_count { (final_size, final_padded) } else { (block_size, block_size) };
            for channel in &sound.channels {
                w.write_bytes(&channel.data[start..start + len]);
                w.write_zeros(padded - len);
            }
        }

        w.into_vec()
    }

    fn sound(channels: usize, loop_point: Option<usize>) -> Sound {
        let wave = Wave {
            sample_rate: 44100,
            channels: (0..channels).map(|i| music(2000, i as u32 + 11)).collect(),
            loop_point,
        };
        Sound::from_wave(&wave).unwrap()
    }

    #[test]
    fn deinterleaves_blocks() {
        let original = sound(2, Some(777));
        let parsed = read(&build(&original, 0x100, Endian::Big)).unwrap();

        assert_eq!(parsed, original);
        for channel in &parsed.channels {
            assert_eq!(channel.decode_loop(), channel.decode()[777..]);
        }
    }

    #[test]
    fn single_block_mono() {
        let original = sound(1, None);
        let parsed = read(&build(&original, 0x2000, Endian::Big)).unwrap();

        assert_eq!(parsed, original);
    }

    #[test]
    fn little_endian_files() {
        let original = sound(2, None);
        let parsed = read(&build(&original, 0x80, Endian::Little)).unwrap();

        assert_eq!(parsed, original);
    }

    #[test]
    fn rejects_other_codecs_and_truncation() {
        let bytes = build(&sound(1, None), 0x100, Endian::Big);

        let mut pcm = bytes.clone();
        pcm[0x40 + 8 + 0x20] = 1;
        assert!(matches!(read(&pcm), Err(Error::Unsupported(_))));

        let mut magic = bytes.clone();
        magic[0] = b'X';
        assert!(matches!(read(&magic), Err(Error::InvalidSignature { .. })));

        assert!(read(&bytes[..bytes.len() - 0x40]).unwrap_err().is_format_mismatch());
    }

    #[test]
    fn oversized_block_fields_are_rejected() {
        let bytes = build(&sound(1, None), 0x100, Endian::Big);
        let info = 0x40 + 8 + 0x20;

        let mut huge = bytes.clone();
        huge[info + 20..info + 24].copy_from_slice(&0x7FFF_FFFFu32.to_be_bytes());
        huge[info + 24..info + 28].copy_from_slice(&0x7FFF_FFFFu32.to_be_bytes());
        assert!(matches!(read(&huge), Err(Error::Format(_))));

        let mut far = bytes.clone();
        far[info + 16..info + 20].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(read(&far), Err(Error::Format(_))));

        let mut one_block_too_many = bytes;
        let count = u32::from_be_bytes(one_block_too_many[info + 20..info + 24].try_into().unwrap());
        one_block_too_many[info + 20..info + 24].copy_from_slice(&(count + 1).to_be_bytes());
        assert!(read(&one_block_too_many).unwrap_err().is_format_mismatch());
    }
}
