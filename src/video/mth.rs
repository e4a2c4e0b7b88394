//! The chained frame container (`.mth`).
//!
//! Each record starts with the size of the *next* record, followed by one THP
//! frame, padded to 0x20 bytes. The header holds the size of the first record,
//! and the last record points back at the first so players can loop.

use super::thp::Thp;
use crate::{
    error::{Error, Result},
    io::Reader,
    math::align_up,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::{
    io::{Read, Write},
    path::Path,
};
use tracing::{debug, trace};

pub const MAGIC: &[u8; 4] = b"MTHP";
pub const HEADER_SIZE: usize = 0x40;
pub const RECORD_ALIGNMENT: usize = 0x20;
pub const VERSION_MAJOR: i16 = 8;

pub(crate) const MAX_FRAME_SIZE_OFFSET: u64 = 0x0C;
pub(crate) const FRAME_COUNT_OFFSET: u64 = 0x1C;
pub(crate) const FIRST_FRAME_SIZE_OFFSET: u64 = 0x28;

const SIZE_MARKER: u32 = 2;
const END_OF_IMAGE: [u8; 2] = [0xFF, 0xD9];

/// The fixed 0x40 byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub version_major: i16,
    pub version_minor: i16,
    pub max_frame_size: u32,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub frame_count: u32,
    pub video_offset: u32,
    pub first_frame_size: u32,
}

impl Header {
    pub fn new(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            version_major: VERSION_MAJOR,
            version_minor: 0,
            max_frame_size: 0,
            width,
            height,
            frame_rate,
            frame_count: 0,
            video_offset: HEADER_SIZE as u32,
            first_frame_size: 0,
        }
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::InvalidSignature { format: "MTH" });
        }

        let version_major = r.read_i16::<BigEndian>()?;
        let version_minor = r.read_i16::<BigEndian>()?;
        let _size_marker = r.read_u32::<BigEndian>()?;
        let max_frame_size = r.read_u32::<BigEndian>()?;
        let width = r.read_u32::<BigEndian>()?;
        let height = r.read_u32::<BigEndian>()?;
        let frame_rate = r.read_u32::<BigEndian>()?;
        let frame_count = r.read_u32::<BigEndian>()?;
        let video_offset = r.read_u32::<BigEndian>()?;
        let _audio_offset = r.read_u32::<BigEndian>()?;
        let first_frame_size = r.read_u32::<BigEndian>()?;

        let mut rest = [0; HEADER_SIZE - 0x2C];
        r.read_exact(&mut rest)?;

        Ok(Self {
            version_major,
            version_minor,
            max_frame_size,
            width,
            height,
            frame_rate,
            frame_count,
            video_offset,
            first_frame_size,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(MAGIC)?;
        w.write_i16::<BigEndian>(self.version_major)?;
        w.write_i16::<BigEndian>(self.version_minor)?;
        w.write_u32::<BigEndian>(SIZE_MARKER)?;
        w.write_u32::<BigEndian>(self.max_frame_size)?;
        w.write_u32::<BigEndian>(self.width)?;
        w.write_u32::<BigEndian>(self.height)?;
        w.write_u32::<BigEndian>(self.frame_rate)?;
        w.write_u32::<BigEndian>(self.frame_count)?;
        w.write_u32::<BigEndian>(self.video_offset)?;
        w.write_u32::<BigEndian>(0)?; // audio offset
        w.write_u32::<BigEndian>(self.first_frame_size)?;
        w.write_u32::<BigEndian>(0)?; // audio size
        w.write_all(&[0; 0x10])?;
        Ok(())
    }
}

/// Size of the record holding `payload_len` bytes of frame data.
pub(crate) fn record_size(payload_len: usize) -> usize {
    align_up(4 + payload_len, RECORD_ALIGNMENT)
}

pub(crate) fn record_size_u32(payload_len: usize) -> Result<u32> {
    u32::try_from(record_size(payload_len))
        .map_err(|_| Error::invalid_input(format!("a {payload_len} byte frame does not fit an mth record")))
}

/// Drops the zero padding that follows a frame's last end-of-image marker.
pub(crate) fn trim_padding(payload: &mut Vec<u8>) {
    let Some(end) = payload.windows(2).rposition(|w| w == END_OF_IMAGE) else {
        return;
    };

    if payload[end + 2..].iter().all(|&b| b == 0) {
        payload.truncate(end + 2);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mth {
    pub version_major: i16,
    pub version_minor: i16,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub frames: Vec<Thp>,
}

impl Mth {
    pub fn new(width: u32, height: u32, frame_rate: u32) -> Self {
        Self { version_major: VERSION_MAJOR, version_minor: 0, width, height, frame_rate, frames: Vec::new() }
    }

    pub fn add_frame(&mut self, frame: Thp) {
        self.frames.push(frame);
    }

    pub fn frame(&self, index: usize) -> Option<&Thp> {
        self.frames.get(index)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::read(&std::fs::read(path)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Records carry no payload length. A frame comes back exactly as written
    /// only when it ends in `FF D9`; other frames keep their zero padding.
    pub fn read(data: &[u8]) -> Result<Self> {
        let header = Header::read_from(&mut &data[..])?;
        debug!(?header, "read mth header");

        let mut r = Reader::big_endian(data);
        r.seek(header.video_offset as usize)?;

        let mut size = header.first_frame_size as usize;
        let mut frames = Vec::with_capacity((header.frame_count as usize).min(data.len() / RECORD_ALIGNMENT));
        for index in 0..header.frame_count as usize {
            if size < 4 {
                return Err(Error::format(format!("mth frame {index} has a record size of {size}")));
            }

            let start = r.position();
            let next = r.read_u32()? as usize;
            let mut payload = r.read_bytes(size - 4)?.to_vec();
            trim_padding(&mut payload);
            trace!(index, offset = start, size, next, "mth frame");

            frames.push(Thp::new(payload));
            size = if next == 0 { header.first_frame_size as usize } else { next };
        }

        Ok(Self {
            version_major: header.version_major,
            version_minor: header.version_minor,
            width: header.width,
            height: header.height,
            frame_rate: header.frame_rate,
            frames,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let sizes =
            self.frames.iter().map(|f| record_size_u32(f.data().len())).collect::<Result<Vec<_>>>()?;
        let first = sizes.first().copied().unwrap_or(0);

        let header = Header {
            version_major: self.version_major,
            version_minor: self.version_minor,
            max_frame_size: sizes.iter().copied().max().unwrap_or(0),
            frame_count: self.frames.len() as u32,
            first_frame_size: first,
            ..Header::new(self.width, self.height, self.frame_rate)
        };

        let total: usize = sizes.iter().map(|&s| s as usize).sum();
        let mut out = Vec::with_capacity(HEADER_SIZE + total);
        header.write_to(&mut out)?;

        for (index, frame) in self.frames.iter().enumerate() {
            let next = sizes.get(index + 1).copied().unwrap_or(first);
            let end = out.len() + sizes[index] as usize;

            out.write_u32::<BigEndian>(next)?;
            out.extend_from_slice(frame.data());
            out.resize(end, 0);
        }

        Ok(out)
    }
}
