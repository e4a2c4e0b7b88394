//! THP frames: baseline JPEG with the `FF 00` byte stuffing removed.
//!
//! [`Thp::from_jpeg`] drops the zero that follows every literal `0xFF` and
//! [`Thp::to_jpeg`] puts it back. The scan terminator `FF D9` is never stuffed.
//! On the THP side a literal `FF D9` can appear inside scan data, so the last
//! one in the frame is taken as the terminator.

use crate::error::{Error, Result};
use std::path::Path;
use tracing::trace;

const MARKER: u8 = 0xFF;
const SCAN: u8 = 0xDA;
const END_OF_IMAGE: u8 = 0xD9;
const RESTART_INTERVAL: u8 = 0xDD;
const RESTART_INTERVAL_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// JPEG to THP.
    Unstuff,
    /// THP to JPEG.
    Stuff,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Thp {
    data: Vec<u8>,
}

impl Thp {
    /// Wraps bytes that are already in THP form.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn from_jpeg(jpeg: &[u8]) -> Result<Self> {
        Ok(Self { data: transform(jpeg, Direction::Unstuff)? })
    }

    pub fn to_jpeg(&self) -> Result<Vec<u8>> {
        transform(&self.data, Direction::Stuff)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(std::fs::read(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, &self.data)?;
        Ok(())
    }
}

fn transform(data: &[u8], direction: Direction) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 32);
    let mut i = 0;

    while i < data.len() {
        if data[i] != MARKER || i + 1 >= data.len() {
            return Err(Error::format(format!("expected a marker at offset {i:#x}")));
        }

        let marker = data[i + 1];
        out.extend_from_slice(&[MARKER, marker]);
        i += 2;
        trace!(offset = i - 2, marker = format_args!("{marker:02X}"), "jpeg marker");

        match marker {
            0xD0..=0xD9 => {},
            RESTART_INTERVAL => {
                out.extend_from_slice(section(data, i, RESTART_INTERVAL_SIZE)?);
                i += RESTART_INTERVAL_SIZE;
            },
            SCAN => {
                let header_len = segment_len(data, i)?;
                out.extend_from_slice(section(data, i, header_len)?);
                i += header_len;

                i = copy_scan(data, i, &mut out, direction)?;
                out.extend_from_slice(&data[i..]);
                return Ok(out);
            },
            _ => {
                let len = segment_len(data, i)?;
                let payload = escape(section(data, i + 2, len - 2)?, direction)?;
                let new_len = u16::try_from(payload.len() + 2)
                    .map_err(|_| Error::format(format!("segment at {i:#x} no longer fits its length field")))?;

                out.extend_from_slice(&new_len.to_be_bytes());
                out.extend_from_slice(&payload);
                i += len;
            },
        }
    }

    Ok(out)
}

fn section(data: &[u8], start: usize, len: usize) -> Result<&[u8]> {
    data.get(start..start + len).ok_or(Error::UnexpectedEof {
        offset: start,
        need: len,
        have: data.len().saturating_sub(start),
    })
}

/// Big-endian segment length, which counts its own two bytes.
fn segment_len(data: &[u8], start: usize) -> Result<usize> {
    let bytes = section(data, start, 2)?;
    let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    if len < 2 {
        return Err(Error::format(format!("segment length {len} at {start:#x}")));
    }

    Ok(len)
}

fn escape(payload: &[u8], direction: Direction) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(payload.len());
    let mut i = 0;

    while i < payload.len() {
        let byte = payload[i];
        out.push(byte);
        i += 1;

        if byte != MARKER {
            continue;
        }

        match direction {
            Direction::Stuff => out.push(0),
            Direction::Unstuff if payload.get(i) == Some(&0) => i += 1,
            Direction::Unstuff => return Err(Error::unsupported("unstuffed 0xFF inside a jpeg segment")),
        }
    }

    Ok(out)
}

/// Copies entropy-coded data and its terminator, returning the offset after it.
fn copy_scan(data: &[u8], start: usize, out: &mut Vec<u8>, direction: Direction) -> Result<usize> {
    match direction {
        Direction::Unstuff => {
            let mut i = start;
            loop {
                let byte = *data.get(i).ok_or_else(|| Error::format("scan data has no end marker"))?;
                if byte != MARKER {
                    out.push(byte);
                    i += 1;
                    continue;
                }

                match data.get(i + 1) {
                    Some(0x00) => out.push(MARKER),
                    Some(&END_OF_IMAGE) => {
                        out.extend_from_slice(&[MARKER, END_OF_IMAGE]);
                        return Ok(i + 2);
                    },
                    Some(other) => {
                        return Err(Error::unsupported(format!("marker FF {other:02X} inside scan data")))
                    },
                    None => return Err(Error::format("scan data has no end marker")),
                }
                i += 2;
            }
        },
        Direction::Stuff => {
            let end = data[start..]
                .windows(2)
                .rposition(|w| w == [MARKER, END_OF_IMAGE])
                .map(|p| start + p)
                .ok_or_else(|| Error::format("scan data has no end marker"))?;

            for &byte in &data[start..end] {
                out.push(byte);
                if byte == MARKER {
                    out.push(0);
                }
            }
            out.extend_from_slice(&[MARKER, END_OF_IMAGE]);
            Ok(end + 2)
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// A structurally valid JPEG stream: SOI, a table segment holding an escaped
    /// 0xFF, DRI, a scan with stuffed bytes, EOI.
    fn jpeg(scan: &[u8]) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8];
        data.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x07, 0x00, 0x10, 0xFF, 0x00, 0x20]);
        data.extend_from_slice(&[0xFF, 0xDD, 0x00, 0x04, 0x00, 0x00]);
        data.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x04, 0x01, 0x02]);
        data.extend_from_slice(scan);
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }

    #[test]
    fn unstuffs_scan_and_segments() {
        let source = jpeg(&[0x12, 0xFF, 0x00, 0x34, 0xFF, 0x00, 0xFF, 0x00]);
        let thp = Thp::from_jpeg(&source).unwrap();

        let mut expected = vec![0xFF, 0xD8];
        expected.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x06, 0x00, 0x10, 0xFF, 0x20]);
        expected.extend_from_slice(&[0xFF, 0xDD, 0x00, 0x04, 0x00, 0x00]);
        expected.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x04, 0x01, 0x02]);
        expected.extend_from_slice(&[0x12, 0xFF, 0x34, 0xFF, 0xFF]);
        expected.extend_from_slice(&[0xFF, 0xD9]);

        assert_eq!(thp.data(), &expected[..]);
        assert_eq!(thp.to_jpeg().unwrap(), source);
    }

    #[test]
    fn literal_end_marker_inside_thp_scan() {
        // An unstuffed FF followed by D9 is data, only the last FF D9 ends the scan.
        let source = jpeg(&[0xFF, 0x00, 0xD9, 0x55]);
        let thp = Thp::from_jpeg(&source).unwrap();
        assert_eq!(thp.to_jpeg().unwrap(), source);
    }

    #[test]
    fn thp_side_roundtrip() {
        let mut frame = vec![0xFF, 0xD8, 0xFF, 0xC0, 0x00, 0x05, 0xFF, 0xFF, 0x01];
        frame.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02]);
        frame.extend_from_slice(&[0xFF, 0xFF, 0xD9, 0x00, 0xFF, 0xD0, 0x7F]);
        frame.extend_from_slice(&[0xFF, 0xD9]);

        let thp = Thp::new(frame);
        let jpeg = thp.to_jpeg().unwrap();

        let mut expected = vec![0xFF, 0xD8, 0xFF, 0xC0, 0x00, 0x07, 0xFF, 0x00, 0xFF, 0x00, 0x01];
        expected.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02]);
        expected.extend_from_slice(&[0xFF, 0x00, 0xFF, 0x00, 0xD9, 0x00, 0xFF, 0x00, 0xD0, 0x7F]);
        expected.extend_from_slice(&[0xFF, 0xD9]);
        assert_eq!(jpeg, expected);

        assert_eq!(Thp::from_jpeg(&jpeg).unwrap(), thp);
    }

    #[test]
    fn trailing_bytes_survive() {
        let mut source = jpeg(&[0x01, 0x02]);
        source.extend_from_slice(&[0, 0, 0, 0]);

        let thp = Thp::from_jpeg(&source).unwrap();
        assert!(thp.data().ends_with(&[0xFF, 0xD9, 0, 0, 0, 0]));
        assert_eq!(thp.to_jpeg().unwrap(), source);
    }

    #[test]
    fn rejects_unsupported_streams() {
        let restart = jpeg(&[0x01, 0xFF, 0xD0, 0x02]);
        assert!(matches!(Thp::from_jpeg(&restart), Err(Error::Unsupported(_))));

        let mut unterminated = jpeg(&[0x01]);
        unterminated.truncate(unterminated.len() - 2);
        assert!(Thp::from_jpeg(&unterminated).unwrap_err().is_format_mismatch());

        assert!(Thp::from_jpeg(&[0x00, 0xD8]).is_err());
        assert!(Thp::from_jpeg(&[0xFF, 0xDB, 0x00]).is_err());
    }
}
