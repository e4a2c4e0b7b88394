//! Endian-aware cursors over in-memory buffers.
//!
//! Every container codec parses from a [`Reader`] and serializes into a
//! [`Writer`]. Reads are bounds-checked and fail with
//! [`Error::UnexpectedEof`] instead of panicking.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::io::Read;

/// Reads exactly `len` bytes from a stream. The buffer grows with the data
/// actually read, so a bogus length fails at the end of the stream rather
/// than up front.
pub fn read_payload<R: Read>(r: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    r.take(len as u64).read_to_end(&mut payload)?;

    if payload.len() < len {
        return Err(Error::UnexpectedEof { offset: payload.len(), need: len, have: payload.len() });
    }

    Ok(payload)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    endian: Endian,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], endian: Endian) -> Self {
        Self { data, pos: 0, endian }
    }

    pub fn big_endian(data: &'a [u8]) -> Self {
        Self::new(data, Endian::Big)
    }

    pub fn little_endian(data: &'a [u8]) -> Self {
        Self::new(data, Endian::Little)
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Moves to an absolute offset. Seeking to the very end is allowed.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::UnexpectedEof { offset: pos, need: 0, have: 0 });
        }

        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.take(count).map(|_| ())
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        let have = self.remaining();
        if have < count {
            return Err(Error::UnexpectedEof { offset: self.pos, need: count, have });
        }

        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = self.take(1)?;
        Ok(buf.get_u8())
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        let mut buf = self.take(2)?;
        Ok(match self.endian {
            Endian::Big => buf.get_i16(),
            Endian::Little => buf.get_i16_le(),
        })
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buf = self.take(2)?;
        Ok(match self.endian {
            Endian::Big => buf.get_u16(),
            Endian::Little => buf.get_u16_le(),
        })
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let mut buf = self.take(4)?;
        Ok(match self.endian {
            Endian::Big => buf.get_i32(),
            Endian::Little => buf.get_i32_le(),
        })
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = self.take(4)?;
        Ok(match self.endian {
            Endian::Big => buf.get_u32(),
            Endian::Little => buf.get_u32_le(),
        })
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        self.take(count)
    }

    pub fn read_i16_array<const N: usize>(&mut self) -> Result<[i16; N]> {
        let mut out = [0i16; N];
        for value in &mut out {
            *value = self.read_i16()?;
        }

        Ok(out)
    }

    /// Reads a length-prefixed count as `usize`, rejecting negative values.
    pub fn read_count(&mut self) -> Result<usize> {
        let offset = self.pos;
        let value = self.read_i32()?;
        usize::try_from(value)
            .map_err(|_| Error::format(format!("negative count {value} at offset {offset:#x}")))
    }

    /// Consumes `magic` or fails with [`Error::InvalidSignature`].
    pub fn expect_magic(&mut self, magic: &[u8], format: &'static str) -> Result<()> {
        match self.take(magic.len()) {
            Ok(found) if found == magic => Ok(()),
            _ => Err(Error::InvalidSignature { format }),
        }
    }

    /// Returns `len` bytes at an absolute offset without moving the cursor.
    pub fn get_section(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        let have = self.data.len().saturating_sub(offset);
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or(Error::UnexpectedEof { offset, need: len, have })
    }
}

#[derive(Debug)]
pub struct Writer {
    buf: BytesMut,
    endian: Endian,
}

impl Writer {
    pub fn new(endian: Endian) -> Self {
        Self { buf: BytesMut::new(), endian }
    }

    pub fn big_endian() -> Self {
        Self::new(Endian::Big)
    }

    pub fn little_endian() -> Self {
        Self::new(Endian::Little)
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        match self.endian {
            Endian::Big => self.buf.put_i16(value),
            Endian::Little => self.buf.put_i16_le(value),
        }
    }

    pub fn write_u16(&mut self, value: u16) {
        match self.endian {
            Endian::Big => self.buf.put_u16(value),
            Endian::Little => self.buf.put_u16_le(value),
        }
    }

    pub fn write_i32(&mut self, value: i32) {
        match self.endian {
            Endian::Big => self.buf.put_i32(value),
            Endian::Little => self.buf.put_i32_le(value),
        }
    }

    pub fn write_u32(&mut self, value: u32) {
        match self.endian {
            Endian::Big => self.buf.put_u32(value),
            Endian::Little => self.buf.put_u32_le(value),
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn write_zeros(&mut self, count: usize) {
        self.buf.put_bytes(0, count);
    }

    pub fn write_i16_slice(&mut self, values: &[i16]) {
        for &value in values {
            self.write_i16(value);
        }
    }

    /// Pads with zeros until the position is a multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) {
        let padded = crate::math::align_up(self.position(), alignment);
        self.write_zeros(padded - self.position());
    }

    /// Overwrites four bytes that were already written.
    pub fn patch_u32_at(&mut self, pos: usize, value: u32) {
        let bytes = match self.endian {
            Endian::Big => value.to_be_bytes(),
            Endian::Little => value.to_le_bytes(),
        };

        self.buf[pos..pos + 4].copy_from_slice(&bytes);
    }

    pub fn patch_i32_at(&mut self, pos: usize, value: i32) {
        self.patch_u32_at(pos, value as u32);
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reads_both_byte_orders() {
        let data = [0x12, 0x34, 0xFF, 0xFE];

        let mut big = Reader::big_endian(&data);
        assert_eq!(big.read_u16().unwrap(), 0x1234);
        assert_eq!(big.read_i16().unwrap(), -2);

        let mut little = Reader::little_endian(&data);
        assert_eq!(little.read_u16().unwrap(), 0x3412);
        assert_eq!(little.read_i16().unwrap(), -257);
    }

    #[test]
    fn short_reads_fail_without_moving() {
        let data = [0u8; 3];
        let mut reader = Reader::big_endian(&data);
        reader.skip(2).unwrap();

        match reader.read_u32() {
            Err(Error::UnexpectedEof { offset: 2, need: 4, have: 1 }) => {},
            other => panic!("unexpected result {other:?}"),
        }

        assert_eq!(reader.position(), 2);
        assert!(reader.read_u32().unwrap_err().is_format_mismatch());
    }

    #[test]
    fn sections_are_bounded() {
        let data = [1, 2, 3, 4, 5];
        let reader = Reader::big_endian(&data);

        assert_eq!(reader.get_section(1, 3).unwrap(), &[2, 3, 4]);
        assert!(reader.get_section(3, 3).is_err());
        assert!(reader.get_section(9, 0).is_err());
        assert!(reader.get_section(usize::MAX, 2).unwrap_err().is_format_mismatch());
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn stream_payloads_stop_at_the_end() {
        let data = [1u8, 2, 3, 4];

        let mut stream = &data[..];
        assert_eq!(read_payload(&mut stream, 3).unwrap(), [1, 2, 3]);
        assert_eq!(stream, [4]);

        let mut stream = &data[..];
        let error = read_payload(&mut stream, u32::MAX as usize).unwrap_err();
        assert!(matches!(error, Error::UnexpectedEof { have: 4, .. }));
    }

    #[test]
    fn writer_aligns_and_patches() {
        let mut writer = Writer::big_endian();
        writer.write_u8(0xAA);
        writer.align(8);
        assert_eq!(writer.position(), 8);

        let slot = writer.position();
        writer.write_u32(0);
        writer.write_i16(-1);
        writer.patch_u32_at(slot, 0xDEADBEEF);

        let bytes = writer.into_vec();
        assert_eq!(&bytes[8..14], &[0xDE, 0xAD, 0xBE, 0xEF, 0xFF, 0xFF]);
    }

    #[test]
    fn little_endian_writer() {
        let mut writer = Writer::little_endian();
        writer.write_u32(0x01020304);
        writer.write_i16(-2);
        assert_eq!(writer.into_vec(), vec![4, 3, 2, 1, 0xFE, 0xFF]);
    }
}
