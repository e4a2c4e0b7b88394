//! Incremental `.mth` reading and writing against a live stream.

use super::{
    mth::{
        record_size_u32, trim_padding, Header, FIRST_FRAME_SIZE_OFFSET, FRAME_COUNT_OFFSET, HEADER_SIZE,
        MAX_FRAME_SIZE_OFFSET,
    },
    thp::Thp,
};
use crate::{
    error::{Error, Result},
    io::read_payload,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::{debug, trace, warn};

/// Writes frames one at a time, back-patching each record's next-size field
/// once the following frame is known.
///
/// Call [`MthWriter::finish`] to close the chain and get the stream back. A
/// writer dropped without it still finalizes the header, logging any failure.
pub struct MthWriter<W: Write + Seek> {
    inner: Option<W>,
    /// Where the previous record's next-size lives. Starts at the header's
    /// first frame size.
    previous_slot: u64,
    first_size: u32,
    max_size: u32,
    frame_count: u32,
}

impl<W: Write + Seek> MthWriter<W> {
    pub fn new(mut inner: W, width: u32, height: u32, frame_rate: u32) -> Result<Self> {
        let start = inner.stream_position()?;
        if start != 0 {
            return Err(Error::invalid_input(format!("mth output must start at offset 0, not {start}")));
        }

        Header::new(width, height, frame_rate).write_to(&mut inner)?;

        Ok(Self {
            inner: Some(inner),
            previous_slot: FIRST_FRAME_SIZE_OFFSET,
            first_size: 0,
            max_size: 0,
            frame_count: 0,
        })
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn write_frame(&mut self, frame: &Thp) -> Result<()> {
        let inner = self.inner.as_mut().ok_or_else(|| Error::invalid_input("mth writer is already finished"))?;
        let payload = frame.data();
        let size = record_size_u32(payload.len())?;

        let record = inner.stream_position()?;
        inner.write_u32::<BigEndian>(0)?;
        inner.write_all(payload)?;
        let padding = size as usize - 4 - payload.len();
        inner.write_all(&vec![0; padding])?;

        inner.seek(SeekFrom::Start(self.previous_slot))?;
        inner.write_u32::<BigEndian>(size)?;
        inner.seek(SeekFrom::End(0))?;

        trace!(index = self.frame_count, offset = record, size, "mth frame");

        if self.frame_count == 0 {
            self.first_size = size;
        }
        self.previous_slot = record;
        self.max_size = self.max_size.max(size);
        self.frame_count += 1;
        Ok(())
    }

    /// Closes the chain and patches the header, returning the stream.
    pub fn finish(mut self) -> Result<W> {
        self.finalize()?;
        self.inner.take().ok_or_else(|| Error::invalid_input("mth writer is already finished"))
    }

    fn finalize(&mut self) -> Result<()> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(());
        };

        if self.frame_count > 0 {
            inner.seek(SeekFrom::Start(self.previous_slot))?;
            inner.write_u32::<BigEndian>(self.first_size)?;
        }

        inner.seek(SeekFrom::Start(MAX_FRAME_SIZE_OFFSET))?;
        inner.write_u32::<BigEndian>(self.max_size)?;
        inner.seek(SeekFrom::Start(FRAME_COUNT_OFFSET))?;
        inner.write_u32::<BigEndian>(self.frame_count)?;
        inner.seek(SeekFrom::End(0))?;
        inner.flush()?;

        debug!(frames = self.frame_count, max_size = self.max_size, "finished mth stream");
        Ok(())
    }
}

impl<W: Write + Seek> Drop for MthWriter<W> {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            warn!("failed to finalize mth stream: {e}");
        }
    }
}

/// Reads frames in chain order, wrapping back to the first frame after the last.
#[derive(Debug)]
pub struct MthReader<R: Read + Seek> {
    inner: R,
    header: Header,
    next_size: u32,
    position: u32,
}

impl<R: Read + Seek> MthReader<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        inner.seek(SeekFrom::Start(0))?;
        let header = Header::read_from(&mut inner)?;
        debug!(?header, "read mth header");

        let mut reader = Self { inner, header, next_size: header.first_frame_size, position: 0 };
        reader.rewind()?;
        Ok(reader)
    }

    pub fn width(&self) -> u32 {
        self.header.width
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn frame_rate(&self) -> u32 {
        self.header.frame_rate
    }

    pub fn frame_count(&self) -> u32 {
        self.header.frame_count
    }

    /// Index of the frame the next [`MthReader::read_frame`] returns.
    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn rewind(&mut self) -> Result<()> {
        let video_offset = (self.header.video_offset as u64).max(HEADER_SIZE as u64);
        self.inner.seek(SeekFrom::Start(video_offset))?;
        self.next_size = self.header.first_frame_size;
        self.position = 0;
        Ok(())
    }

    /// Reads the size word of the current record and moves on to the next one,
    /// leaving the stream at the start of the payload.
    fn advance(&mut self) -> Result<u32> {
        let size = self.next_size;
        if size < 4 {
            return Err(Error::format(format!("mth frame {} has a record size of {size}", self.position)));
        }

        let next = self.inner.read_u32::<BigEndian>()?;
        self.next_size = if next == 0 { self.header.first_frame_size } else { next };
        self.position += 1;
        Ok(size - 4)
    }

    /// Walks the chain from the first record to frame `frame`.
    pub fn seek(&mut self, frame: u32) -> Result<()> {
        if frame >= self.header.frame_count {
            return Err(Error::invalid_input(format!(
                "frame {frame} is past the end of a {} frame stream",
                self.header.frame_count
            )));
        }

        self.rewind()?;
        for _ in 0..frame {
            let payload_len = self.advance()?;
            self.inner.seek(SeekFrom::Current(payload_len as i64))?;
        }
        Ok(())
    }

    pub fn read_frame(&mut self) -> Result<Thp> {
        if self.header.frame_count == 0 {
            return Err(Error::invalid_input("mth stream holds no frames"));
        }

        if self.position >= self.header.frame_count {
            trace!("mth stream exhausted, wrapping to the first frame");
            self.rewind()?;
        }

        let index = self.position;
        let payload_len = self.advance()?;
        let mut payload = read_payload(&mut self.inner, payload_len as usize)?;
        trim_padding(&mut payload);

        trace!(index, len = payload.len(), "read mth frame");
        Ok(Thp::new(payload))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::video::mth::{test::frames, Mth};
    use std::io::Cursor;

    fn batch() -> Mth {
        let mut mth = Mth::new(640, 480, 60);
        mth.frames = frames();
        mth
    }

    fn stream(mth: &Mth) -> Vec<u8> {
        let mut writer = MthWriter::new(Cursor::new(Vec::new()), mth.width, mth.height, mth.frame_rate).unwrap();
        for frame in &mth.frames {
            writer.write_frame(frame).unwrap();
        }
        assert_eq!(writer.frame_count() as usize, mth.frames.len());
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn streaming_output_matches_batch() {
        let mth = batch();
        assert_eq!(stream(&mth), mth.to_bytes().unwrap());

        let empty = Mth::new(16, 16, 25);
        assert_eq!(stream(&empty), empty.to_bytes().unwrap());
    }

    #[test]
    fn drop_finalizes() {
        let mth = batch();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dropped.mth");

        {
            let file = std::fs::File::create(&path).unwrap();
            let mut writer = MthWriter::new(file, mth.width, mth.height, mth.frame_rate).unwrap();
            for frame in &mth.frames {
                writer.write_frame(frame).unwrap();
            }
        }

        assert_eq!(std::fs::read(&path).unwrap(), mth.to_bytes().unwrap());
    }

    #[test]
    fn reads_in_order_and_wraps() {
        let mth = batch();
        let mut reader = MthReader::new(Cursor::new(mth.to_bytes().unwrap())).unwrap();

        assert_eq!((reader.width(), reader.height(), reader.frame_rate()), (640, 480, 60));
        assert_eq!(reader.frame_count() as usize, mth.frames.len());

        for frame in &mth.frames {
            assert_eq!(&reader.read_frame().unwrap(), frame);
        }
        assert_eq!(reader.read_frame().unwrap(), mth.frames[0]);
        assert_eq!(reader.read_frame().unwrap(), mth.frames[1]);
        assert_eq!(reader.position(), 2);
    }

    #[test]
    fn seek_walks_the_chain() {
        let mth = batch();
        let mut reader = MthReader::new(Cursor::new(mth.to_bytes().unwrap())).unwrap();

        reader.seek(4).unwrap();
        assert_eq!(reader.read_frame().unwrap(), mth.frames[4]);

        reader.seek(0).unwrap();
        assert_eq!(reader.read_frame().unwrap(), mth.frames[0]);

        assert!(matches!(reader.seek(6), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn empty_stream_has_no_frames() {
        let bytes = Mth::new(8, 8, 8).to_bytes().unwrap();
        let mut reader = MthReader::new(Cursor::new(bytes)).unwrap();
        assert!(reader.read_frame().is_err());
    }

    #[test]
    fn truncated_stream() {
        let bytes = batch().to_bytes().unwrap();
        let mut reader = MthReader::new(Cursor::new(bytes[..0x90].to_vec())).unwrap();

        reader.read_frame().unwrap();
        reader.read_frame().unwrap();
        assert!(reader.read_frame().unwrap_err().is_format_mismatch());
        assert!(MthReader::new(Cursor::new(bytes[..0x20].to_vec())).unwrap_err().is_format_mismatch());
    }

    #[test]
    fn oversized_record_fails_at_end_of_stream() {
        let mut bytes = batch().to_bytes().unwrap();
        let slot = FIRST_FRAME_SIZE_OFFSET as usize;
        bytes[slot..slot + 4].copy_from_slice(&0xFFFF_FFE0u32.to_be_bytes());

        let mut reader = MthReader::new(Cursor::new(bytes)).unwrap();
        assert!(reader.read_frame().unwrap_err().is_format_mismatch());
    }
}
