//! The seams between the frame containers and whatever turns pixels into JPEG
//! bitstreams and back.
//!
//! Containers only ever see THP bytes. A [`PixelCodec`] converts between
//! [`Picture`]s and JPEG, while [`FrameSource`] and [`FrameSink`] stand in for
//! other video containers or image sequences on disk.

use super::{
    stream::{MthReader, MthWriter},
    thp::Thp,
};
use crate::error::{Error, Result};
use std::io::{Read, Seek, Write};
use tracing::{debug, trace};

pub const DEFAULT_QUALITY: u8 = 25;

/// A packed 8-bit RGB image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picture {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl Picture {
    pub fn new(width: u32, height: u32, rgb: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if rgb.len() != expected {
            return Err(Error::invalid_input(format!(
                "{width}x{height} picture needs {expected} bytes of rgb, got {}",
                rgb.len()
            )));
        }

        Ok(Self { width, height, rgb })
    }

    pub fn solid(width: u32, height: u32, color: [u8; 3]) -> Self {
        let rgb = color.iter().copied().cycle().take(width as usize * height as usize * 3).collect();
        Self { width, height, rgb }
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Converts pictures to and from baseline JPEG.
pub trait PixelCodec {
    /// `quality` ranges from 1 to 100.
    fn encode(&self, picture: &Picture, quality: u8) -> Result<Vec<u8>>;

    fn decode(&self, jpeg: &[u8]) -> Result<Picture>;
}

/// A stream of pictures sharing one resolution, e.g. a decoded video file.
pub trait FrameSource {
    fn resolution(&self) -> (u32, u32);

    fn frame_rate(&self) -> u32;

    /// The next picture, or `None` at the end of the stream.
    fn read_frame(&mut self) -> Result<Option<Picture>>;
}

/// Receives pictures in display order.
pub trait FrameSink {
    fn write_frame(&mut self, picture: &Picture) -> Result<()>;

    /// Called once after the last frame.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub fn decode_thp<C: PixelCodec + ?Sized>(codec: &C, frame: &Thp) -> Result<Picture> {
    codec.decode(&frame.to_jpeg()?)
}

pub fn encode_thp<C: PixelCodec + ?Sized>(codec: &C, picture: &Picture, quality: u8) -> Result<Thp> {
    Thp::from_jpeg(&codec.encode(picture, quality.clamp(1, 100))?)
}

/// Decodes every frame of `reader`, once, into `sink`. Returns the frame count.
pub fn mth_to_frames<R, C, S>(reader: &mut MthReader<R>, codec: &C, sink: &mut S) -> Result<u32>
where
    R: Read + Seek,
    C: PixelCodec + ?Sized,
    S: FrameSink + ?Sized,
{
    let count = reader.frame_count();
    if count > 0 {
        reader.seek(0)?;
    }

    for index in 0..count {
        let picture = decode_thp(codec, &reader.read_frame()?)?;
        trace!(index, width = picture.width, height = picture.height, "decoded mth frame");
        sink.write_frame(&picture)?;
    }
    sink.close()?;

    debug!(frames = count, "extracted mth frames");
    Ok(count)
}

/// Encodes everything `source` yields into a new `.mth` stream on `output`.
pub fn frames_to_mth<W, C, S>(source: &mut S, codec: &C, quality: u8, output: W) -> Result<W>
where
    W: Write + Seek,
    C: PixelCodec + ?Sized,
    S: FrameSource + ?Sized,
{
    let (width, height) = source.resolution();
    let mut writer = MthWriter::new(output, width, height, source.frame_rate())?;

    while let Some(picture) = source.read_frame()? {
        if picture.resolution() != (width, height) {
            return Err(Error::invalid_input(format!(
                "frame {} is {}x{}, the clip is {width}x{height}",
                writer.frame_count(),
                picture.width,
                picture.height
            )));
        }

        writer.write_frame(&encode_thp(codec, &picture, quality)?)?;
    }

    debug!(frames = writer.frame_count(), width, height, quality, "encoded mth clip");
    writer.finish()
}
