//! [`PixelCodec`] and image sequence implementations backed by the `image` crate.

use super::service::{FrameSink, FrameSource, PixelCodec, Picture};
use crate::error::{Error, Result};
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, ExtendedColorType, ImageFormat, RgbImage};
use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
};
use tracing::{debug, trace};

/// Baseline JPEG through `image`'s own encoder and decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCodec;

/// Below this quality some quantization entries saturate to 0xFF, which a THP
/// table segment cannot hold.
pub const MIN_QUALITY: u8 = 24;

impl PixelCodec for JpegCodec {
    /// Qualities under [`MIN_QUALITY`] are raised to it.
    fn encode(&self, picture: &Picture, quality: u8) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality.max(MIN_QUALITY)).encode(
            &picture.rgb,
            picture.width,
            picture.height,
            ExtendedColorType::Rgb8,
        )?;
        Ok(out)
    }

    fn decode(&self, jpeg: &[u8]) -> Result<Picture> {
        let image = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?.to_rgb8();
        Ok(from_image(image))
    }
}

fn from_image(image: RgbImage) -> Picture {
    Picture { width: image.width(), height: image.height(), rgb: image.into_raw() }
}

fn to_image(picture: &Picture) -> Result<RgbImage> {
    RgbImage::from_raw(picture.width, picture.height, picture.rgb.clone())
        .ok_or_else(|| Error::invalid_input("picture size does not match its pixel data"))
}

/// Loads any image file `image` understands as a [`Picture`].
pub fn load_picture(path: impl AsRef<Path>) -> Result<Picture> {
    Ok(from_image(image::open(path)?.to_rgb8()))
}

/// Saves `picture` in the format implied by the file extension.
pub fn save_picture(picture: &Picture, path: impl AsRef<Path>) -> Result<()> {
    to_image(picture)?.save(path)?;
    Ok(())
}

pub fn resize(picture: &Picture, width: u32, height: u32) -> Result<Picture> {
    if picture.resolution() == (width, height) {
        return Ok(picture.clone());
    }

    let resized = image::imageops::resize(&to_image(picture)?, width, height, FilterType::Lanczos3);
    Ok(from_image(resized))
}

/// Numbered image files read in name order.
pub struct ImageSequenceReader {
    files: VecDeque<PathBuf>,
    resolution: (u32, u32),
    frame_rate: u32,
    /// Whether pictures are scaled to `resolution` on the way out.
    scale: bool,
}

impl ImageSequenceReader {
    /// Collects every image in `dir`. The clip takes the size of the first image
    /// unless `resolution` asks for another one.
    pub fn open(dir: impl AsRef<Path>, frame_rate: u32, resolution: Option<(u32, u32)>) -> Result<Self> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.is_file() && ImageFormat::from_path(&path).is_ok() {
                files.push(path);
            }
        }
        files.sort();

        let first = files
            .first()
            .ok_or_else(|| Error::invalid_input(format!("no images in {}", dir.as_ref().display())))?;
        let native = image::image_dimensions(first)?;
        debug!(count = files.len(), ?native, ?resolution, "found image sequence");

        Ok(Self {
            files: files.into(),
            resolution: resolution.unwrap_or(native),
            frame_rate,
            scale: resolution.is_some(),
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequenceReader {
    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    fn read_frame(&mut self) -> Result<Option<Picture>> {
        let Some(path) = self.files.pop_front() else {
            return Ok(None);
        };

        trace!(path = %path.display(), "loading frame");
        let picture = load_picture(&path)?;
        if self.scale {
            let (width, height) = self.resolution;
            return resize(&picture, width, height).map(Some);
        }
        Ok(Some(picture))
    }
}

/// Writes `{prefix}{index}.{extension}` with the index zero padded to the
/// digits of the frame count.
pub struct ImageSequenceWriter {
    prefix: PathBuf,
    extension: String,
    digits: usize,
    index: usize,
}

impl ImageSequenceWriter {
    pub fn new(prefix: impl Into<PathBuf>, extension: &str, frame_count: usize) -> Result<Self> {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        if ImageFormat::from_extension(&extension).is_none() {
            return Err(Error::unsupported(format!("image extension {extension:?}")));
        }

        Ok(Self { prefix: prefix.into(), extension, digits: digits(frame_count), index: 0 })
    }

    /// Path of frame `index`.
    pub fn path(&self, index: usize) -> PathBuf {
        let mut name = self.prefix.clone().into_os_string();
        name.push(format!("{index:0width$}.{}", self.extension, width = self.digits));
        name.into()
    }
}

fn digits(count: usize) -> usize {
    count.max(1).ilog10() as usize + 1
}

impl FrameSink for ImageSequenceWriter {
    fn write_frame(&mut self, picture: &Picture) -> Result<()> {
        let path = self.path(self.index);
        trace!(path = %path.display(), "saving frame");
        save_picture(picture, &path)?;
        self.index += 1;
        Ok(())
    }
}
