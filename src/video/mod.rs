//! Video: THP frames, the `.mth` frame container and THP movies.

#[cfg(feature = "jpeg")]
pub mod images;
pub mod movie;
pub mod mth;
pub mod service;
pub mod stream;
pub mod thp;

#[cfg(feature = "jpeg")]
pub use images::{ImageSequenceReader, ImageSequenceWriter, JpegCodec};
pub use movie::{MovieFrame, ThpMovie};
pub use mth::Mth;
pub use service::{FrameSink, FrameSource, Picture, PixelCodec};
pub use stream::{MthReader, MthWriter};
pub use thp::Thp;
