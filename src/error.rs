use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid {format} signature")]
    InvalidSignature { format: &'static str },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("unexpected end of data at offset {offset:#x}: need {need} bytes, have {have}")]
    UnexpectedEof { offset: usize, need: usize, have: usize },

    #[error("malformed data: {0}")]
    Format(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("wave error: {0}")]
    Wav(#[from] hound::Error),

    #[cfg(feature = "jpeg")]
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// True for every failure that means "this is not a supported file of that kind".
    /// Truncated input counts as a mismatch, also when it came from a stream.
    pub fn is_format_mismatch(&self) -> bool {
        match self {
            Error::Io(e) | Error::Wav(hound::Error::IoError(e)) => {
                e.kind() == std::io::ErrorKind::UnexpectedEof
            },
            Error::Wav(hound::Error::FormatError(_) | hound::Error::Unsupported) => true,
            Error::InvalidSignature { .. }
            | Error::Unsupported(_)
            | Error::UnexpectedEof { .. }
            | Error::Format(_) => true,
            _ => false,
        }
    }
}
