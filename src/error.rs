use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad container magic, truncated chunks or a dangling index reference.
    #[error("invalid glTF container: {0}")]
    Format(String),

    #[error("malformed glTF JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// A `.bin` or image file named by the document is missing. The path is
    /// the relative path as written in the document.
    #[error("referenced resource not found: {}", .0.display())]
    ResourceNotFound(PathBuf),

    #[error("encoder failed for image '{image}': {reason}")]
    EncoderInvocation { image: String, reason: String },

    #[error("export cancelled")]
    Cancelled,

    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),

    #[error("image transcoding failed: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn format(message: impl Into<String>) -> Self {
        Error::Format(message.into())
    }
}
