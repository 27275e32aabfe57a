//! # Error Types Module
//!
//! Structured errors for bordering requests. Input errors are recovered inside the
//! conversation (the user is re-prompted), storage and compose errors abort the current
//! transition and are turned into a user-facing message.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the compositor
#[derive(Debug, Error)]
pub enum ComposeError {
    /// The input bytes are not a decodable raster image
    #[error("Decode error: {0}")]
    Decode(String),
    /// Aspect ratio or margin ratio outside what the layout can handle
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// The JPEG encoder rejected the canvas
    #[error("Encode error: {0}")]
    Encode(String),
}

/// Errors raised while handling temporary image files
///
/// Deleting a file is never an error: see [`crate::image_store::ImageStore::discard`].
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to write pending image in {dir}: {source}")]
    Write {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read pending image {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    /// The pending image no longer exists on disk
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::Read { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

/// Why a free-text value was refused
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("not a ratio of two whole numbers: {0:?}")]
    MalformedRatio(String),
    #[error("zero is not allowed in a ratio: {0:?}")]
    ZeroTerm(String),
    #[error("not a number: {0:?}")]
    MalformedNumber(String),
    #[error("value {value} outside [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },
}

/// Top-level error taxonomy for one conversation transition
#[derive(Debug, Error)]
pub enum BorderError {
    #[error(transparent)]
    InvalidInput(#[from] InputError),
    #[error("no decodable picture: {0}")]
    Decode(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("composition failed: {0}")]
    Compose(String),
}

impl From<ComposeError> for BorderError {
    fn from(err: ComposeError) -> Self {
        match err {
            ComposeError::Decode(msg) => BorderError::Decode(msg),
            other => BorderError::Compose(other.to_string()),
        }
    }
}
