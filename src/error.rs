//! Crate error types
//!
//! A single `Error` enum wraps the failures of each layer so callers can use
//! `?` across the frame source, distributor and HTTP wiring.

use std::fmt;
use std::io;

use crate::media::delimiter::FramingError;
use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O error (sockets, pipes, files)
    Io(io::Error),
    /// The external encoder process could not be started
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying OS error
        source: io::Error,
    },
    /// The encoder emitted bytes that are not a concatenated JPEG stream
    Framing(FramingError),
    /// JPEG decode or encode failure
    Image(image::ImageError),
    /// Distributor rejected or failed an operation
    Registry(RegistryError),
    /// Invalid configuration
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Spawn { program, source } => {
                write!(f, "Failed to spawn '{}': {}", program, source)
            }
            Error::Framing(e) => write!(f, "Framing error: {}", e),
            Error::Image(e) => write!(f, "Image error: {}", e),
            Error::Registry(e) => write!(f, "{}", e),
            Error::Config(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Spawn { source, .. } => Some(source),
            Error::Framing(e) => Some(e),
            Error::Image(e) => Some(e),
            Error::Registry(e) => Some(e),
            Error::Config(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<FramingError> for Error {
    fn from(e: FramingError) -> Self {
        Error::Framing(e)
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Image(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}
