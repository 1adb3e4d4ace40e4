//! Concatenated JPEG stream delimiter
//!
//! ffmpeg's `image2pipe` muxer produces back-to-back JPEG files
//! with no container around them. The only framing signal is the JPEG markers
//! themselves:
//!
//! ```text
//! +----------+------------------------+----------+----------+------------
//! | FF D8 FF | segments + scan data   |  FF D9   | FF D8 FF | next image ...
//! +----------+------------------------+----------+----------+------------
//!   SOI                                  EOI
//! ```
//!
//! The delimiter requires the buffer to start with SOI and cuts at the first
//! EOI that follows. Anything else at the head of the buffer means the process
//! is emitting something other than JPEG, which cannot be resynchronized in
//! place.

use std::fmt;
use std::io;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;

use super::jpeg::{EOI, SOI};

/// Default read buffer cap (4 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Error raised when the byte stream cannot be split into JPEG images
#[derive(Debug)]
pub enum FramingError {
    /// The buffer does not begin with the SOI marker
    MissingSoi {
        /// Up to the first three bytes found instead
        found: Vec<u8>,
    },
    /// No EOI was found before the buffer reached its cap
    Overflow {
        /// Buffer cap in bytes
        limit: usize,
    },
    /// Reading from the process failed
    Io(io::Error),
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingError::MissingSoi { found } => {
                write!(f, "Unprocessed data found in stream (head {:02X?})", found)
            }
            FramingError::Overflow { limit } => {
                write!(f, "No end-of-image marker within {} bytes", limit)
            }
            FramingError::Io(e) => write!(f, "Read error: {}", e),
        }
    }
}

impl std::error::Error for FramingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FramingError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FramingError {
    fn from(e: io::Error) -> Self {
        FramingError::Io(e)
    }
}

/// Splits a concatenated JPEG byte stream into individual images
///
/// Used with `tokio_util::codec::FramedRead` over the encoder's stdout.
#[derive(Debug)]
pub struct JpegDelimiter {
    /// Maximum number of bytes buffered while looking for EOI
    max_frame_size: usize,
    /// Offset to resume the EOI scan from
    scan_from: usize,
}

impl JpegDelimiter {
    /// Create a delimiter with the default 4 MiB cap
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a delimiter with a custom buffer cap
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            scan_from: Self::SCAN_START,
        }
    }

    /// The last SOI byte may already be the `FF` of an EOI marker
    const SCAN_START: usize = SOI.len() - 1;

    /// Get the buffer cap
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for JpegDelimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JpegDelimiter {
    type Item = Bytes;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FramingError> {
        if src.is_empty() {
            return Ok(None);
        }

        let head = src.len().min(SOI.len());
        if src[..head] != SOI[..head] {
            return Err(FramingError::MissingSoi {
                found: src[..head].to_vec(),
            });
        }
        if src.len() < SOI.len() {
            return Ok(None);
        }

        let start = self.scan_from.max(Self::SCAN_START);
        if let Some(pos) = src[start..].windows(EOI.len()).position(|w| w == EOI) {
            let end = start + pos + EOI.len();
            self.scan_from = Self::SCAN_START;
            return Ok(Some(src.split_to(end).freeze()));
        }

        if src.len() >= self.max_frame_size {
            return Err(FramingError::Overflow {
                limit: self.max_frame_size,
            });
        }

        // A trailing FF may be the first half of an EOI split across reads
        self.scan_from = src.len() - 1;
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FramingError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            tracing::debug!(bytes = src.len(), "Discarding partial frame at end of stream");
            src.clear();
            self.scan_from = Self::SCAN_START;
        }
        Ok(None)
    }
}
