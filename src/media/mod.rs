//! Media handling for the relay
//!
//! This module provides:
//! - JPEG marker constants and encode/decode helpers
//! - The delimiter that splits ffmpeg's concatenated JPEG output
//! - Pre-encoded stills for placeholders

pub mod delimiter;
pub mod jpeg;

pub use delimiter::{FramingError, JpegDelimiter, DEFAULT_MAX_FRAME_SIZE};
pub use jpeg::StillImage;
