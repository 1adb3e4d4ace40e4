//! JPEG encode/decode helpers
//!
//! Thin wrappers around the `image` crate's JPEG codec plus [`StillImage`],
//! a pre-encoded picture used for placeholders.

use std::path::Path;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};

use crate::error::Result;

/// Start-of-image marker plus the first byte of the following marker
pub const SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// End-of-image marker
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Quality used for live frames when none is configured
pub const DEFAULT_QUALITY: u8 = 75;

/// Quality used for stills (deny image, after-limit placeholder)
pub const FULL_QUALITY: u8 = 100;

/// Decode a single JPEG payload
pub fn decode(data: &[u8]) -> Result<DynamicImage> {
    Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?)
}

/// Encode an image as baseline JPEG at the given quality (1-100)
pub fn encode(image: &DynamicImage, quality: u8) -> Result<Bytes> {
    let rgb = image.to_rgb8();
    let mut out = Vec::with_capacity((rgb.width() * rgb.height()) as usize / 4);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode_image(&rgb)?;
    Ok(Bytes::from(out))
}

/// A picture encoded once at full quality and shared by reference
///
/// Used for the deny image and the after-limit placeholder. Cloning only
/// bumps a reference count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StillImage {
    data: Bytes,
}

impl StillImage {
    /// Encode an in-memory image at full quality
    pub fn from_image(image: &DynamicImage) -> Result<Self> {
        Ok(Self {
            data: encode(image, FULL_QUALITY)?,
        })
    }

    /// Load a JPEG file and re-encode it at full quality
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let image = image::load_from_memory(&bytes)?;
        Self::from_image(&image)
    }

    /// Encoded JPEG bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Encoded size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the encoded payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
