//! Decoded frame type

use std::time::Instant;

use image::DynamicImage;

/// One image decoded from the encoder's output
///
/// Frames are handed to the distributor and dropped after encoding; nothing
/// keeps them around.
#[derive(Debug)]
pub struct DecodedFrame {
    /// Position in the source's output, starting at 1 and never reset across restarts
    pub sequence: u64,
    /// When the payload was decoded
    pub captured_at: Instant,
    /// Raster data
    pub image: DynamicImage,
}

impl DecodedFrame {
    /// Wrap an image produced outside a `FrameSource`
    pub fn new(sequence: u64, image: DynamicImage) -> Self {
        Self {
            sequence,
            captured_at: Instant::now(),
            image,
        }
    }

    /// Image width in pixels
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Image height in pixels
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
