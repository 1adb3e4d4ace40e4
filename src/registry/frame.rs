//! Encoded frame type shared by all consumers

use bytes::Bytes;

use crate::error::Result;
use crate::media::jpeg;
use crate::source::DecodedFrame;

/// Unique identifier of a registered consumer
pub type ConsumerId = u64;

/// JPEG payload of one live frame
///
/// Encoded once per frame by the distributor; every consumer receives a clone
/// that shares the same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Sequence number of the decoded frame this came from
    pub sequence: u64,
    /// JPEG bytes (zero-copy via reference counting)
    pub data: Bytes,
}

impl EncodedFrame {
    /// Wrap an already-encoded payload
    pub fn new(sequence: u64, data: Bytes) -> Self {
        Self { sequence, data }
    }

    /// Encode a decoded frame at the given JPEG quality
    pub fn encode(frame: &DecodedFrame, quality: u8) -> Result<Self> {
        Ok(Self {
            sequence: frame.sequence,
            data: jpeg::encode(&frame.image, quality)?,
        })
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::jpeg::tests::test_card;

    #[test]
    fn test_encode_keeps_sequence() {
        let decoded = DecodedFrame::new(42, test_card(16, 8));
        let encoded = EncodedFrame::encode(&decoded, 80).unwrap();

        assert_eq!(encoded.sequence, 42);
        assert!(!encoded.is_empty());

        let back = jpeg::decode(&encoded.data).unwrap();
        assert_eq!((back.width(), back.height()), (16, 8));
    }

    #[test]
    fn test_clone_shares_buffer() {
        let frame = EncodedFrame::new(1, Bytes::from(vec![0xFF, 0xD8, 0xFF, 0xD9]));
        let copy = frame.clone();

        assert_eq!(frame.data.as_ptr(), copy.data.as_ptr());
    }
}
