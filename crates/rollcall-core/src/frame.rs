//! Frame type and burst handling.
//!
//! A verification attempt submits a burst of frames captured over a short
//! window. Frames arrive as raw encoded image bytes (PNG/JPEG) and are
//! decoded to 8-bit grayscale; the blink state machine only needs luminance.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("undecodable image bytes: {0}")]
    Undecodable(String),
    #[error("empty frame payload")]
    Empty,
}

/// A decoded frame within a verification burst.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Client-supplied ordinal within the burst. The liveness state machine
    /// depends on submission order, so bursts are re-sorted by this before
    /// processing.
    pub sequence: u32,
    /// Capture time relative to the start of the burst.
    pub offset: Duration,
}

impl Frame {
    /// Decode raw image bytes into a grayscale frame.
    pub fn decode(bytes: &[u8], sequence: u32, offset: Duration) -> Result<Self, FrameError> {
        if bytes.is_empty() {
            return Err(FrameError::Empty);
        }
        let img = image::load_from_memory(bytes)
            .map_err(|e| FrameError::Undecodable(e.to_string()))?;
        let gray = img.to_luma8();
        let (width, height) = gray.dimensions();
        Ok(Self {
            data: gray.into_raw(),
            width,
            height,
            sequence,
            offset,
        })
    }

    /// Construct a frame from already-decoded grayscale pixels.
    pub fn from_gray(
        data: Vec<u8>,
        width: u32,
        height: u32,
        sequence: u32,
        offset: Duration,
    ) -> Self {
        Self {
            data,
            width,
            height,
            sequence,
            offset,
        }
    }
}

/// Sort a burst into submission order by sequence number.
pub fn order_burst(frames: &mut [Frame]) {
    frames.sort_by_key(|f| f.sequence);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(seq: u32) -> Frame {
        Frame::from_gray(vec![128u8; 4], 2, 2, seq, Duration::from_millis(seq as u64 * 100))
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = Frame::decode(&[0xde, 0xad, 0xbe, 0xef], 0, Duration::ZERO);
        assert!(matches!(result, Err(FrameError::Undecodable(_))));
    }

    #[test]
    fn test_decode_empty_fails() {
        let result = Frame::decode(&[], 0, Duration::ZERO);
        assert!(matches!(result, Err(FrameError::Empty)));
    }

    #[test]
    fn test_decode_png() {
        // Encode a tiny image with the same crate, then decode it back.
        let img = image::GrayImage::from_pixel(3, 2, image::Luma([200u8]));
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();

        let frame = Frame::decode(&bytes, 7, Duration::from_millis(350)).unwrap();
        assert_eq!((frame.width, frame.height), (3, 2));
        assert_eq!(frame.sequence, 7);
        assert!(frame.data.iter().all(|&p| p == 200));
    }

    #[test]
    fn test_order_burst() {
        let mut burst = vec![gray_frame(2), gray_frame(0), gray_frame(1)];
        order_burst(&mut burst);
        let seqs: Vec<u32> = burst.iter().map(|f| f.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }
}
