//! Captured frames.
//!
//! A `Frame` is an RGB8 pixel buffer with its capture time. Pixels are private
//! and there is no mutable accessor: overlays and encoders work on a copy
//! obtained through `to_image`, so a frame can be shared with the broadcaster
//! while the driver keeps using it.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use image::RgbImage;
use std::time::Instant;

pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Wall-clock capture time (used for messages and screenshot names).
    pub captured_at: DateTime<Local>,
    /// Monotonic capture instant (used for throttling and health).
    pub captured_instant: Instant,
    /// Sequence number assigned by the device that produced the frame.
    pub sequence: u64,
}

impl Frame {
    /// Build a frame from packed RGB8 pixels.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame buffer has {} bytes, expected {} for {}x{} rgb",
                pixels.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            captured_at: Local::now(),
            captured_instant: Instant::now(),
            sequence,
        })
    }

    pub fn from_image(image: RgbImage, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            pixels: image.into_raw(),
            width,
            height,
            captured_at: Local::now(),
            captured_instant: Instant::now(),
            sequence,
        }
    }

    /// A frame with no pixels counts as a failed read.
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty() || self.width == 0 || self.height == 0
    }

    /// Copy of the pixels as an image, for overlay and encoding.
    pub fn to_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("captured_at", &self.captured_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0u8; 10], 4, 4, 0).is_err());
    }

    #[test]
    fn zero_sized_frame_is_empty() {
        let frame = Frame::new(Vec::new(), 0, 0, 0).unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn image_round_trip_keeps_dimensions() {
        let frame = Frame::new(vec![7u8; 2 * 3 * 3], 2, 3, 5).unwrap();
        let image = frame.to_image().unwrap();
        assert_eq!(image.dimensions(), (2, 3));
        assert_eq!(frame.sequence, 5);
        assert!(!frame.is_empty());
    }
}
