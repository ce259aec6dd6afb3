use ndarray::ArrayView3;

use crate::detection::Detection;

/// Per-frame input: the detector's output plus an optional borrowed pixel
/// buffer in HWC RGB layout (rows, columns, 3).
///
/// Pixels are consumed only by appearance feature extraction; a frame without
/// them disables re-identification for that frame and nothing else.
pub struct Frame<'a> {
    pub dims: (u32, u32),
    pub detections: Vec<Detection>,
    pub timestamp: f32, // in seconds
    pub pixels: Option<ArrayView3<'a, u8>>,
}

impl<'a> Frame<'a> {
    pub fn new(dims: (u32, u32), timestamp: f32, detections: Vec<Detection>) -> Self {
        Self {
            dims,
            detections,
            timestamp,
            pixels: None,
        }
    }

    pub fn with_pixels(mut self, pixels: ArrayView3<'a, u8>) -> Self {
        self.pixels = Some(pixels);
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
