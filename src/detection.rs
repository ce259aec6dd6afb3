use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};

/// One raw detector output for a single frame.
///
/// `track_id` is whatever ephemeral id the detector session assigned; it is
/// not stable across occlusions and may change between frames for the same
/// physical object.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Detection {
    #[serde(rename = "id")]
    pub track_id: i64,
    #[serde(rename = "c")]
    pub class: i32,
    pub bbox: BBox<Ltrb>,
    #[serde(rename = "p")]
    pub confidence: f32,
}

impl Detection {
    pub fn new(track_id: i64, class: i32, bbox: BBox<Ltrb>, confidence: f32) -> Self {
        Self {
            track_id,
            class,
            bbox,
            confidence,
        }
    }

    #[inline]
    pub fn iou(&self, other: &Detection) -> f32 {
        self.bbox.iou(&other.bbox)
    }

    #[inline]
    pub fn center(&self) -> (f32, f32) {
        self.bbox.center()
    }

    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.bbox.is_degenerate() || !self.confidence.is_finite()
    }
}
