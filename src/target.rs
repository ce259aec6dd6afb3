use nalgebra as na;
use serde_derive::Serialize;

use crate::bbox::{BBox, Ltrb};
use crate::circular_queue::CircularQueue;

/// One accepted observation of the tracked target.
#[derive(Debug, Clone)]
pub struct Observation {
    pub timestamp: f32,
    pub bbox: BBox<Ltrb>,
    pub confidence: f32,
}

/// Mutable per-target state owned by the tracking manager. Exists only while
/// a selection is live; permanent loss or `clear()` drops it.
#[derive(Debug, Clone)]
pub struct TrackedTarget {
    /// Detector id the selection is currently anchored to.
    pub track_id: i64,
    pub class: i32,
    pub bbox: BBox<Ltrb>,
    pub center: na::Point2<f32>,
    pub smoothed_confidence: f32,
    /// 0 whenever the current frame produced a direct or spatial match.
    pub frames_since_detection: u32,
    pub(crate) history: CircularQueue<Observation>,
}

impl TrackedTarget {
    pub fn new(
        track_id: i64,
        class: i32,
        bbox: BBox<Ltrb>,
        confidence: f32,
        history_len: usize,
    ) -> Self {
        let (cx, cy) = bbox.center();

        Self {
            track_id,
            class,
            bbox,
            center: na::Point2::new(cx, cy),
            smoothed_confidence: confidence.clamp(0.0, 1.0),
            frames_since_detection: 0,
            history: CircularQueue::with_capacity(history_len),
        }
    }

    pub(crate) fn set_bbox(&mut self, bbox: BBox<Ltrb>) {
        let (cx, cy) = bbox.center();

        self.bbox = bbox;
        self.center = na::Point2::new(cx, cy);
    }

    pub fn recent_observations(&self) -> Vec<Observation> {
        self.history.asc_iter().cloned().collect()
    }
}

/// Read-only snapshot of the manager's state, safe to take at any frame
/// phase.
#[derive(Debug, Clone, Default)]
pub struct TrackingInfo {
    pub selected_track_id: Option<i64>,
    pub selected_class: Option<i32>,
    pub last_known_bbox: Option<BBox<Ltrb>>,
    pub last_known_center: Option<(f32, f32)>,
    pub smoothed_confidence: f32,
    pub frames_since_detection: u32,
    pub recent_observations: Vec<Observation>,
}

/// The record published downstream once per frame, the sole contract the
/// followers and telemetry consume. Never carries NaN/Inf; the normalized
/// center is always the projection of the normalized bbox.
#[derive(Serialize, Debug, Clone)]
pub struct TargetState {
    pub active: bool,
    /// True only when the extended tolerance window was exhausted: tracking
    /// ended and a caller must select a new target.
    pub need_reselection: bool,
    pub track_id: Option<i64>,
    pub class: Option<i32>,
    pub bbox: Option<BBox<Ltrb>>,
    pub norm_bbox: Option<BBox<Ltrb>>,
    pub center: Option<(f32, f32)>,
    pub norm_center: Option<(f32, f32)>,
    pub confidence: f32,
    /// Center velocity estimate in px/frame, present while a Kalman estimate
    /// is in use.
    pub velocity: Option<(f32, f32)>,
    pub frames_since_detection: u32,
}

impl TargetState {
    pub fn inactive() -> Self {
        Self {
            active: false,
            need_reselection: false,
            track_id: None,
            class: None,
            bbox: None,
            norm_bbox: None,
            center: None,
            norm_center: None,
            confidence: 0.0,
            velocity: None,
            frames_since_detection: 0,
        }
    }

    /// Build the published record from a pixel-space box and frame dims; all
    /// derived fields stay mutually consistent.
    pub fn from_bbox(bbox: &BBox<Ltrb>, dims: (u32, u32)) -> Self {
        let norm = bbox.normalized(dims);
        let norm_center = norm.center();

        Self {
            active: true,
            bbox: Some(bbox.clone()),
            center: Some(bbox.center()),
            norm_bbox: Some(norm),
            norm_center: Some(norm_center),
            ..Self::inactive()
        }
    }

    /// Drop any field a NaN or infinity crept into and clamp confidence.
    /// Downstream PID controllers consume this blindly.
    pub fn sanitized(mut self) -> Self {
        if !self.confidence.is_finite() {
            self.confidence = 0.0;
        }
        self.confidence = self.confidence.clamp(0.0, 1.0);

        if self.bbox.as_ref().map_or(false, |b| !b.is_finite()) {
            self.bbox = None;
            self.center = None;
        }
        if self.norm_bbox.as_ref().map_or(false, |b| !b.is_finite()) {
            self.norm_bbox = None;
            self.norm_center = None;
        }
        if self
            .center
            .map_or(false, |(x, y)| !x.is_finite() || !y.is_finite())
        {
            self.center = None;
        }
        if self
            .norm_center
            .map_or(false, |(x, y)| !x.is_finite() || !y.is_finite())
        {
            self.norm_center = None;
        }
        if self
            .velocity
            .map_or(false, |(x, y)| !x.is_finite() || !y.is_finite())
        {
            self.velocity = None;
        }

        self
    }
}
