use log::{debug, info};

use crate::bbox::{BBox, Ltrb};
use crate::config::TrackerConfig;
use crate::detection::Detection;
use crate::kalman::KalmanBoxTracker;
use crate::motion::MotionPredictor;
use crate::target::{Observation, TrackedTarget, TrackingInfo};

/// Per-frame result of the matching pipeline.
///
/// Everything except `Lost` is a normal operating state; `Lost` is the one
/// signal that changes caller-visible behavior (a follower must stop
/// commanding velocity and a new target must be selected).
#[derive(Debug, Clone)]
pub enum TrackOutcome {
    /// No target is selected.
    Idle,
    /// A detection matched by id or by overlap.
    Matched(Detection),
    /// No match, but still within normal tolerance; the box is predicted.
    Coasting(BBox<Ltrb>),
    /// Past normal tolerance, matching leniently inside the extended window.
    Degraded(BBox<Ltrb>),
    /// Extended tolerance exhausted; reselection required.
    Lost,
}

impl TrackOutcome {
    #[inline]
    pub fn is_active(&self) -> bool {
        !matches!(self, TrackOutcome::Idle | TrackOutcome::Lost)
    }

    #[inline]
    pub fn detection(&self) -> Option<&Detection> {
        match self {
            TrackOutcome::Matched(det) => Some(det),
            _ => None,
        }
    }
}

/// Owns the single selected target and decides, every frame, whether it is
/// still valid: id match first, spatial overlap as fallback, predicted
/// position while occluded, lenient re-matching once tolerance is exceeded,
/// and finally loss.
pub struct TrackingStateManager {
    config: TrackerConfig,
    target: Option<TrackedTarget>,
    kalman: Option<KalmanBoxTracker>,
    motion: MotionPredictor,
    need_reselection: bool,
}

impl TrackingStateManager {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            target: None,
            kalman: None,
            motion: MotionPredictor::default(),
            need_reselection: false,
        }
    }

    /// Begin tracking a freshly selected detection. Resets all per-track
    /// state; always succeeds.
    pub fn start_tracking(
        &mut self,
        track_id: i64,
        class: i32,
        bbox: BBox<Ltrb>,
        confidence: f32,
        timestamp: f32,
    ) {
        info!("start tracking id {} class {}", track_id, class);

        let mut target = TrackedTarget::new(
            track_id,
            class,
            bbox.clone(),
            confidence,
            self.config.history_len,
        );
        target.history.push(Observation {
            timestamp,
            bbox: bbox.clone(),
            confidence: confidence.clamp(0.0, 1.0),
        });

        self.target = Some(target);
        self.kalman = Some(KalmanBoxTracker::new(&bbox));
        self.motion.reset();
        self.motion.update(&bbox, timestamp);
        self.need_reselection = false;
    }

    /// Run the matching pipeline for one frame. Must be called exactly once
    /// per frame while a selection is live.
    ///
    /// The IoU function is injected by the caller; non-finite values it
    /// returns are treated as non-matches, never as errors.
    pub fn update_tracking<F>(
        &mut self,
        timestamp: f32,
        detections: &[Detection],
        iou: F,
    ) -> TrackOutcome
    where
        F: Fn(&BBox<Ltrb>, &BBox<Ltrb>) -> f32,
    {
        if self.target.is_none() {
            return TrackOutcome::Idle;
        }

        // The filter advances once per frame whether or not a measurement
        // follows.
        let kalman_pred = self.kalman.as_mut().map(|k| k.predict());

        match self.find_match(detections, &iou) {
            Some(idx) => {
                let det = detections[idx].clone();
                self.apply_match(timestamp, &det);
                TrackOutcome::Matched(det)
            }
            None => self.register_miss(kalman_pred),
        }
    }

    fn find_match<F>(&self, detections: &[Detection], iou: &F) -> Option<usize>
    where
        F: Fn(&BBox<Ltrb>, &BBox<Ltrb>) -> f32,
    {
        let target = self.target.as_ref()?;

        if self.config.strategy.uses_id() {
            let found = detections.iter().position(|d| {
                d.track_id == target.track_id
                    && (!self.config.class_strict || d.class == target.class)
                    && !d.is_degenerate()
            });

            if found.is_some() {
                return found;
            }
        }

        if self.config.strategy.uses_spatial() {
            // Once normal tolerance is spent, trade precision for recovery
            // odds inside the extended window.
            let threshold = if target.frames_since_detection >= self.config.tolerance_frames {
                self.config.lenient_iou_threshold
            } else {
                self.config.spatial_iou_threshold
            };

            return best_spatial_match(target, detections, iou, threshold);
        }

        None
    }

    fn apply_match(&mut self, timestamp: f32, det: &Detection) {
        let alpha = self.config.confidence_alpha;

        let target = match self.target.as_mut() {
            Some(t) => t,
            None => return,
        };

        let raw = det.confidence.clamp(0.0, 1.0);

        // Spatial matches may carry a new detector id; adopt it so direct id
        // matching works again next frame.
        target.track_id = det.track_id;
        target.class = det.class;
        target.frames_since_detection = 0;
        target.smoothed_confidence =
            (alpha * raw + (1.0 - alpha) * target.smoothed_confidence).clamp(0.0, 1.0);
        target.set_bbox(det.bbox.clone());
        target.history.push(Observation {
            timestamp,
            bbox: det.bbox.clone(),
            confidence: raw,
        });

        match self.kalman.as_mut() {
            Some(k) => k.update(&det.bbox),
            None => self.kalman = Some(KalmanBoxTracker::new(&det.bbox)),
        }

        self.motion.update(&det.bbox, timestamp);
    }

    fn register_miss(&mut self, kalman_pred: Option<BBox<Ltrb>>) -> TrackOutcome {
        let tolerance = self.config.tolerance_frames;
        let extended = self.config.extended_tolerance_frames;
        let decay = self.config.confidence_decay;
        let fps = self.config.fps;

        let fsd = match self.target.as_mut() {
            Some(target) => {
                target.frames_since_detection += 1;
                target.smoothed_confidence = (target.smoothed_confidence - decay).max(0.0);
                target.frames_since_detection
            }
            None => return TrackOutcome::Idle,
        };

        if fsd > tolerance + extended {
            info!("target lost after {} frames without detection", fsd);

            self.target = None;
            self.kalman = None;
            self.motion.reset();
            self.need_reselection = true;

            return TrackOutcome::Lost;
        }

        // Bridge the gap: short-horizon extrapolation first, the filter's
        // own prediction as backup, the last known box as a last resort.
        let predicted = self
            .motion
            .predict_bbox(fsd, fps)
            .filter(|b| !b.is_degenerate())
            .or_else(|| kalman_pred.filter(|b| !b.is_degenerate()));

        let target = match self.target.as_mut() {
            Some(t) => t,
            None => return TrackOutcome::Idle,
        };

        let predicted = predicted.unwrap_or_else(|| target.bbox.clone());
        target.set_bbox(predicted.clone());

        if fsd <= tolerance {
            TrackOutcome::Coasting(predicted)
        } else {
            debug!("tolerance exceeded ({} frames), lenient matching", fsd);
            TrackOutcome::Degraded(predicted)
        }
    }

    /// Adopt a new detector id for the same logical target, typically after
    /// appearance re-identification. The filter is re-anchored, not rebuilt,
    /// so the velocity estimate survives the gap.
    pub fn reanchor(&mut self, timestamp: f32, det: &Detection) {
        self.need_reselection = false;

        let alpha = self.config.confidence_alpha;

        match self.target.as_mut() {
            Some(target) => {
                info!(
                    "re-anchoring target from id {} to id {}",
                    target.track_id, det.track_id
                );

                let raw = det.confidence.clamp(0.0, 1.0);

                target.track_id = det.track_id;
                target.class = det.class;
                target.frames_since_detection = 0;
                target.smoothed_confidence =
                    (alpha * raw + (1.0 - alpha) * target.smoothed_confidence).clamp(0.0, 1.0);
                target.set_bbox(det.bbox.clone());
                target.history.push(Observation {
                    timestamp,
                    bbox: det.bbox.clone(),
                    confidence: raw,
                });

                match self.kalman.as_mut() {
                    Some(k) => k.reset(&det.bbox),
                    None => self.kalman = Some(KalmanBoxTracker::new(&det.bbox)),
                }

                self.motion.reset();
                self.motion.update(&det.bbox, timestamp);
            }
            None => {
                // Recovery after terminal loss: the old per-track state is
                // gone, so the identity restarts from the recovered box.
                self.start_tracking(
                    det.track_id,
                    det.class,
                    det.bbox.clone(),
                    det.confidence,
                    timestamp,
                );
            }
        }
    }

    /// Full reset; calling it twice is the same as calling it once.
    pub fn clear(&mut self) {
        self.target = None;
        self.kalman = None;
        self.motion.reset();
        self.need_reselection = false;
    }

    pub fn get_tracking_info(&self) -> TrackingInfo {
        match &self.target {
            Some(t) => TrackingInfo {
                selected_track_id: Some(t.track_id),
                selected_class: Some(t.class),
                last_known_bbox: Some(t.bbox.clone()),
                last_known_center: Some((t.center.x, t.center.y)),
                smoothed_confidence: t.smoothed_confidence,
                frames_since_detection: t.frames_since_detection,
                recent_observations: t.recent_observations(),
            },
            None => TrackingInfo::default(),
        }
    }

    #[inline]
    pub fn is_tracking(&self) -> bool {
        self.target.is_some()
    }

    #[inline]
    pub fn need_reselection(&self) -> bool {
        self.need_reselection
    }

    #[inline]
    pub fn target(&self) -> Option<&TrackedTarget> {
        self.target.as_ref()
    }

    #[inline]
    pub fn kalman(&self) -> Option<&KalmanBoxTracker> {
        self.kalman.as_ref()
    }

    #[inline]
    pub fn motion(&self) -> &MotionPredictor {
        &self.motion
    }

    #[inline]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }
}

fn best_spatial_match<F>(
    target: &TrackedTarget,
    detections: &[Detection],
    iou: &F,
    threshold: f32,
) -> Option<usize>
where
    F: Fn(&BBox<Ltrb>, &BBox<Ltrb>) -> f32,
{
    let mut best: Option<(usize, f32)> = None;

    for (idx, det) in detections.iter().enumerate() {
        if det.class != target.class {
            continue;
        }

        if det.is_degenerate() {
            debug!("ignoring degenerate detection id {}", det.track_id);
            continue;
        }

        let overlap = iou(&target.bbox, &det.bbox);

        if !overlap.is_finite() {
            debug!("non-finite iou for detection id {}, non-match", det.track_id);
            continue;
        }

        // Strictly-greater comparison: equal scores keep the lowest index.
        if best.map_or(true, |(_, b)| overlap > b) {
            best = Some((idx, overlap));
        }
    }

    best.filter(|&(_, v)| v >= threshold).map(|(idx, _)| idx)
}
