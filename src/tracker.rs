use log::{debug, info};

use crate::appearance::AppearanceModel;
use crate::config::TrackerConfig;
use crate::detection::Detection;
use crate::error::Error;
use crate::frame::Frame;
use crate::manager::{TrackOutcome, TrackingStateManager};
use crate::target::TargetState;
use crate::Tracking;

/// Single-target follow tracker: the one per-frame call site that runs the
/// matching pipeline, keeps the appearance memory fresh while the target is
/// visible, and attempts appearance recovery once it is not.
///
/// The published [`TargetState`] is the producer side of the downstream
/// boundary; reader synchronization (snapshot swapping) belongs to the
/// caller.
pub struct FollowTracker {
    manager: TrackingStateManager,
    appearance: AppearanceModel,
    state: TargetState,
    /// Detector id the appearance memory is currently keyed by.
    anchor_id: Option<i64>,
    /// Class to scan for recovery after the target dropped out of view.
    lost_class: Option<i32>,
    marked_lost: bool,
}

impl FollowTracker {
    pub fn new(config: TrackerConfig) -> Result<Self, Error> {
        config.validate()?;

        let appearance = AppearanceModel::new(&config.appearance);

        Ok(Self {
            manager: TrackingStateManager::new(config),
            appearance,
            state: TargetState::inactive(),
            anchor_id: None,
            lost_class: None,
            marked_lost: false,
        })
    }

    #[inline]
    pub fn manager(&self) -> &TrackingStateManager {
        &self.manager
    }

    #[inline]
    pub fn appearance(&self) -> &AppearanceModel {
        &self.appearance
    }

    fn register_appearance(&mut self, frame: &Frame<'_>, det: &Detection) {
        let pixels = match &frame.pixels {
            Some(p) => p,
            None => return,
        };

        if let Some(features) = self.appearance.extract_features(pixels, &det.bbox) {
            self.appearance.register_object(det.track_id, det.class, features);
        }
    }

    fn mark_lost_once(&mut self) {
        if self.marked_lost {
            return;
        }

        if let Some(id) = self.anchor_id {
            self.appearance.mark_as_lost(id);
        }

        self.marked_lost = true;
    }

    /// Scan the frame for the lost target's appearance; on a hit, re-anchor
    /// the manager to the recovered detection.
    fn try_recover(&mut self, frame: &Frame<'_>) {
        let pixels = match &frame.pixels {
            Some(p) => p,
            None => return,
        };

        let class = match self.lost_class {
            Some(c) => c,
            None => return,
        };

        let found = match self
            .appearance
            .find_best_match(pixels, &frame.detections, class)
        {
            Some(m) => m,
            None => return,
        };

        let det = match frame.detections.get(found.detection_index) {
            Some(d) => d.clone(),
            None => return,
        };

        info!(
            "recovered target as detector id {} (similarity {:.3})",
            det.track_id, found.similarity
        );

        self.manager.reanchor(frame.timestamp, &det);
        self.appearance.remove(found.recovered_id);
        self.anchor_id = Some(det.track_id);
        self.marked_lost = false;
        self.register_appearance(frame, &det);
    }

    fn publish(&mut self, dims: (u32, u32)) -> TargetState {
        let state = if self.manager.is_tracking() {
            let info = self.manager.get_tracking_info();

            match info.last_known_bbox {
                Some(bbox) => {
                    let mut s = TargetState::from_bbox(&bbox, dims);
                    s.track_id = info.selected_track_id;
                    s.class = info.selected_class;
                    s.confidence = info.smoothed_confidence;
                    s.frames_since_detection = info.frames_since_detection;
                    s.velocity = self.manager.kalman().map(|k| k.velocity());
                    s
                }
                None => TargetState::inactive(),
            }
        } else {
            let mut s = TargetState::inactive();
            s.need_reselection = self.manager.need_reselection();
            s
        };

        let state = state.sanitized();
        self.state = state.clone();

        state
    }
}

impl Tracking for FollowTracker {
    fn select(&mut self, frame: &Frame<'_>, index: usize) -> bool {
        let det = match frame.detections.get(index) {
            Some(d) => d.clone(),
            None => {
                debug!("selection index {} out of range", index);
                return false;
            }
        };

        if det.is_degenerate() {
            debug!("refusing to select degenerate detection id {}", det.track_id);
            return false;
        }

        self.manager.start_tracking(
            det.track_id,
            det.class,
            det.bbox.clone(),
            det.confidence,
            frame.timestamp,
        );

        self.anchor_id = Some(det.track_id);
        self.lost_class = Some(det.class);
        self.marked_lost = false;
        self.register_appearance(frame, &det);
        self.publish(frame.dims);

        true
    }

    fn update(&mut self, frame: &Frame<'_>) -> TargetState {
        let outcome =
            self.manager
                .update_tracking(frame.timestamp, &frame.detections, |a, b| a.iou(b));

        match &outcome {
            TrackOutcome::Matched(det) => {
                let det = det.clone();

                // A spatial match may have switched detector ids; the old
                // memory entry would otherwise linger as a false candidate.
                if self.anchor_id != Some(det.track_id) {
                    if let Some(old) = self.anchor_id {
                        self.appearance.remove(old);
                    }
                }

                self.anchor_id = Some(det.track_id);
                self.lost_class = Some(det.class);
                self.marked_lost = false;
                self.register_appearance(frame, &det);
            }
            TrackOutcome::Degraded(_) | TrackOutcome::Lost => {
                self.mark_lost_once();
                self.try_recover(frame);
            }
            TrackOutcome::Idle => {
                // After terminal loss the memory window may still be open;
                // keep scanning for the lost appearance.
                if self.lost_class.is_some() {
                    self.try_recover(frame);
                }
            }
            TrackOutcome::Coasting(_) => {}
        }

        // The appearance clock ticks exactly once per frame, after all
        // matching decisions for this frame are final.
        self.appearance.increment_frame();
        self.appearance.cleanup_old_entries();

        self.publish(frame.dims)
    }

    #[inline]
    fn state(&self) -> &TargetState {
        &self.state
    }

    fn clear(&mut self) {
        self.manager.clear();
        self.appearance.clear();
        self.state = TargetState::inactive();
        self.anchor_id = None;
        self.lost_class = None;
        self.marked_lost = false;
    }
}
