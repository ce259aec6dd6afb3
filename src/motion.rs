use nalgebra as na;

use crate::bbox::{BBox, Ltrb, Xywh};
use crate::circular_queue::CircularQueue;

const HISTORY_LEN: usize = 10;
const MIN_PREDICTED_SIZE: f32 = 10.0;
const MIN_DT: f32 = 1e-3;

/// Cheap short-horizon (1–5 frame) linear extrapolator, the first line of
/// defense for occlusion bridging before Kalman or appearance recovery.
///
/// Keeps a bounded sample history and EMA-smoothed velocities for the box
/// center and size, all in px/sec.
#[derive(Debug, Clone)]
pub struct MotionPredictor {
    history: CircularQueue<(f32, BBox<Xywh>)>,
    center_vel: na::Vector2<f32>,
    size_vel: na::Vector2<f32>,
    alpha: f32,
    initialized: bool,
}

impl MotionPredictor {
    pub fn new(alpha: f32) -> Self {
        Self {
            history: CircularQueue::with_capacity(HISTORY_LEN),
            center_vel: na::Vector2::zeros(),
            size_vel: na::Vector2::zeros(),
            alpha,
            initialized: false,
        }
    }

    /// Record an observed box, folding its instantaneous velocity into the
    /// smoothed estimate.
    pub fn update(&mut self, bbox: &BBox<Ltrb>, timestamp: f32) {
        let curr = bbox.as_xywh();
        let prev = self.history.front().cloned();

        self.history.push((timestamp, curr.clone()));

        let (prev_ts, prev_box) = match prev {
            Some(p) => p,
            None => return,
        };

        let dt = timestamp - prev_ts;
        if dt < MIN_DT {
            return;
        }

        let instant_center = na::Vector2::new(
            (curr.cx() - prev_box.cx()) / dt,
            (curr.cy() - prev_box.cy()) / dt,
        );
        let instant_size = na::Vector2::new(
            (curr.width() - prev_box.width()) / dt,
            (curr.height() - prev_box.height()) / dt,
        );

        if self.initialized {
            self.center_vel = instant_center * self.alpha + self.center_vel * (1.0 - self.alpha);
            self.size_vel = instant_size * self.alpha + self.size_vel * (1.0 - self.alpha);
        } else {
            self.center_vel = instant_center;
            self.size_vel = instant_size;
            self.initialized = true;
        }
    }

    /// Linear extrapolation of the last known box. `None` without history.
    pub fn predict_bbox(&self, frames_ahead: u32, fps: f32) -> Option<BBox<Ltrb>> {
        let (_, last) = self.history.front()?;
        let dt = frames_ahead as f32 / fps.max(MIN_DT);

        let w = (last.width() + self.size_vel.x * dt).max(MIN_PREDICTED_SIZE);
        let h = (last.height() + self.size_vel.y * dt).max(MIN_PREDICTED_SIZE);

        Some(
            BBox::xywh(
                last.cx() + self.center_vel.x * dt,
                last.cy() + self.center_vel.y * dt,
                w,
                h,
            )
            .as_ltrb(),
        )
    }

    /// Whether extrapolation is meaningful or the object is effectively
    /// static. `threshold` is in px/sec.
    #[inline]
    pub fn is_moving(&self, threshold: f32) -> bool {
        self.center_vel.norm() > threshold
    }

    #[inline]
    pub fn velocity(&self) -> (f32, f32) {
        (self.center_vel.x, self.center_vel.y)
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.center_vel = na::Vector2::zeros();
        self.size_vel = na::Vector2::zeros();
        self.initialized = false;
    }
}

impl Default for MotionPredictor {
    fn default() -> Self {
        Self::new(0.3)
    }
}
