pub mod appearance;
pub mod bbox;
pub mod config;
pub mod detection;
pub mod error;
pub mod frame;
pub mod kalman;
pub mod manager;
pub mod motion;
pub mod target;
pub mod tracker;

mod circular_queue;

pub use config::{MatchStrategy, TrackerConfig};
pub use detection::Detection;
pub use error::Error;
pub use frame::Frame;
pub use target::TargetState;
pub use tracker::FollowTracker;

/// The per-frame contract a follow tracker exposes to its host pipeline:
/// select a target from a frame's detections, feed every subsequent frame
/// through `update`, and read back the published state.
pub trait Tracking {
    /// Start tracking the detection at `index` in this frame. Returns false
    /// when the index is out of range or the detection carries no usable box.
    fn select(&mut self, frame: &Frame<'_>, index: usize) -> bool;

    /// Consume one frame and publish the resulting target state. Must be
    /// called exactly once per frame.
    fn update(&mut self, frame: &Frame<'_>) -> TargetState;

    /// The most recently published state.
    fn state(&self) -> &TargetState;

    /// Drop the selection and all per-target state.
    fn clear(&mut self);
}
