use serde_derive::Deserialize;

use crate::appearance::FeatureKind;
use crate::error::Error;

/// How a frame's detections are matched against the selected target.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Detector track id only.
    IdOnly,
    /// Maximum-IoU spatial match only, detector ids ignored.
    SpatialOnly,
    /// Id match first, spatial match as fallback.
    Hybrid,
}

impl MatchStrategy {
    #[inline]
    pub fn uses_id(&self) -> bool {
        matches!(self, MatchStrategy::IdOnly | MatchStrategy::Hybrid)
    }

    #[inline]
    pub fn uses_spatial(&self) -> bool {
        matches!(self, MatchStrategy::SpatialOnly | MatchStrategy::Hybrid)
    }
}

/// Static per-session tuning for the tracking manager. Loaded once by an
/// external config owner; changing any of it means restarting the session.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TrackerConfig {
    pub strategy: MatchStrategy,
    /// Require matching class id even when the detector id matches.
    pub class_strict: bool,
    /// Minimum IoU for a spatial match while within normal tolerance.
    pub spatial_iou_threshold: f32,
    /// Relaxed IoU used once normal tolerance is exceeded.
    pub lenient_iou_threshold: f32,
    /// Frames a target may go undetected before degradation starts.
    pub tolerance_frames: u32,
    /// Extra frames of lenient matching past `tolerance_frames` before the
    /// target is reported lost.
    pub extended_tolerance_frames: u32,
    /// EMA weight of the newest raw confidence sample.
    pub confidence_alpha: f32,
    /// Per-frame linear confidence decay while undetected.
    pub confidence_decay: f32,
    /// Nominal stream rate, used to scale extrapolation horizons.
    pub fps: f32,
    /// Observation ring length on the tracked target.
    pub history_len: usize,
    pub appearance: AppearanceConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            strategy: MatchStrategy::Hybrid,
            class_strict: true,
            spatial_iou_threshold: 0.3,
            lenient_iou_threshold: 0.15,
            tolerance_frames: 5,
            extended_tolerance_frames: 10,
            confidence_alpha: 0.8,
            confidence_decay: 0.05,
            fps: 25.0,
            history_len: 16,
            appearance: AppearanceConfig::default(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), Error> {
        check_unit("spatial_iou_threshold", self.spatial_iou_threshold)?;
        check_unit("lenient_iou_threshold", self.lenient_iou_threshold)?;
        check_unit("confidence_alpha", self.confidence_alpha)?;
        check_unit("confidence_decay", self.confidence_decay)?;

        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(Error::ConfigOutOfRange {
                name: "fps",
                value: self.fps,
                reason: "must be positive",
            });
        }

        if self.history_len == 0 {
            return Err(Error::ConfigOutOfRange {
                name: "history_len",
                value: 0.0,
                reason: "must hold at least one observation",
            });
        }

        self.appearance.validate()
    }
}

/// Tuning for appearance-based re-identification.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AppearanceConfig {
    pub feature: FeatureKind,
    /// Cosine similarity a candidate must strictly exceed to recover a target.
    pub similarity_threshold: f32,
    /// EMA weight of freshly extracted features while the object is visible.
    pub learning_rate: f32,
    /// Frames a lost entry stays eligible for recovery.
    pub memory_window: u64,
    /// Hard cap on remembered lost objects.
    pub max_lost_objects: usize,
}

impl Default for AppearanceConfig {
    fn default() -> Self {
        Self {
            feature: FeatureKind::Hybrid,
            similarity_threshold: 0.6,
            learning_rate: 0.1,
            memory_window: 150,
            max_lost_objects: 50,
        }
    }
}

impl AppearanceConfig {
    pub fn validate(&self) -> Result<(), Error> {
        check_unit("similarity_threshold", self.similarity_threshold)?;
        check_unit("learning_rate", self.learning_rate)?;

        if self.max_lost_objects == 0 {
            return Err(Error::ConfigOutOfRange {
                name: "max_lost_objects",
                value: 0.0,
                reason: "must remember at least one lost object",
            });
        }

        Ok(())
    }
}

fn check_unit(name: &'static str, value: f32) -> Result<(), Error> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(Error::ConfigOutOfRange {
            name,
            value,
            reason: "must lie in [0, 1]",
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TrackerConfig::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_alpha_is_rejected() {
        let cfg = TrackerConfig {
            confidence_alpha: 1.5,
            ..TrackerConfig::default()
        };

        assert!(cfg.validate().is_err());
    }

    #[test]
    fn strategy_deserializes_from_snake_case() {
        let cfg: TrackerConfig =
            serde_json::from_str(r#"{"strategy": "spatial_only"}"#).unwrap();

        assert_eq!(cfg.strategy, MatchStrategy::SpatialOnly);
        assert!(!cfg.strategy.uses_id());
    }
}
