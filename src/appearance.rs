use log::{debug, info};
use ndarray::{s, Array1, Array2, ArrayView3};
use serde_derive::Deserialize;

use crate::bbox::{BBox, Ltrb};
use crate::config::AppearanceConfig;
use crate::detection::Detection;

use std::collections::HashMap;

/// Visual descriptor computed per candidate region. Resolved once at
/// construction; the extraction path never branches on strings.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Per-channel RGB intensity histograms.
    ColorHist,
    /// Magnitude-weighted gradient orientation histograms on a cell grid.
    GradientHist,
    /// Concatenation of both.
    Hybrid,
}

const COLOR_BINS: usize = 32;
const ORIENT_BINS: usize = 9;
const GRID: usize = 2;
/// Smallest region worth describing, in pixels per side.
const MIN_REGION: usize = 4;
const NORM_EPSILON: f32 = 1e-6;

/// One remembered object that is (or recently was) out of view.
#[derive(Debug, Clone)]
pub struct LostObject {
    pub features: Array1<f32>,
    pub class: i32,
    pub frame_registered: u64,
    pub frame_lost: Option<u64>,
}

/// A recovery candidate produced by [`AppearanceModel::find_best_match`].
#[derive(Debug, Clone)]
pub struct ReidMatch {
    /// Index into the detection slice passed to the query.
    pub detection_index: usize,
    pub similarity: f32,
    /// The lost track id whose identity the detection recovers.
    pub recovered_id: i64,
}

/// Long-horizon identity recovery: remembers what recently-lost objects
/// looked like and matches fresh detections of the same class against that
/// memory. Both a time window and an entry cap bound the memory, so a
/// session can run indefinitely.
pub struct AppearanceModel {
    kind: FeatureKind,
    similarity_threshold: f32,
    learning_rate: f32,
    memory_window: u64,
    max_lost_objects: usize,
    memory: HashMap<i64, LostObject>,
    frame_index: u64,
}

impl AppearanceModel {
    pub fn new(config: &AppearanceConfig) -> Self {
        Self {
            kind: config.feature,
            similarity_threshold: config.similarity_threshold,
            learning_rate: config.learning_rate,
            memory_window: config.memory_window,
            max_lost_objects: config.max_lost_objects,
            memory: HashMap::new(),
            frame_index: 0,
        }
    }

    /// Describe the `bbox` region of `pixels` (HWC, RGB). `None` on any
    /// input the descriptor cannot be computed from.
    pub fn extract_features(
        &self,
        pixels: &ArrayView3<'_, u8>,
        bbox: &BBox<Ltrb>,
    ) -> Option<Array1<f32>> {
        let (fh, fw, channels) = pixels.dim();

        if channels != 3 {
            debug!("feature extraction expects RGB, got {} channels", channels);
            return None;
        }

        if bbox.is_degenerate() {
            debug!("degenerate bbox, skipping feature extraction");
            return None;
        }

        let x1 = (bbox.left().floor().max(0.0) as usize).min(fw);
        let y1 = (bbox.top().floor().max(0.0) as usize).min(fh);
        let x2 = (bbox.right().ceil().max(0.0) as usize).min(fw);
        let y2 = (bbox.bottom().ceil().max(0.0) as usize).min(fh);

        if x2 - x1 < MIN_REGION || y2 - y1 < MIN_REGION {
            debug!("region {}x{} below minimum, skipping", x2 - x1, y2 - y1);
            return None;
        }

        let patch = pixels.slice(s![y1..y2, x1..x2, ..]);

        let features = match self.kind {
            FeatureKind::ColorHist => color_histogram(&patch),
            FeatureKind::GradientHist => gradient_histogram(&patch),
            FeatureKind::Hybrid => {
                let mut v = color_histogram(&patch).into_raw_vec();
                v.extend(gradient_histogram(&patch).into_raw_vec());
                Array1::from_vec(v)
            }
        };

        normalize(features)
    }

    /// Cosine similarity of two normalized descriptors, clamped into [0, 1].
    /// 0.0 on dimension mismatch.
    pub fn compute_similarity(&self, a: &Array1<f32>, b: &Array1<f32>) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }

        a.dot(b).clamp(0.0, 1.0)
    }

    /// Remember (or refresh) what a visible object looks like. Repeated
    /// registrations drift the stored descriptor by EMA so slow appearance
    /// change is tolerated.
    pub fn register_object(&mut self, track_id: i64, class: i32, features: Array1<f32>) {
        let rate = self.learning_rate;

        let same_dims = self
            .memory
            .get(&track_id)
            .map_or(false, |e| e.features.len() == features.len());

        if same_dims {
            if let Some(entry) = self.memory.get_mut(&track_id) {
                let blended = &features * rate + &entry.features * (1.0 - rate);

                if let Some(blended) = normalize(blended) {
                    entry.features = blended;
                }

                entry.class = class;
                entry.frame_lost = None;
            }

            return;
        }

        self.memory.insert(
            track_id,
            LostObject {
                features,
                class,
                frame_registered: self.frame_index,
                frame_lost: None,
            },
        );
    }

    /// Start the eviction countdown for an object that dropped out of view.
    pub fn mark_as_lost(&mut self, track_id: i64) {
        if let Some(entry) = self.memory.get_mut(&track_id) {
            if entry.frame_lost.is_none() {
                entry.frame_lost = Some(self.frame_index);
                debug!("track {} marked lost at frame {}", track_id, self.frame_index);
            }
        }
    }

    /// Forget an entry, typically because its identity was just recovered.
    pub fn remove(&mut self, track_id: i64) -> Option<LostObject> {
        self.memory.remove(&track_id)
    }

    /// Match same-class detections against lost entries still inside the
    /// memory window. Returns the best pairing whose similarity strictly
    /// exceeds the threshold; a tie at the boundary is no match.
    pub fn find_best_match(
        &self,
        pixels: &ArrayView3<'_, u8>,
        detections: &[Detection],
        class: i32,
    ) -> Option<ReidMatch> {
        let mut candidates: Vec<(i64, &LostObject)> = self
            .memory
            .iter()
            .filter(|(_, entry)| entry.class == class)
            .filter(|(_, entry)| match entry.frame_lost {
                Some(lost) => self.frame_index.saturating_sub(lost) <= self.memory_window,
                None => false,
            })
            .map(|(id, entry)| (*id, entry))
            .collect();

        if candidates.is_empty() {
            return None;
        }

        // HashMap order is not deterministic; matching must be.
        candidates.sort_by_key(|(id, _)| *id);

        let mut best: Option<ReidMatch> = None;

        for (det_idx, det) in detections.iter().enumerate() {
            if det.class != class || det.is_degenerate() {
                continue;
            }

            let features = match self.extract_features(pixels, &det.bbox) {
                Some(f) => f,
                None => continue,
            };

            for (lost_id, entry) in &candidates {
                let similarity = self.compute_similarity(&features, &entry.features);

                let better = match &best {
                    Some(b) => similarity > b.similarity,
                    None => similarity > self.similarity_threshold,
                };

                if better {
                    best = Some(ReidMatch {
                        detection_index: det_idx,
                        similarity,
                        recovered_id: *lost_id,
                    });
                }
            }
        }

        if let Some(m) = &best {
            info!(
                "appearance match: detection {} recovers track {} at similarity {:.3}",
                m.detection_index, m.recovered_id, m.similarity
            );
        }

        best
    }

    /// Advance the model's frame clock. Call exactly once per frame, after
    /// matching decisions for the frame are final.
    #[inline]
    pub fn increment_frame(&mut self) {
        self.frame_index += 1;
    }

    /// Evict entries whose loss age exceeds the window, then enforce the
    /// entry cap by dropping the oldest-by-loss-time entries.
    pub fn cleanup_old_entries(&mut self) {
        let window = self.memory_window;
        let now = self.frame_index;

        self.memory.retain(|_, entry| match entry.frame_lost {
            Some(lost) => now.saturating_sub(lost) <= window,
            None => true,
        });

        if self.memory.len() <= self.max_lost_objects {
            return;
        }

        let mut order: Vec<(u64, u64, i64)> = self
            .memory
            .iter()
            .map(|(id, entry)| {
                (
                    entry.frame_lost.unwrap_or(u64::MAX),
                    entry.frame_registered,
                    *id,
                )
            })
            .collect();

        order.sort();

        let excess = self.memory.len() - self.max_lost_objects;
        for (_, _, id) in order.into_iter().take(excess) {
            self.memory.remove(&id);
        }
    }

    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    #[inline]
    pub fn contains(&self, track_id: i64) -> bool {
        self.memory.contains_key(&track_id)
    }

    pub fn clear(&mut self) {
        self.memory.clear();
    }
}

fn color_histogram(patch: &ArrayView3<'_, u8>) -> Array1<f32> {
    let (h, w, _) = patch.dim();
    let mut hist = vec![0.0f32; 3 * COLOR_BINS];
    let bucket = 256 / COLOR_BINS;

    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                let bin = patch[[y, x, c]] as usize / bucket;
                hist[c * COLOR_BINS + bin] += 1.0;
            }
        }
    }

    Array1::from_vec(hist)
}

fn gradient_histogram(patch: &ArrayView3<'_, u8>) -> Array1<f32> {
    let (h, w, _) = patch.dim();

    let mut luma = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            luma[[y, x]] = 0.299 * patch[[y, x, 0]] as f32
                + 0.587 * patch[[y, x, 1]] as f32
                + 0.114 * patch[[y, x, 2]] as f32;
        }
    }

    let mut hist = vec![0.0f32; GRID * GRID * ORIENT_BINS];

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let dx = luma[[y, x + 1]] - luma[[y, x - 1]];
            let dy = luma[[y + 1, x]] - luma[[y - 1, x]];
            let magnitude = (dx * dx + dy * dy).sqrt();

            if magnitude <= f32::EPSILON {
                continue;
            }

            // Unsigned orientation in [0, pi).
            let mut theta = dy.atan2(dx);
            if theta < 0.0 {
                theta += std::f32::consts::PI;
            }

            let bin = ((theta / std::f32::consts::PI) * ORIENT_BINS as f32) as usize;
            let bin = bin.min(ORIENT_BINS - 1);

            let cell_y = (y * GRID / h).min(GRID - 1);
            let cell_x = (x * GRID / w).min(GRID - 1);

            hist[(cell_y * GRID + cell_x) * ORIENT_BINS + bin] += magnitude;
        }
    }

    Array1::from_vec(hist)
}

fn normalize(features: Array1<f32>) -> Option<Array1<f32>> {
    let norm = features.dot(&features).sqrt();

    if !norm.is_finite() || norm <= NORM_EPSILON {
        return None;
    }

    Some(features / norm)
}
