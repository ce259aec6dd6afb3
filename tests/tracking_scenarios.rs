use approx::assert_abs_diff_eq;
use ndarray::Array3;

use ftrack::bbox::BBox;
use ftrack::{Detection, FollowTracker, Frame, TrackerConfig, Tracking};

const DIMS: (u32, u32) = (128, 96);
const DT: f32 = 0.04;

fn det(track_id: i64, class: i32, x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
    Detection::new(track_id, class, BBox::ltrb(x1, y1, x2, y2), 0.9)
}

fn frame(step: u32, detections: Vec<Detection>) -> Frame<'static> {
    Frame::new(DIMS, step as f32 * DT, detections)
}

/// Uniform background with a striped block drawn at the given origin; the
/// stripes are phase-locked to the block so the same object looks the same
/// wherever it appears.
fn scene_with_target(x0: usize, y0: usize) -> Array3<u8> {
    let mut px = Array3::from_elem((DIMS.1 as usize, DIMS.0 as usize, 3), 16u8);

    for y in y0..y0 + 40 {
        for x in x0..x0 + 40 {
            let v = if ((x - x0) / 4) % 2 == 0 { 220 } else { 90 };
            px[[y, x, 0]] = v;
            px[[y, x, 1]] = v / 2;
            px[[y, x, 2]] = 40;
        }
    }

    px
}

#[test]
fn direct_id_match_keeps_frames_since_detection_at_zero() {
    let mut tracker = FollowTracker::new(TrackerConfig::default()).unwrap();

    let f0 = frame(0, vec![det(1, 0, 100.0, 100.0, 200.0, 200.0)]);
    assert!(tracker.select(&f0, 0));

    let f1 = frame(1, vec![det(1, 0, 105.0, 105.0, 205.0, 205.0)]);
    let state = tracker.update(&f1);

    assert!(state.active);
    assert_eq!(state.frames_since_detection, 0);
    assert_eq!(state.track_id, Some(1));
}

#[test]
fn id_match_beats_better_overlapping_candidate() {
    let mut tracker = FollowTracker::new(TrackerConfig::default()).unwrap();

    let f0 = frame(0, vec![det(1, 0, 100.0, 100.0, 200.0, 200.0)]);
    assert!(tracker.select(&f0, 0));

    // id=2 sits exactly where the target was; id=1 moved away. The id match
    // is attempted first, so id=1 wins despite the worse overlap.
    let f1 = frame(
        1,
        vec![
            det(2, 0, 100.0, 100.0, 200.0, 200.0),
            det(1, 0, 300.0, 100.0, 400.0, 200.0),
        ],
    );
    let state = tracker.update(&f1);

    assert_eq!(state.track_id, Some(1));
    assert_abs_diff_eq!(state.center.unwrap().0, 350.0, epsilon = 1e-3);
}

#[test]
fn occlusion_walk_from_coasting_to_terminal_loss() {
    // Defaults: tolerance 5, extended tolerance 10.
    let mut tracker = FollowTracker::new(TrackerConfig::default()).unwrap();

    let f0 = frame(0, vec![det(1, 0, 100.0, 100.0, 200.0, 200.0)]);
    assert!(tracker.select(&f0, 0));

    let state = tracker.update(&frame(1, vec![det(1, 0, 105.0, 105.0, 205.0, 205.0)]));
    assert_eq!(state.frames_since_detection, 0);

    // Five empty frames: still active on predicted position.
    for step in 2..=6 {
        let state = tracker.update(&frame(step, vec![]));
        assert!(state.active, "step {}", step);
        assert!(!state.need_reselection);
        assert_eq!(state.frames_since_detection, step - 1);
    }

    // Ten more empty frames: degraded but still active.
    for step in 7..=16 {
        let state = tracker.update(&frame(step, vec![]));
        assert!(state.active, "step {}", step);
    }

    // One past the extended window: tracking ends, reselection required.
    let state = tracker.update(&frame(17, vec![]));
    assert!(!state.active);
    assert!(state.need_reselection);
    assert_eq!(state.bbox, None);
}

#[test]
fn confidence_decays_while_coasting() {
    let mut tracker = FollowTracker::new(TrackerConfig::default()).unwrap();

    let f0 = frame(0, vec![det(1, 0, 100.0, 100.0, 200.0, 200.0)]);
    tracker.select(&f0, 0);

    let before = tracker.state().confidence;

    tracker.update(&frame(1, vec![]));
    let mid = tracker.state().confidence;
    tracker.update(&frame(2, vec![]));
    let after = tracker.state().confidence;

    assert!(mid < before);
    assert!(after < mid);
    assert!(after >= 0.0);
}

#[test]
fn published_state_is_internally_consistent() {
    let mut tracker = FollowTracker::new(TrackerConfig::default()).unwrap();

    let f0 = frame(0, vec![det(1, 0, 32.0, 24.0, 96.0, 72.0)]);
    tracker.select(&f0, 0);

    let state = tracker.update(&frame(1, vec![det(1, 0, 32.0, 24.0, 96.0, 72.0)]));

    let bbox = state.bbox.as_ref().unwrap();
    let norm = state.norm_bbox.as_ref().unwrap();
    let (cx, cy) = state.center.unwrap();
    let (ncx, ncy) = state.norm_center.unwrap();

    assert_abs_diff_eq!(cx, bbox.center().0, epsilon = 1e-5);
    assert_abs_diff_eq!(cy, bbox.center().1, epsilon = 1e-5);
    assert_abs_diff_eq!(ncx, norm.center().0, epsilon = 1e-5);
    assert_abs_diff_eq!(ncy, norm.center().1, epsilon = 1e-5);
    assert_abs_diff_eq!(ncx, cx / DIMS.0 as f32, epsilon = 1e-5);
    assert_abs_diff_eq!(ncy, cy / DIMS.1 as f32, epsilon = 1e-5);
    assert!(state.confidence.is_finite());
    assert!((0.0..=1.0).contains(&state.confidence));
}

#[test]
fn moving_target_is_coasted_along_its_trajectory() {
    let mut tracker = FollowTracker::new(TrackerConfig::default()).unwrap();

    let f0 = frame(0, vec![det(1, 0, 0.0, 40.0, 40.0, 80.0)]);
    tracker.select(&f0, 0);

    // Steady 3 px/frame rightwards.
    for step in 1..=8 {
        let x = 3.0 * step as f32;
        tracker.update(&frame(step, vec![det(1, 0, x, 40.0, x + 40.0, 80.0)]));
    }

    let seen_cx = tracker.state().center.unwrap().0;

    // Two occluded frames: the published center keeps moving right.
    tracker.update(&frame(9, vec![]));
    let coast1 = tracker.state().center.unwrap().0;
    tracker.update(&frame(10, vec![]));
    let coast2 = tracker.state().center.unwrap().0;

    assert!(coast1 > seen_cx);
    assert!(coast2 > coast1);
    assert!(tracker.state().velocity.is_some());
}

#[test]
fn appearance_recovery_inside_degraded_window() {
    let px_visible = scene_with_target(30, 20);
    let px_reappeared = scene_with_target(80, 50);

    let mut tracker = FollowTracker::new(TrackerConfig::default()).unwrap();

    // Visible phase at (30,20)..(70,60): appearance memory fills.
    let f0 = Frame::new(DIMS, 0.0, vec![det(1, 2, 30.0, 20.0, 70.0, 60.0)])
        .with_pixels(px_visible.view());
    assert!(tracker.select(&f0, 0));

    for step in 1..=3u32 {
        let f = Frame::new(
            DIMS,
            step as f32 * DT,
            vec![det(1, 2, 30.0, 20.0, 70.0, 60.0)],
        )
        .with_pixels(px_visible.view());
        tracker.update(&f);
    }

    // Occluded past normal tolerance: degraded, marked lost.
    for step in 4..=11u32 {
        let f = Frame::new(DIMS, step as f32 * DT, vec![]).with_pixels(px_visible.view());
        let state = tracker.update(&f);
        assert!(state.active);
    }

    // Reappears far away under a fresh detector id; no overlap with the
    // predicted box, so only appearance can claim it.
    let f = Frame::new(
        DIMS,
        12.0 * DT,
        vec![det(77, 2, 80.0, 50.0, 120.0, 90.0)],
    )
    .with_pixels(px_reappeared.view());
    let state = tracker.update(&f);

    assert!(state.active);
    assert_eq!(state.track_id, Some(77));
    assert_eq!(state.frames_since_detection, 0);
    assert_abs_diff_eq!(state.center.unwrap().0, 100.0, epsilon = 1e-3);
}

#[test]
fn appearance_recovery_after_terminal_loss() {
    let px_visible = scene_with_target(30, 20);
    let px_reappeared = scene_with_target(80, 50);

    let mut tracker = FollowTracker::new(TrackerConfig::default()).unwrap();

    let f0 = Frame::new(DIMS, 0.0, vec![det(1, 2, 30.0, 20.0, 70.0, 60.0)])
        .with_pixels(px_visible.view());
    assert!(tracker.select(&f0, 0));

    for step in 1..=3u32 {
        let f = Frame::new(
            DIMS,
            step as f32 * DT,
            vec![det(1, 2, 30.0, 20.0, 70.0, 60.0)],
        )
        .with_pixels(px_visible.view());
        tracker.update(&f);
    }

    // Long disappearance: run all the way through terminal loss.
    let mut lost_seen = false;
    for step in 4..=25u32 {
        let f = Frame::new(DIMS, step as f32 * DT, vec![]).with_pixels(px_visible.view());
        let state = tracker.update(&f);
        lost_seen |= state.need_reselection;
    }
    assert!(lost_seen);
    assert!(!tracker.state().active);

    // The memory window is still open: the reappearing object is recovered
    // without any manual reselection.
    let f = Frame::new(
        DIMS,
        26.0 * DT,
        vec![det(55, 2, 80.0, 50.0, 120.0, 90.0)],
    )
    .with_pixels(px_reappeared.view());
    let state = tracker.update(&f);

    assert!(state.active);
    assert!(!state.need_reselection);
    assert_eq!(state.track_id, Some(55));
}

#[test]
fn clear_is_idempotent_through_the_facade() {
    let mut tracker = FollowTracker::new(TrackerConfig::default()).unwrap();

    let f0 = frame(0, vec![det(1, 0, 100.0, 100.0, 200.0, 200.0)]);
    tracker.select(&f0, 0);
    tracker.update(&frame(1, vec![det(1, 0, 100.0, 100.0, 200.0, 200.0)]));

    tracker.clear();
    let once = tracker.state().clone();
    tracker.clear();
    let twice = tracker.state().clone();

    assert!(!once.active);
    assert_eq!(once.track_id, twice.track_id);
    assert_eq!(once.active, twice.active);
    assert_eq!(once.need_reselection, twice.need_reselection);

    // A cleared tracker stays idle on further frames.
    let state = tracker.update(&frame(2, vec![det(5, 0, 0.0, 0.0, 50.0, 50.0)]));
    assert!(!state.active);
    assert_eq!(state.track_id, None);
}

#[test]
fn invalid_config_is_rejected_at_construction() {
    let cfg = TrackerConfig {
        confidence_alpha: 2.0,
        ..TrackerConfig::default()
    };

    assert!(FollowTracker::new(cfg).is_err());
}
