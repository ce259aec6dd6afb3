use log::warn;
use nalgebra::{SMatrix, SVector};

use crate::bbox::{BBox, Ltrb};

type State = SVector<f32, 7>;
type StateCov = SMatrix<f32, 7, 7>;
type Measurement = SVector<f32, 4>;
type MeasurementMat = SMatrix<f32, 4, 7>;
type MeasurementCov = SMatrix<f32, 4, 4>;

/// Floors applied before every bbox reconstruction so integrated velocities
/// can never produce a non-physical box.
const AREA_FLOOR: f32 = 1.0;
const ASPECT_FLOOR: f32 = 0.01;

/// Diagonal of the measurement noise covariance (x, y, area, aspect).
const MEAS_VAR: [f32; 4] = [1.0, 1.0, 10.0, 10.0];
/// Diagonal of the process noise covariance.
const PROC_VAR: [f32; 7] = [1.0, 1.0, 1.0, 1.0, 0.01, 0.01, 0.0001];
/// Initial state covariance; velocities start unobserved.
const INIT_VAR: [f32; 7] = [10.0, 10.0, 10.0, 10.0, 10000.0, 10000.0, 10000.0];

/// Constant-velocity filter over bounding-box state
/// `[cx, cy, area, aspect_ratio, vx, vy, v_area]`.
///
/// `predict` advances the state by one frame and must run exactly once per
/// frame whether or not a measurement follows; `update` folds a measurement
/// in. A singular innovation covariance skips the correction and keeps the
/// prediction.
#[derive(Debug, Clone)]
pub struct KalmanBoxTracker {
    x: State,
    p: StateCov,
    f: StateCov,
    h: MeasurementMat,
    r: MeasurementCov,
    q: StateCov,
    /// Measurements folded in so far.
    pub hit_count: u32,
    /// Predict steps run so far.
    pub age: u32,
    /// Consecutive predict steps since the last measurement.
    pub time_since_update: u32,
}

impl KalmanBoxTracker {
    pub fn new(bbox: &BBox<Ltrb>) -> Self {
        let z = measurement(bbox);
        let x = State::from_column_slice(&[z[0], z[1], z[2], z[3], 0.0, 0.0, 0.0]);

        // cx' = cx + vx, cy' = cy + vy, area' = area + v_area,
        // aspect and all velocities carry over unchanged.
        #[rustfmt::skip]
        let f = StateCov::from_row_slice(&[
            1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0,
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0,
        ]);

        #[rustfmt::skip]
        let h = MeasurementMat::from_row_slice(&[
            1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0,
        ]);

        Self {
            x,
            p: StateCov::from_diagonal(&SVector::from_column_slice(&INIT_VAR)),
            f,
            h,
            r: MeasurementCov::from_diagonal(&SVector::from_column_slice(&MEAS_VAR)),
            q: StateCov::from_diagonal(&SVector::from_column_slice(&PROC_VAR)),
            hit_count: 0,
            age: 0,
            time_since_update: 0,
        }
    }

    /// Advance state one frame and return the predicted box.
    pub fn predict(&mut self) -> BBox<Ltrb> {
        // Integrated area velocity must not drive the area negative.
        if self.x[6] + self.x[2] <= 0.0 {
            self.x[6] = 0.0;
        }

        self.x = self.f * self.x;
        self.p = self.f * self.p * self.f.transpose() + self.q;

        self.age += 1;
        self.time_since_update += 1;

        self.bbox()
    }

    /// Fold a measured box into the state.
    pub fn update(&mut self, bbox: &BBox<Ltrb>) {
        let z = measurement(bbox);
        let y = z - self.h * self.x;
        let s = self.h * self.p * self.h.transpose() + self.r;

        let s_inv = match s.try_inverse() {
            Some(inv) => inv,
            None => {
                warn!("singular innovation covariance, keeping prediction");
                return;
            }
        };

        let k = self.p * self.h.transpose() * s_inv;

        self.x += k * y;
        self.p = (StateCov::identity() - k * self.h) * self.p;

        self.time_since_update = 0;
        self.hit_count += 1;
    }

    /// Where the box would be `n` frames ahead, without committing to it.
    pub fn predict_n_frames(&self, n: u32) -> BBox<Ltrb> {
        let mut x = self.x;

        for _ in 0..n {
            if x[6] + x[2] <= 0.0 {
                x[6] = 0.0;
            }
            x = self.f * x;
        }

        state_bbox(&x)
    }

    /// Re-anchor position and size at low uncertainty while keeping the
    /// velocity estimate; a recovered target is not a brand-new object.
    pub fn reset(&mut self, bbox: &BBox<Ltrb>) {
        let z = measurement(bbox);

        for i in 0..4 {
            self.x[i] = z[i];

            for j in 0..7 {
                self.p[(i, j)] = 0.0;
                self.p[(j, i)] = 0.0;
            }

            self.p[(i, i)] = INIT_VAR[i];
        }

        self.time_since_update = 0;
    }

    /// Trace of the position covariance sub-block; grows monotonically while
    /// the filter runs on prediction alone.
    #[inline]
    pub fn get_position_uncertainty(&self) -> f32 {
        self.p[(0, 0)] + self.p[(1, 1)]
    }

    /// Estimated center velocity in px/frame.
    #[inline]
    pub fn velocity(&self) -> (f32, f32) {
        (self.x[4], self.x[5])
    }

    /// Current box reconstructed from the state.
    pub fn bbox(&self) -> BBox<Ltrb> {
        state_bbox(&self.x)
    }
}

#[inline]
fn measurement(bbox: &BBox<Ltrb>) -> Measurement {
    let z = bbox.as_xysr();

    Measurement::from_column_slice(&[z.cx(), z.cy(), z.area(), z.aspect_ratio()])
}

fn state_bbox(x: &State) -> BBox<Ltrb> {
    let s = x[2].max(AREA_FLOOR);
    let r = x[3].max(ASPECT_FLOOR);

    BBox::xysr(x[0], x[1], s, r).as_ltrb()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn boxed(x1: f32, y1: f32, x2: f32, y2: f32) -> BBox<Ltrb> {
        BBox::ltrb(x1, y1, x2, y2)
    }

    #[test]
    fn predict_then_update_pulls_toward_measurement() {
        let mut kf = KalmanBoxTracker::new(&boxed(0.0, 0.0, 10.0, 5.0));

        let pred1 = kf.predict();
        kf.update(&boxed(5.0, 0.0, 15.0, 5.0));
        let pred2 = kf.predict();

        assert!(pred2.center().0 > pred1.center().0);
        assert_eq!(kf.hit_count, 1);
        assert_eq!(kf.age, 2);
        assert_eq!(kf.time_since_update, 1);
    }

    #[test]
    fn predicted_box_never_degenerates() {
        // Shrinking measurements drive v_area negative.
        let mut kf = KalmanBoxTracker::new(&boxed(100.0, 100.0, 140.0, 140.0));

        for i in 0..6 {
            kf.predict();
            let shrink = 18.0 - 3.0 * i as f32;
            kf.update(&boxed(100.0, 100.0, 100.0 + shrink, 100.0 + shrink));
        }

        for _ in 0..200 {
            let b = kf.predict();

            assert!(b.width() > 0.0);
            assert!(b.height() > 0.0);
            assert!(b.area() >= AREA_FLOOR - 1e-3);
        }
    }

    #[test]
    fn lookahead_is_side_effect_free() {
        let mut kf = KalmanBoxTracker::new(&boxed(10.0, 10.0, 30.0, 30.0));
        kf.predict();
        kf.update(&boxed(14.0, 10.0, 34.0, 30.0));

        let before = *kf.bbox().as_slice();
        let ahead = kf.predict_n_frames(5);
        let after = *kf.bbox().as_slice();

        assert_eq!(before, after);
        assert_eq!(kf.age, 1);
        // A moving target's lookahead leads the current estimate.
        assert!(ahead.center().0 > kf.bbox().center().0);
    }

    #[test]
    fn uncertainty_grows_during_prediction_only_runs() {
        let mut kf = KalmanBoxTracker::new(&boxed(0.0, 0.0, 20.0, 20.0));
        kf.predict();
        kf.update(&boxed(1.0, 0.0, 21.0, 20.0));

        let mut last = kf.get_position_uncertainty();

        for _ in 0..10 {
            kf.predict();
            let now = kf.get_position_uncertainty();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn reset_reanchors_but_keeps_velocity() {
        let mut kf = KalmanBoxTracker::new(&boxed(0.0, 0.0, 20.0, 20.0));

        for i in 1..=8 {
            kf.predict();
            let dx = 4.0 * i as f32;
            kf.update(&boxed(dx, 0.0, 20.0 + dx, 20.0));
        }

        let (vx, vy) = kf.velocity();
        assert!(vx > 1.0);

        kf.reset(&boxed(200.0, 50.0, 220.0, 70.0));

        let (rvx, rvy) = kf.velocity();
        assert_abs_diff_eq!(vx, rvx, epsilon = 1e-6);
        assert_abs_diff_eq!(vy, rvy, epsilon = 1e-6);

        let b = kf.bbox();
        assert_abs_diff_eq!(b.center().0, 210.0, epsilon = 1e-3);
        assert_abs_diff_eq!(b.center().1, 60.0, epsilon = 1e-3);
    }
}
