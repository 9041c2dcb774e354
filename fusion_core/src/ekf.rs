//! Extended Kalman Filter (EKF) on a coordinated-turn motion model.
//!
//! The turn rate ω is part of the state. Prediction runs the exact
//! coordinated-turn transition and propagates the covariance through its
//! Jacobian evaluated at the current estimate. For |ω| below
//! [`OMEGA_EPS`] the closed-form limits (straight-line motion) are used so
//! neither the transition nor its Jacobian divides by zero.

use crate::error::Result;
use crate::kf::{
    condition_estimate, joseph_update, motion_noise, KalmanFilter, KfUpdateResult, Observation,
};
use crate::types::{DMat, DVec, StateCov, StateVec};

/// Turn rates below this (rad/s) are treated as straight-line motion.
pub const OMEGA_EPS: f64 = 1e-6;

/// Coordinated-turn transition x' = f(x, dt).
pub fn ct_transition(state: &StateVec, dt: f64) -> StateVec {
    let (e, n, ve, vn, w) = (state[0], state[1], state[2], state[3], state[4]);
    if w.abs() < OMEGA_EPS {
        return StateVec::new(e + ve * dt, n + vn * dt, ve, vn, w);
    }
    let (s, c) = (w * dt).sin_cos();
    StateVec::new(
        e + (ve * s - vn * (1.0 - c)) / w,
        n + (ve * (1.0 - c) + vn * s) / w,
        ve * c - vn * s,
        ve * s + vn * c,
        w,
    )
}

/// Jacobian ∂f/∂x of [`ct_transition`].
pub fn ct_jacobian(state: &StateVec, dt: f64) -> StateCov {
    let (ve, vn, w) = (state[2], state[3], state[4]);
    let mut f = StateCov::identity();

    if w.abs() < OMEGA_EPS {
        let t2 = dt * dt / 2.0;
        f[(0, 2)] = dt;
        f[(1, 3)] = dt;
        f[(0, 4)] = -vn * t2;
        f[(1, 4)] = ve * t2;
        f[(2, 4)] = -vn * dt;
        f[(3, 4)] = ve * dt;
        return f;
    }

    let (s, c) = (w * dt).sin_cos();
    let w2 = w * w;

    f[(0, 2)] = s / w;
    f[(0, 3)] = -(1.0 - c) / w;
    f[(1, 2)] = (1.0 - c) / w;
    f[(1, 3)] = s / w;
    f[(2, 2)] = c;
    f[(2, 3)] = -s;
    f[(3, 2)] = s;
    f[(3, 3)] = c;

    // ∂/∂ω
    f[(0, 4)] = (ve * dt * c - vn * dt * s) / w - (ve * s - vn * (1.0 - c)) / w2;
    f[(1, 4)] = (ve * dt * s + vn * dt * c) / w - (ve * (1.0 - c) + vn * s) / w2;
    f[(2, 4)] = -dt * (ve * s + vn * c);
    f[(3, 4)] = dt * (ve * c - vn * s);
    f
}

/// Extended Kalman Filter with coordinated-turn prediction.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtendedKalmanFilter {
    pub accel_std: f64,
    pub turn_rate_std: f64,
}

impl ExtendedKalmanFilter {
    pub fn new(accel_std: f64, turn_rate_std: f64) -> Self {
        Self {
            accel_std,
            turn_rate_std,
        }
    }

    /// Update step for EKF.
    /// `hx` is the predicted measurement h(x_pred) and `h_jacobian` the
    /// measurement Jacobian evaluated at x_pred.
    pub fn update_ekf(
        &self,
        state: &StateVec,
        cov: &StateCov,
        z: &DVec,
        hx: &DVec,
        h_jacobian: &DMat,
        r: &DMat,
    ) -> Result<KfUpdateResult> {
        joseph_update(self.name(), state, cov, z, hx, h_jacobian, r)
    }
}

impl KalmanFilter for ExtendedKalmanFilter {
    fn name(&self) -> &'static str {
        "ekf"
    }

    fn predict(&self, state: &StateVec, cov: &StateCov, dt: f64) -> Result<(StateVec, StateCov)> {
        let f = ct_jacobian(state, dt);
        let q = motion_noise(dt, self.accel_std, self.turn_rate_std);
        condition_estimate(
            self.name(),
            ct_transition(state, dt),
            f * cov * f.transpose() + q,
        )
    }

    fn update(&self, state: &StateVec, cov: &StateCov, obs: &Observation) -> Result<KfUpdateResult> {
        // Position/velocity measurements are linear: h(x) = H·x, Jacobian = H
        let hx = obs.predict_measurement(state);
        self.update_ekf(state, cov, &obs.z, &hx, &obs.h, &obs.r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    #[test]
    fn quarter_turn_lands_on_circle() {
        // 10 m/s east, turning left at π/20 rad/s: a quarter turn takes 10 s
        let w = PI / 20.0;
        let state = StateVec::new(0.0, 0.0, 10.0, 0.0, w);
        let next = ct_transition(&state, 10.0);
        let radius = 10.0 / w;
        assert_abs_diff_eq!(next[0], radius, epsilon = 1e-9);
        assert_abs_diff_eq!(next[1], radius, epsilon = 1e-9);
        assert_abs_diff_eq!(next[2], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(next[3], 10.0, epsilon = 1e-9);
    }

    #[test]
    fn jacobian_matches_finite_difference() {
        let state = StateVec::new(50.0, -20.0, 4.0, 3.0, 0.05);
        let dt = 3.0;
        let jac = ct_jacobian(&state, dt);
        let h = 1e-6;
        for col in 0..5 {
            let mut plus = state;
            let mut minus = state;
            plus[col] += h;
            minus[col] -= h;
            let diff = (ct_transition(&plus, dt) - ct_transition(&minus, dt)) / (2.0 * h);
            for row in 0..5 {
                assert_abs_diff_eq!(jac[(row, col)], diff[row], epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn small_turn_rate_is_continuous() {
        let straight = StateVec::new(0.0, 0.0, 3.0, 4.0, 0.0);
        let nearly = StateVec::new(0.0, 0.0, 3.0, 4.0, 1e-5);
        let a = ct_transition(&straight, 5.0);
        let b = ct_transition(&nearly, 5.0);
        for i in 0..4 {
            assert_abs_diff_eq!(a[i], b[i], epsilon = 1e-2);
        }
        let ja = ct_jacobian(&straight, 5.0);
        let jb = ct_jacobian(&nearly, 5.0);
        assert_abs_diff_eq!(ja[(0, 4)], jb[(0, 4)], epsilon = 1e-2);
    }

    #[test]
    fn ekf_update_moves_towards_measurement() {
        let ekf = ExtendedKalmanFilter::new(0.2, 0.01);
        let state = StateVec::new(100.0, 0.0, 0.0, 0.0, 0.0);
        let mut cov = StateCov::identity() * 10.0;
        cov[(4, 4)] = 0.01;

        let (pred, pred_cov) = ekf.predict(&state, &cov, 1.0).unwrap();
        let res = ekf
            .update(&pred, &pred_cov, &Observation::position(105.0, 2.0, 1.0))
            .unwrap();
        assert!(res.state[0] > 100.0);
        assert!(res.state[1] > 0.0);
    }
}
