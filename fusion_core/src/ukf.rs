//! Unscented Kalman Filter (UKF) implementation.
//!
//! Sigma points are pushed through the exact coordinated-turn transition
//! (no Jacobian) and the mean/covariance reconstructed with the scaled
//! unscented transform.

use crate::ekf::ct_transition;
use crate::error::{FusionError, Result};
use crate::kf::{
    condition_estimate, motion_noise, to_dyn_cov, to_dyn_vec, KalmanFilter, KfUpdateResult,
    Observation,
};
use crate::types::{DMat, DVec, StateCov, StateVec, STATE_DIM};

/// Unscented Kalman Filter.
#[derive(Clone, Debug, PartialEq)]
pub struct UnscentedKalmanFilter {
    pub accel_std: f64,
    pub turn_rate_std: f64,
    /// Spread of the sigma points around the mean
    pub alpha: f64,
    /// Prior knowledge of the distribution (2.0 is optimal for Gaussians)
    pub beta: f64,
    /// Secondary scaling parameter
    pub kappa: f64,
}

/// Sigma-point weights for one (n, α, β, κ) combination.
struct Weights {
    lambda: f64,
    mean0: f64,
    cov0: f64,
    rest: f64,
}

impl UnscentedKalmanFilter {
    pub fn new(accel_std: f64, turn_rate_std: f64, alpha: f64, beta: f64, kappa: f64) -> Self {
        Self {
            accel_std,
            turn_rate_std,
            alpha,
            beta,
            kappa,
        }
    }

    fn weights(&self) -> Weights {
        let n = STATE_DIM as f64;
        let lambda = self.alpha * self.alpha * (n + self.kappa) - n;
        let mean0 = lambda / (n + lambda);
        Weights {
            lambda,
            mean0,
            cov0: mean0 + (1.0 - self.alpha * self.alpha + self.beta),
            rest: 1.0 / (2.0 * (n + lambda)),
        }
    }

    /// 2n+1 sigma points around `mean`. A covariance that is only
    /// semi-definite (e.g. a collapsed turn-rate variance) is retried with a
    /// small diagonal jitter.
    pub fn generate_sigma_points(&self, mean: &StateVec, cov: &StateCov) -> Result<Vec<StateVec>> {
        let w = self.weights();
        let scaled = cov * (STATE_DIM as f64 + w.lambda);
        let jitter = StateCov::identity() * (1e-9 * scaled.trace().abs().max(1.0));
        let chol = scaled
            .cholesky()
            .or_else(|| (scaled + jitter).cholesky())
            .ok_or_else(|| FusionError::divergence(self.name(), "covariance not positive definite"))?;
        let spread = chol.l();

        let mut points = Vec::with_capacity(2 * STATE_DIM + 1);
        points.push(*mean);
        for i in 0..STATE_DIM {
            let col = spread.column(i);
            points.push(mean + col);
            points.push(mean - col);
        }
        Ok(points)
    }

    /// Weighted mean and covariance of propagated sigma points.
    fn recombine(&self, points: &[StateVec]) -> (StateVec, StateCov) {
        let w = self.weights();
        let mut mean = points[0] * w.mean0;
        for p in points.iter().skip(1) {
            mean += p * w.rest;
        }
        let mut cov = StateCov::zeros();
        for (i, p) in points.iter().enumerate() {
            let wi = if i == 0 { w.cov0 } else { w.rest };
            let d = p - mean;
            cov += d * d.transpose() * wi;
        }
        (mean, cov)
    }

    /// Measurement mean, innovation covariance and state/measurement cross-covariance.
    fn unscented_transform(
        &self,
        sigma_points: &[StateVec],
        z_points: &[DVec],
        x_mean: &StateVec,
        r: &DMat,
    ) -> (DVec, DMat, DMat) {
        let w = self.weights();
        let m_dim = r.nrows();

        let mut z_mean = &z_points[0] * w.mean0;
        for zp in z_points.iter().skip(1) {
            z_mean += zp * w.rest;
        }

        let mut sz = DMat::zeros(m_dim, m_dim);
        let mut pxz = DMat::zeros(STATE_DIM, m_dim);
        let x_dyn = to_dyn_vec(x_mean);
        for (i, (sp, zp)) in sigma_points.iter().zip(z_points).enumerate() {
            let wi = if i == 0 { w.cov0 } else { w.rest };
            let dz = zp - &z_mean;
            let dx = to_dyn_vec(sp) - &x_dyn;
            sz += &dz * dz.transpose() * wi;
            pxz += &dx * dz.transpose() * wi;
        }
        sz += r;
        (z_mean, sz, pxz)
    }

    /// Update step using the unscented transform of `h_func`.
    pub fn update_ukf<F>(
        &self,
        state: &StateVec,
        cov: &StateCov,
        z: &DVec,
        h_func: F,
        r: &DMat,
    ) -> Result<KfUpdateResult>
    where
        F: Fn(&StateVec) -> DVec,
    {
        let sigma_points = self.generate_sigma_points(state, cov)?;
        let z_points: Vec<DVec> = sigma_points.iter().map(&h_func).collect();
        let (z_mean, sz, pxz) = self.unscented_transform(&sigma_points, &z_points, state, r);

        let s_inv = sz
            .clone()
            .lu()
            .try_inverse()
            .ok_or_else(|| FusionError::divergence(self.name(), "innovation covariance is singular"))?;
        let k = pxz * &s_inv;

        let innovation = z - &z_mean;
        let state_update = &k * &innovation;
        let new_state = StateVec::from_fn(|r, _| state[r] + state_update[r]);

        let new_p_dyn = to_dyn_cov(cov) - &k * &sz * k.transpose();
        let new_cov = StateCov::from_fn(|r, c| new_p_dyn[(r, c)]);

        let nis = (innovation.transpose() * &s_inv * &innovation)[(0, 0)];
        let (state, cov) = condition_estimate(self.name(), new_state, new_cov)?;
        Ok(KfUpdateResult {
            state,
            cov,
            innovation,
            innovation_cov: sz,
            kalman_gain: k,
            nis,
        })
    }
}

impl KalmanFilter for UnscentedKalmanFilter {
    fn name(&self) -> &'static str {
        "ukf"
    }

    fn predict(&self, state: &StateVec, cov: &StateCov, dt: f64) -> Result<(StateVec, StateCov)> {
        let sigma_points = self.generate_sigma_points(state, cov)?;
        let propagated: Vec<StateVec> = sigma_points
            .iter()
            .map(|sp| ct_transition(sp, dt))
            .collect();
        let (mean, cov) = self.recombine(&propagated);
        let q = motion_noise(dt, self.accel_std, self.turn_rate_std);
        condition_estimate(self.name(), mean, cov + q)
    }

    fn update(&self, state: &StateVec, cov: &StateCov, obs: &Observation) -> Result<KfUpdateResult> {
        self.update_ukf(state, cov, &obs.z, |s| obs.predict_measurement(s), &obs.r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ekf::ExtendedKalmanFilter;
    use approx::assert_abs_diff_eq;

    fn ukf() -> UnscentedKalmanFilter {
        UnscentedKalmanFilter::new(0.2, 0.01, 1.0, 2.0, 0.0)
    }

    #[test]
    fn sigma_points_recover_mean_and_cov() {
        let f = ukf();
        let mean = StateVec::new(10.0, -5.0, 2.0, 1.0, 0.01);
        let cov = StateCov::from_diagonal(&StateVec::new(4.0, 9.0, 1.0, 0.25, 1e-4));
        let pts = f.generate_sigma_points(&mean, &cov).unwrap();
        assert_eq!(pts.len(), 11);
        let (m, c) = f.recombine(&pts);
        assert_abs_diff_eq!(m, mean, epsilon = 1e-9);
        assert_abs_diff_eq!(c, cov, epsilon = 1e-9);
    }

    #[test]
    fn straight_line_predict_agrees_with_ekf() {
        let state = StateVec::new(0.0, 0.0, 5.0, 0.0, 0.0);
        let cov = StateCov::from_diagonal(&StateVec::new(1.0, 1.0, 0.1, 0.1, 1e-6));
        let (u, _) = ukf().predict(&state, &cov, 2.0).unwrap();
        let (e, _) = ExtendedKalmanFilter::new(0.2, 0.01)
            .predict(&state, &cov, 2.0)
            .unwrap();
        assert_abs_diff_eq!(u, e, epsilon = 1e-3);
    }

    #[test]
    fn collapsed_turn_variance_still_predicts() {
        let state = StateVec::new(0.0, 0.0, 5.0, 0.0, 0.0);
        let mut cov = StateCov::identity();
        cov[(4, 4)] = 0.0;
        assert!(ukf().predict(&state, &cov, 1.0).is_ok());
    }

    #[test]
    fn update_moves_towards_measurement() {
        let state = StateVec::new(100.0, 0.0, 0.0, 0.0, 0.0);
        let cov = StateCov::from_diagonal(&StateVec::new(10.0, 10.0, 10.0, 10.0, 1e-3));
        let res = ukf()
            .update(&state, &cov, &Observation::position(105.0, 2.0, 1.0))
            .unwrap();
        assert!(res.state[0] > 100.0);
        assert!(res.state[1] > 0.0);
        assert!(res.cov.trace() < cov.trace());
    }
}
