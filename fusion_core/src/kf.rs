//! Kalman filter: predict and update steps.
//!
//! ## State vector
//! x = [e, n, ve, vn, ω]ᵀ  (5-dimensional, local tangent plane)
//!
//! ## CV Transition model
//! e += ve·dt, n += vn·dt, velocity held, ω collapsed to zero so that a
//! constant-velocity model never carries a stale turn rate into IMM mixing.
//!
//! ## Process noise Q (discrete white-noise acceleration per axis)
//! Q_pos = q·dt⁴/4, Q_pos_vel = q·dt³/2, Q_vel = q·dt², Q_ω = q_ω·dt
//!
//! Measurement models are linear in the state for every filter variant
//! (position, or position + velocity), so the Joseph-form update below is
//! shared by the KF and EKF.

use crate::error::{FusionError, Result};
use crate::types::{DMat, DVec, StateCov, StateVec, STATE_DIM};
use nalgebra::SymmetricEigen;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Uniform predict/update contract shared by every estimator.
///
/// Both methods are pure: a rejected result leaves the caller's estimate as it was.
pub trait KalmanFilter {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &'static str;

    /// Predict state and covariance forward by `dt` seconds.
    fn predict(&self, state: &StateVec, cov: &StateCov, dt: f64) -> Result<(StateVec, StateCov)>;

    /// Fold one observation into the estimate.
    fn update(&self, state: &StateVec, cov: &StateCov, obs: &Observation) -> Result<KfUpdateResult>;
}

/// Result of a KF update step.
#[derive(Clone, Debug)]
pub struct KfUpdateResult {
    pub state: StateVec,
    pub cov: StateCov,
    /// Innovation ν = z − H·x
    pub innovation: DVec,
    /// Innovation covariance S = H·P·Hᵀ + R
    pub innovation_cov: DMat,
    /// Kalman gain K
    pub kalman_gain: DMat,
    /// Normalized innovation squared νᵀ·S⁻¹·ν
    pub nis: f64,
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// A measurement in the local plane together with its model.
#[derive(Clone, Debug)]
pub struct Observation {
    pub z: DVec,
    pub h: DMat,
    pub r: DMat,
}

impl Observation {
    /// z = [e, n]
    pub fn position(east: f64, north: f64, pos_std: f64) -> Self {
        let mut h = DMat::zeros(2, STATE_DIM);
        h[(0, 0)] = 1.0;
        h[(1, 1)] = 1.0;
        let var = pos_std * pos_std;
        Self {
            z: DVec::from_vec(vec![east, north]),
            h,
            r: DMat::from_diagonal(&DVec::from_vec(vec![var, var])),
        }
    }

    /// z = [e, n, ve, vn]
    pub fn position_velocity(
        east: f64,
        north: f64,
        ve: f64,
        vn: f64,
        pos_std: f64,
        vel_std: f64,
    ) -> Self {
        let mut h = DMat::zeros(4, STATE_DIM);
        for i in 0..4 {
            h[(i, i)] = 1.0;
        }
        let (pv, vv) = (pos_std * pos_std, vel_std * vel_std);
        Self {
            z: DVec::from_vec(vec![east, north, ve, vn]),
            h,
            r: DMat::from_diagonal(&DVec::from_vec(vec![pv, pv, vv, vv])),
        }
    }

    pub fn dim(&self) -> usize {
        self.z.len()
    }

    /// Predicted measurement H·x
    pub fn predict_measurement(&self, state: &StateVec) -> DVec {
        &self.h * to_dyn_vec(state)
    }
}

// ---------------------------------------------------------------------------
// Shared numerics
// ---------------------------------------------------------------------------

pub fn to_dyn_vec(state: &StateVec) -> DVec {
    DVec::from_iterator(STATE_DIM, state.iter().copied())
}

pub fn to_dyn_cov(cov: &StateCov) -> DMat {
    DMat::from_column_slice(STATE_DIM, STATE_DIM, cov.as_slice())
}

/// Discrete white-noise acceleration on both axes plus a turn-rate random walk.
pub fn motion_noise(dt: f64, accel_std: f64, turn_rate_std: f64) -> StateCov {
    let q = accel_std * accel_std;
    let dt2 = dt * dt;
    let dt3 = dt2 * dt;
    let dt4 = dt3 * dt;

    let mut qm = StateCov::zeros();
    for i in 0..2usize {
        qm[(i, i)] = q * dt4 / 4.0;
        qm[(i + 2, i + 2)] = q * dt2;
        qm[(i, i + 2)] = q * dt3 / 2.0;
        qm[(i + 2, i)] = q * dt3 / 2.0;
    }
    qm[(4, 4)] = turn_rate_std * turn_rate_std * dt;
    qm
}

/// Symmetrize and validate an estimate: every entry finite and no eigenvalue
/// below a small negative tolerance.
pub fn condition_estimate(
    filter: &'static str,
    state: StateVec,
    cov: StateCov,
) -> Result<(StateVec, StateCov)> {
    if state.iter().any(|v| !v.is_finite()) {
        return Err(FusionError::divergence(filter, "non-finite state"));
    }
    if cov.iter().any(|v| !v.is_finite()) {
        return Err(FusionError::divergence(filter, "non-finite covariance"));
    }
    let sym = (cov + cov.transpose()) * 0.5;
    let scale = sym.diagonal().amax().max(1.0);
    let min_eig = SymmetricEigen::new(sym).eigenvalues.min();
    if min_eig < -1e-9 * scale {
        return Err(FusionError::divergence(
            filter,
            format!("covariance not positive semi-definite (min eigenvalue {min_eig:.3e})"),
        ));
    }
    Ok((state, sym))
}

/// Joseph-form update for a measurement whose prediction `hx` and Jacobian
/// `h` are supplied by the caller.
pub fn joseph_update(
    filter: &'static str,
    state: &StateVec,
    cov: &StateCov,
    z: &DVec,
    hx: &DVec,
    h: &DMat,
    r: &DMat,
) -> Result<KfUpdateResult> {
    let p_dyn = to_dyn_cov(cov);

    // Innovation: ν = z − h(x)
    let innovation = z - hx;

    // Innovation covariance: S = H·P·Hᵀ + R
    let s = h * &p_dyn * h.transpose() + r;

    // Kalman gain: K = P·Hᵀ·S⁻¹  (LU for numerical stability)
    let s_inv = s
        .clone()
        .lu()
        .try_inverse()
        .ok_or_else(|| FusionError::divergence(filter, "innovation covariance is singular"))?;
    let k = &p_dyn * h.transpose() * &s_inv;

    // Updated state: x' = x + K·ν
    let state_update = &k * &innovation;
    let new_state = StateVec::from_fn(|r, _| state[r] + state_update[r]);

    // Updated covariance: Joseph form P' = (I−KH)·P·(I−KH)ᵀ + K·R·Kᵀ
    let i_kh = DMat::identity(STATE_DIM, STATE_DIM) - &k * h;
    let new_p_dyn = &i_kh * &p_dyn * i_kh.transpose() + &k * r * k.transpose();
    let new_cov = StateCov::from_fn(|r, c| new_p_dyn[(r, c)]);

    let nis = (innovation.transpose() * &s_inv * &innovation)[(0, 0)];
    let (state, cov) = condition_estimate(filter, new_state, new_cov)?;

    Ok(KfUpdateResult {
        state,
        cov,
        innovation,
        innovation_cov: s,
        kalman_gain: k,
        nis,
    })
}

// ---------------------------------------------------------------------------
// Constant Velocity model
// ---------------------------------------------------------------------------

/// Constant-velocity Kalman filter (linear).
#[derive(Clone, Debug, PartialEq)]
pub struct CvKalmanFilter {
    /// White-noise acceleration std (m/s²)
    pub accel_std: f64,
    /// Turn-rate noise; the CV model zeroes ω so this only sets its variance
    pub turn_rate_std: f64,
}

impl CvKalmanFilter {
    pub fn new(accel_std: f64, turn_rate_std: f64) -> Self {
        Self {
            accel_std,
            turn_rate_std,
        }
    }

    /// Build state transition matrix F for timestep dt.
    pub fn transition_matrix(dt: f64) -> StateCov {
        let mut f = StateCov::identity();
        f[(0, 2)] = dt;
        f[(1, 3)] = dt;
        f[(4, 4)] = 0.0;
        f
    }
}

impl KalmanFilter for CvKalmanFilter {
    fn name(&self) -> &'static str {
        "kf"
    }

    fn predict(&self, state: &StateVec, cov: &StateCov, dt: f64) -> Result<(StateVec, StateCov)> {
        let f = Self::transition_matrix(dt);
        let q = motion_noise(dt, self.accel_std, self.turn_rate_std);
        condition_estimate(self.name(), f * state, f * cov * f.transpose() + q)
    }

    fn update(&self, state: &StateVec, cov: &StateCov, obs: &Observation) -> Result<KfUpdateResult> {
        let hx = obs.predict_measurement(state);
        joseph_update(self.name(), state, cov, &obs.z, &hx, &obs.h, &obs.r)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
