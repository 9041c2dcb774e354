//! Per-track estimator: one tagged union over the filter family.
//!
//! [`ModelFilter`] is a single-model filter (KF / EKF / UKF). [`Estimator`]
//! either owns one of those with its estimate, or an [`ImmState`] composite
//! holding several. Both expose the same pure `predict` / `update` contract,
//! so callers only commit a result after it has passed the numeric checks.

use crate::config::{FilterConfig, FilterKind, UkfConfig};
use crate::ekf::ExtendedKalmanFilter;
use crate::error::Result;
use crate::imm::{ImmState, ModelProbability};
use crate::kf::{CvKalmanFilter, KalmanFilter, KfUpdateResult, Observation};
use crate::types::{StateCov, StateVec};
use crate::ukf::UnscentedKalmanFilter;

// ---------------------------------------------------------------------------
// ModelFilter
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum ModelFilter {
    Kf(CvKalmanFilter),
    Ekf(ExtendedKalmanFilter),
    Ukf(UnscentedKalmanFilter),
}

impl ModelFilter {
    /// `None` for [`FilterKind::Imm`], which is a composite and not a model.
    pub fn build(kind: FilterKind, accel_std: f64, turn_rate_std: f64, ukf: &UkfConfig) -> Option<Self> {
        match kind {
            FilterKind::Kf => Some(Self::Kf(CvKalmanFilter::new(accel_std, turn_rate_std))),
            FilterKind::Ekf => Some(Self::Ekf(ExtendedKalmanFilter::new(accel_std, turn_rate_std))),
            FilterKind::Ukf => Some(Self::Ukf(UnscentedKalmanFilter::new(
                accel_std,
                turn_rate_std,
                ukf.alpha,
                ukf.beta,
                ukf.kappa,
            ))),
            FilterKind::Imm => None,
        }
    }

    pub fn kind(&self) -> FilterKind {
        match self {
            Self::Kf(_) => FilterKind::Kf,
            Self::Ekf(_) => FilterKind::Ekf,
            Self::Ukf(_) => FilterKind::Ukf,
        }
    }
}

impl KalmanFilter for ModelFilter {
    fn name(&self) -> &'static str {
        match self {
            Self::Kf(f) => f.name(),
            Self::Ekf(f) => f.name(),
            Self::Ukf(f) => f.name(),
        }
    }

    fn predict(&self, state: &StateVec, cov: &StateCov, dt: f64) -> Result<(StateVec, StateCov)> {
        match self {
            Self::Kf(f) => f.predict(state, cov, dt),
            Self::Ekf(f) => f.predict(state, cov, dt),
            Self::Ukf(f) => f.predict(state, cov, dt),
        }
    }

    fn update(&self, state: &StateVec, cov: &StateCov, obs: &Observation) -> Result<KfUpdateResult> {
        match self {
            Self::Kf(f) => f.update(state, cov, obs),
            Self::Ekf(f) => f.update(state, cov, obs),
            Self::Ukf(f) => f.update(state, cov, obs),
        }
    }
}

// ---------------------------------------------------------------------------
// Estimator
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub enum Estimator {
    Single {
        filter: ModelFilter,
        state: StateVec,
        cov: StateCov,
    },
    Imm(ImmState),
}

impl Estimator {
    pub fn new(kind: FilterKind, state: StateVec, cov: StateCov, config: &FilterConfig) -> Self {
        let single = |accel, turn| ModelFilter::build(kind, accel, turn, &config.ukf);
        let filter = match kind {
            FilterKind::Kf => single(config.cv_accel_std, 0.0),
            FilterKind::Ekf | FilterKind::Ukf => single(config.ct_accel_std, config.ct_turn_rate_std),
            FilterKind::Imm => None,
        };
        match filter {
            Some(filter) => Self::Single { filter, state, cov },
            None => Self::Imm(ImmState::from_config(state, cov, config)),
        }
    }

    pub fn kind(&self) -> FilterKind {
        match self {
            Self::Single { filter, .. } => filter.kind(),
            Self::Imm(_) => FilterKind::Imm,
        }
    }

    pub fn state(&self) -> &StateVec {
        match self {
            Self::Single { state, .. } => state,
            Self::Imm(imm) => &imm.fused_state,
        }
    }

    pub fn cov(&self) -> &StateCov {
        match self {
            Self::Single { cov, .. } => cov,
            Self::Imm(imm) => &imm.fused_cov,
        }
    }

    /// Prior `dt` seconds ahead. Non-positive `dt` returns the estimate unchanged.
    pub fn predict(&self, dt: f64) -> Result<Self> {
        if dt <= 0.0 {
            return Ok(self.clone());
        }
        match self {
            Self::Single { filter, state, cov } => {
                let (state, cov) = filter.predict(state, cov, dt)?;
                Ok(Self::Single {
                    filter: filter.clone(),
                    state,
                    cov,
                })
            }
            Self::Imm(imm) => Ok(Self::Imm(imm.predict(dt)?)),
        }
    }

    /// Posterior and NIS of the observation.
    pub fn update(&self, obs: &Observation) -> Result<(Self, f64)> {
        match self {
            Self::Single { filter, state, cov } => {
                let res = filter.update(state, cov, obs)?;
                Ok((
                    Self::Single {
                        filter: filter.clone(),
                        state: res.state,
                        cov: res.cov,
                    },
                    res.nis,
                ))
            }
            Self::Imm(imm) => {
                let (imm, nis) = imm.update(obs)?;
                Ok((Self::Imm(imm), nis))
            }
        }
    }

    /// Empty for single-model estimators.
    pub fn model_probabilities(&self) -> Vec<ModelProbability> {
        match self {
            Self::Single { .. } => Vec::new(),
            Self::Imm(imm) => imm.probabilities(),
        }
    }

    /// Most likely motion model, or the filter name for single models.
    pub fn motion_label(&self) -> String {
        match self {
            Self::Single { filter, .. } => filter.name().to_string(),
            Self::Imm(imm) => imm.dominant_model().to_string(),
        }
    }

    /// Replace a single-model estimator by the configured IMM bank, seeded
    /// from the current estimate. IMM estimators are returned unchanged.
    pub fn upgrade_to_imm(&self, config: &FilterConfig) -> Self {
        match self {
            Self::Single { state, cov, .. } => Self::Imm(ImmState::from_config(*state, *cov, config)),
            Self::Imm(_) => self.clone(),
        }
    }
}
