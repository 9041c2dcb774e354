//! Interacting Multiple Models (IMM) filter.
//!
//! Maintains a bank of model filters (any mix of KF / EKF / UKF sharing the
//! 5-state layout) and a probability vector μ over models.
//!
//! Default bank (see [`crate::config::ImmConfig`]):
//! 1. cv-calm:  low process noise, steady transit.
//! 2. cv-agile: high process noise, speed changes in the fairway.
//! 3. ct:       coordinated turn with estimated turn rate (EKF).
//!
//! One cycle: mixing → per-model predict → per-model update → likelihood
//! re-weighting → moment-matched fusion. Every step returns a new value;
//! a failure in any model leaves the caller's `ImmState` untouched.

use crate::config::FilterConfig;
use crate::error::{FusionError, Result};
use crate::estimator::ModelFilter;
use crate::kf::{KalmanFilter, Observation};
use crate::types::{DMat, DVec, StateCov, StateVec};
use serde::{Deserialize, Serialize};

/// Probabilities never fall below this, so a model can always recover.
const PROB_FLOOR: f64 = 1e-12;

#[derive(Clone, Debug)]
pub struct ImmModel {
    pub name: String,
    pub filter: ModelFilter,
    pub prob: f64,
    pub state: StateVec,
    pub cov: StateCov,
}

/// Public view of one model's weight.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelProbability {
    pub name: String,
    pub prob: f64,
}

#[derive(Clone, Debug)]
pub struct ImmState {
    pub models: Vec<ImmModel>,
    /// `transition[i][j]` = P(model j at k | model i at k−1)
    pub transition: Vec<Vec<f64>>,
    pub fused_state: StateVec,
    pub fused_cov: StateCov,
}

impl ImmState {
    /// Seed every model of the configured bank with the same estimate.
    pub fn from_config(state: StateVec, cov: StateCov, config: &FilterConfig) -> Self {
        let models = config
            .imm
            .models
            .iter()
            .filter_map(|m| {
                ModelFilter::build(m.kind, m.accel_std, m.turn_rate_std, &config.ukf).map(|filter| {
                    ImmModel {
                        name: m.name.clone(),
                        filter,
                        prob: m.initial_prob,
                        state,
                        cov,
                    }
                })
            })
            .collect();

        let mut imm = Self {
            models,
            transition: config.imm.transition.clone(),
            fused_state: state,
            fused_cov: cov,
        };
        imm.normalise_probs();
        imm
    }

    pub fn predict(&self, dt: f64) -> Result<Self> {
        let n = self.models.len();
        let mixed = self.interaction();
        let mut next = self.clone();

        for (j, model) in next.models.iter_mut().enumerate() {
            let (x, p) = model.filter.predict(&mixed[j].0, &mixed[j].1, dt)?;
            model.state = x;
            model.cov = p;
        }

        // Predicted model probabilities c̄_j = Σ_i p_ij μ_i
        for j in 0..n {
            next.models[j].prob = (0..n)
                .map(|i| self.transition[i][j] * self.models[i].prob)
                .sum::<f64>()
                .max(PROB_FLOOR);
        }
        next.normalise_probs();
        next.fuse();
        Ok(next)
    }

    /// Returns the posterior and the probability-weighted NIS.
    pub fn update(&self, obs: &Observation) -> Result<(Self, f64)> {
        let mut next = self.clone();
        let mut log_likelihoods = Vec::with_capacity(self.models.len());
        let mut nis_per_model = Vec::with_capacity(self.models.len());

        for model in next.models.iter_mut() {
            let res = model.filter.update(&model.state, &model.cov, obs)?;
            log_likelihoods.push(gaussian_log_likelihood(&res.innovation, &res.innovation_cov)?);
            nis_per_model.push(res.nis);
            model.state = res.state;
            model.cov = res.cov;
        }

        // μ_j ∝ L_j · c̄_j, computed in log space to avoid underflow
        let max_ll = log_likelihoods
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        for (model, ll) in next.models.iter_mut().zip(&log_likelihoods) {
            model.prob = ((ll - max_ll).exp() * model.prob).max(PROB_FLOOR);
        }
        next.normalise_probs();
        next.fuse();

        let nis = next
            .models
            .iter()
            .zip(&nis_per_model)
            .map(|(m, nis)| m.prob * nis)
            .sum();
        Ok((next, nis))
    }

    /// Mixed initial conditions for every model.
    fn interaction(&self) -> Vec<(StateVec, StateCov)> {
        let n = self.models.len();
        let mut mixed = Vec::with_capacity(n);
        for j in 0..n {
            let c_bar: f64 = (0..n)
                .map(|i| self.transition[i][j] * self.models[i].prob)
                .sum::<f64>()
                .max(PROB_FLOOR);

            let mut x_mix = StateVec::zeros();
            for i in 0..n {
                let mu_ij = self.transition[i][j] * self.models[i].prob / c_bar;
                x_mix += self.models[i].state * mu_ij;
            }

            let mut p_mix = StateCov::zeros();
            for i in 0..n {
                let mu_ij = self.transition[i][j] * self.models[i].prob / c_bar;
                let dx = self.models[i].state - x_mix;
                p_mix += (self.models[i].cov + dx * dx.transpose()) * mu_ij;
            }
            mixed.push((x_mix, (p_mix + p_mix.transpose()) * 0.5));
        }
        mixed
    }

    fn fuse(&mut self) {
        let mut x_fused = StateVec::zeros();
        for m in &self.models {
            x_fused += m.state * m.prob;
        }

        let mut p_fused = StateCov::zeros();
        for m in &self.models {
            let dx = m.state - x_fused;
            p_fused += (m.cov + dx * dx.transpose()) * m.prob;
        }
        self.fused_state = x_fused;
        self.fused_cov = (p_fused + p_fused.transpose()) * 0.5;
    }

    fn normalise_probs(&mut self) {
        let sum: f64 = self.models.iter().map(|m| m.prob).sum();
        let sum = sum.max(PROB_FLOOR);
        for m in &mut self.models {
            m.prob /= sum;
        }
    }

    pub fn probabilities(&self) -> Vec<ModelProbability> {
        self.models
            .iter()
            .map(|m| ModelProbability {
                name: m.name.clone(),
                prob: m.prob,
            })
            .collect()
    }

    pub fn dominant_model(&self) -> &str {
        self.models
            .iter()
            .max_by(|a, b| a.prob.total_cmp(&b.prob))
            .map(|m| m.name.as_str())
            .unwrap_or("none")
    }
}

/// ln N(ν; 0, S)
fn gaussian_log_likelihood(innovation: &DVec, s: &DMat) -> Result<f64> {
    let k = innovation.len() as f64;
    let det = s.determinant();
    if !(det.is_finite() && det > 0.0) {
        return Err(FusionError::divergence("imm", "innovation covariance not positive definite"));
    }
    let s_inv = s
        .clone()
        .try_inverse()
        .ok_or_else(|| FusionError::divergence("imm", "innovation covariance is singular"))?;
    let d2 = (innovation.transpose() * s_inv * innovation)[(0, 0)];
    Ok(-0.5 * (d2 + det.ln() + k * (2.0 * std::f64::consts::PI).ln()))
}
