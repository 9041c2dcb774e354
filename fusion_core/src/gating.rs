//! Gating: decides which (track, detection) pairs are close enough to be
//! association candidates, and at what cost.
//!
//! # Kinematic cost
//! cost = haversine(track extrapolated to t_det, detection)
//!      + velocity_weight_s · |v_track − v_det|      (only when the detection
//!                                                   reports speed and course)
//!
//! A pair is a candidate when cost ≤ `gate_distance_m` and, if configured,
//! the position innovation passes the χ² test d² = νᵀ S⁻¹ ν < threshold.
//!
//! # Gate threshold table (χ² at 99%)
//! dof=2: 9.21, dof=4: 13.28

use crate::association::BipartiteGraph;
use crate::config::GatingConfig;
use crate::geo::{haversine_m, LocalFrame};
use crate::kf::{to_dyn_cov, to_dyn_vec, Observation};
use crate::types::{DMat, DVec, Detection, GeoPoint, StateCov, StateVec};
use rayon::prelude::*;
use std::collections::HashMap;

/// A Uniform Grid spatial index for 2D points (local metres).
/// Used to accelerate gating by only checking detections in nearby cells.
pub struct SpatialGrid {
    cell_size: f64,
    /// Maps cell key (ix, iy) to a list of detection indices.
    cells: HashMap<(i64, i64), Vec<usize>>,
}

impl SpatialGrid {
    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size: cell_size.max(1.0),
            cells: HashMap::new(),
        }
    }

    fn key(&self, x: f64, y: f64) -> (i64, i64) {
        (
            (x / self.cell_size).floor() as i64,
            (y / self.cell_size).floor() as i64,
        )
    }

    pub fn insert(&mut self, idx: usize, x: f64, y: f64) {
        let key = self.key(x, y);
        self.cells.entry(key).or_default().push(idx);
    }

    /// Indices in the cell containing (x, y) and its 8 neighbours, i.e.
    /// everything within at least one cell size.
    pub fn query_nearby(&self, x: f64, y: f64) -> Vec<usize> {
        let (ix, iy) = self.key(x, y);
        let mut results = Vec::new();
        for dx in -1..=1 {
            for dy in -1..=1 {
                if let Some(indices) = self.cells.get(&(ix + dx, iy + dy)) {
                    results.extend_from_slice(indices);
                }
            }
        }
        results.sort_unstable();
        results
    }
}

/// χ²(0.99, d) indexed by measurement dimension.
pub const CHI2_99: [f64; 5] = [0.0, 6.63, 9.21, 11.34, 13.28];

/// Result of a statistical gate check for one (track, detection) pair.
#[derive(Clone, Debug)]
pub struct GateResult {
    /// Mahalanobis distance squared
    pub d2: f64,
    pub passes: bool,
    pub innovation: DVec,
    pub innovation_cov: DMat,
}

/// χ² gate of `obs` against the predicted estimate `(state, cov)`.
pub fn mahalanobis_gate(
    state: &StateVec,
    cov: &StateCov,
    obs: &Observation,
    gate_threshold: f64,
) -> GateResult {
    let innovation = &obs.z - &obs.h * to_dyn_vec(state);
    let s = &obs.h * to_dyn_cov(cov) * obs.h.transpose() + &obs.r;

    let d2 = match s.clone().lu().try_inverse() {
        Some(s_inv) => innovation.dot(&(&s_inv * &innovation)),
        None => f64::INFINITY,
    };

    GateResult {
        d2,
        passes: d2 < gate_threshold,
        innovation,
        innovation_cov: s,
    }
}

// ---------------------------------------------------------------------------
// Candidate generation
// ---------------------------------------------------------------------------

/// A track's prior at the partition reference time.
#[derive(Clone, Debug)]
pub struct TrackPrior {
    pub state: StateVec,
    pub cov: StateCov,
    /// Time the prior refers to
    pub time: f64,
}

impl TrackPrior {
    /// Linear extrapolation of the position to `t`.
    pub fn position_at(&self, t: f64) -> (f64, f64) {
        let dt = t - self.time;
        (self.state[0] + self.state[2] * dt, self.state[1] + self.state[3] * dt)
    }
}

/// A detection projected into the local plane.
#[derive(Clone, Debug)]
pub struct DetectionPoint {
    pub east: f64,
    pub north: f64,
    pub geo: GeoPoint,
    pub velocity: Option<(f64, f64)>,
    pub timestamp: f64,
}

impl DetectionPoint {
    pub fn from_detection(det: &Detection, frame: &LocalFrame) -> Self {
        let (east, north) = frame.to_local(det.position());
        Self {
            east,
            north,
            geo: det.position(),
            velocity: det.velocity_en(),
            timestamp: det.timestamp,
        }
    }
}

/// Kinematic association cost of one pair (metres-equivalent).
pub fn kinematic_cost(
    prior: &TrackPrior,
    det: &DetectionPoint,
    frame: &LocalFrame,
    config: &GatingConfig,
) -> f64 {
    let (e, n) = prior.position_at(det.timestamp);
    let distance = haversine_m(frame.to_geodetic(e, n), det.geo);
    let velocity_penalty = match det.velocity {
        Some((ve, vn)) => {
            let dv = ((prior.state[2] - ve).powi(2) + (prior.state[3] - vn).powi(2)).sqrt();
            config.velocity_weight_s * dv
        }
        None => 0.0,
    };
    distance + velocity_penalty
}

/// Build the sparse candidate graph between `priors` (rows) and `detections`
/// (columns). `position_std_m` is the source's measurement noise, used only
/// by the optional χ² gate.
pub fn build_candidates(
    priors: &[TrackPrior],
    detections: &[DetectionPoint],
    frame: &LocalFrame,
    config: &GatingConfig,
    position_std_m: f64,
) -> BipartiteGraph {
    let mut graph = BipartiteGraph::new(priors.len(), detections.len());
    if priors.is_empty() || detections.is_empty() {
        return graph;
    }

    // Cell size must also cover extrapolation across the batch time span
    let (t_min, t_max) = detections.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), d| {
        (lo.min(d.timestamp), hi.max(d.timestamp))
    });
    let max_speed = priors
        .iter()
        .map(|p| p.state[2].hypot(p.state[3]))
        .fold(0.0, f64::max);
    let reach = config.gate_distance_m + max_speed * (t_max - t_min);

    let mut grid = SpatialGrid::new(reach);
    for (j, d) in detections.iter().enumerate() {
        grid.insert(j, d.east, d.north);
    }

    let edges: Vec<(usize, usize, f64)> = priors
        .par_iter()
        .enumerate()
        .flat_map_iter(|(i, prior)| {
            let (pe, pn) = prior.position_at(t_max);
            grid.query_nearby(pe, pn)
                .into_iter()
                .filter_map(|j| {
                    let det = &detections[j];
                    let cost = kinematic_cost(prior, det, frame, config);
                    if cost > config.gate_distance_m {
                        return None;
                    }
                    if let Some(threshold) = config.mahalanobis_chi2 {
                        let (e, n) = prior.position_at(det.timestamp);
                        let mut shifted = prior.state;
                        shifted[0] = e;
                        shifted[1] = n;
                        let obs = Observation::position(det.east, det.north, position_std_m);
                        if !mahalanobis_gate(&shifted, &prior.cov, &obs, threshold).passes {
                            return None;
                        }
                    }
                    Some((i, j, cost))
                })
                .collect::<Vec<_>>()
        })
        .collect();

    for (i, j, cost) in edges {
        graph.add_edge(i, j, cost);
    }
    graph
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
