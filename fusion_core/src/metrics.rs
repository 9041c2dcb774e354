//! Scenario evaluation metrics: position/velocity RMSE, precision/recall and
//! fused-id switches of published targets against simulator ground truth.

use crate::association::{solve, BipartiteGraph};
use crate::config::AssignmentStrategy;
use crate::fuser::FusedTarget;
use crate::geo::haversine_m;
use crate::types::{FusedId, GeoPoint};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// True state of one simulated vessel at a given time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroundTruth {
    pub vessel_id: u64,
    pub time: f64,
    pub position: GeoPoint,
    /// [v_east, v_north] in m/s
    pub velocity_ms: [f64; 2],
}

/// Running totals over every evaluated frame of a scenario.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FusionMetrics {
    pub frames: u64,
    /// Vessel/target pairs matched within the radius
    pub true_positives: u64,
    /// Published targets with no vessel nearby
    pub false_positives: u64,
    /// Vessels with no published target nearby
    pub false_negatives: u64,
    /// Matches backed by both radar and AIS
    pub fused_matches: u64,
    /// A vessel matched to a different fused id than in its previous match
    pub id_switches: u64,
    pos_err_sq: f64,
    vel_err_sq: f64,
    #[serde(skip)]
    last_id: HashMap<u64, FusedId>,
}

/// `num / den`, or `empty` when nothing was counted.
fn ratio(num: f64, den: u64, empty: f64) -> f64 {
    if den == 0 {
        empty
    } else {
        num / den as f64
    }
}

impl FusionMetrics {
    /// Root-mean-square position error of matched pairs (metres).
    pub fn rmse_position(&self) -> f64 {
        ratio(self.pos_err_sq, self.true_positives, 0.0).sqrt()
    }

    /// Root-mean-square velocity error of matched pairs (m/s).
    pub fn rmse_velocity(&self) -> f64 {
        ratio(self.vel_err_sq, self.true_positives, 0.0).sqrt()
    }

    pub fn precision(&self) -> f64 {
        let tp = self.true_positives;
        ratio(tp as f64, tp + self.false_positives, 1.0)
    }

    pub fn recall(&self) -> f64 {
        let tp = self.true_positives;
        ratio(tp as f64, tp + self.false_negatives, 1.0)
    }

    /// Share of matches seen by both sensors.
    pub fn fused_ratio(&self) -> f64 {
        ratio(self.fused_matches as f64, self.true_positives, 0.0)
    }

    /// Accumulate one frame: truths and targets are matched one-to-one by
    /// minimum total distance, pairs further than `match_radius_m` apart
    /// never match.
    pub fn accumulate(&mut self, targets: &[FusedTarget], truths: &[GroundTruth], match_radius_m: f64) {
        self.frames += 1;

        let mut graph = BipartiteGraph::new(truths.len(), targets.len());
        for (i, gt) in truths.iter().enumerate() {
            for (j, t) in targets.iter().enumerate() {
                let d = haversine_m(gt.position, GeoPoint::new(t.lat, t.lon));
                if d <= match_radius_m {
                    graph.add_edge(i, j, d);
                }
            }
        }
        let assignment = solve(&graph, AssignmentStrategy::Optimal);

        for &(i, j) in &assignment.pairs {
            let (gt, t) = (&truths[i], &targets[j]);
            let d = haversine_m(gt.position, GeoPoint::new(t.lat, t.lon));
            let dve = t.velocity_ms[0] - gt.velocity_ms[0];
            let dvn = t.velocity_ms[1] - gt.velocity_ms[1];
            self.pos_err_sq += d * d;
            self.vel_err_sq += dve * dve + dvn * dvn;
            self.true_positives += 1;
            if t.has_radar && t.has_ais {
                self.fused_matches += 1;
            }
            if let Some(prev) = self.last_id.insert(gt.vessel_id, t.fused_id) {
                if prev != t.fused_id {
                    self.id_switches += 1;
                }
            }
        }
        self.false_positives += assignment.unmatched_cols.len() as u64;
        self.false_negatives += assignment.unmatched_rows.len() as u64;
    }
}
