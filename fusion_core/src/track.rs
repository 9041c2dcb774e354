//! Track: one sensor's hypothesis about one vessel, plus its public views.

use crate::config::FilterKind;
use crate::estimator::Estimator;
use crate::geo::{course_from_velocity, LocalFrame};
use crate::imm::ModelProbability;
use crate::trajectory::TrajectoryPoint;
use crate::types::{Detection, GeoPoint, SourceType, StateCov, StateVec, TrackId};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    /// Not yet confirmed, may be clutter
    Tentative,
    Confirmed,
    /// Confirmed but missed its last update; predicting only
    Coasting,
    /// Terminal
    Deleted,
}

impl TrackStatus {
    /// Confirmed or coasting: eligible for fusion and alerting.
    pub fn is_established(&self) -> bool {
        matches!(self, TrackStatus::Confirmed | TrackStatus::Coasting)
    }
}

#[derive(Clone, Debug)]
pub struct Track {
    pub id: TrackId,
    pub source: SourceType,
    /// Sensor-native id of the last associated detection (MMSI for AIS)
    pub sensor_id: String,
    pub name: Option<String>,
    pub heading_deg: Option<f64>,
    pub estimator: Estimator,
    pub status: TrackStatus,
    /// Consecutive associated detections (birth counts as the first)
    pub hits: u32,
    /// Consecutive cycles without an association
    pub misses: u32,
    pub total_hits: u32,
    /// Consecutive cycles whose predict/update was numerically rejected
    pub divergences: u32,
    pub born_at: f64,
    /// Timestamp of the last associated detection
    pub last_update_time: f64,
    /// Time the current estimate refers to
    pub state_time: f64,
    /// NIS of the last update
    pub last_nis: Option<f64>,
}

impl Track {
    /// A new tentative track seeded by `det`.
    pub fn new(id: TrackId, det: &Detection, estimator: Estimator) -> Self {
        Self {
            id,
            source: det.source_type,
            sensor_id: det.sensor_id.clone(),
            name: det.name.clone(),
            heading_deg: det.heading_deg,
            estimator,
            status: TrackStatus::Tentative,
            hits: 1,
            misses: 0,
            total_hits: 1,
            divergences: 0,
            born_at: det.timestamp,
            last_update_time: det.timestamp,
            state_time: det.timestamp,
            last_nis: None,
        }
    }

    pub fn state(&self) -> &StateVec {
        self.estimator.state()
    }

    pub fn cov(&self) -> &StateCov {
        self.estimator.cov()
    }

    /// Position linearly extrapolated to `t`.
    pub fn position_at(&self, t: f64) -> (f64, f64) {
        let x = self.state();
        let dt = t - self.state_time;
        (x[0] + x[2] * dt, x[1] + x[3] * dt)
    }

    pub fn velocity(&self) -> (f64, f64) {
        let x = self.state();
        (x[2], x[3])
    }

    /// (speed knots, course degrees true)
    pub fn speed_course(&self) -> (f64, f64) {
        let (ve, vn) = self.velocity();
        course_from_velocity(ve, vn)
    }

    /// Carry identity fields from the detection that just updated the track.
    pub fn absorb_identity(&mut self, det: &Detection) {
        self.sensor_id = det.sensor_id.clone();
        if det.name.is_some() {
            self.name = det.name.clone();
        }
        if det.heading_deg.is_some() {
            self.heading_deg = det.heading_deg;
        }
    }

    pub fn view(&self, frame: &LocalFrame) -> TrackView {
        let x = self.state();
        let pos = frame.to_geodetic(x[0], x[1]);
        let (speed_kn, course_deg) = self.speed_course();
        TrackView {
            track_id: self.id,
            source_type: self.source,
            sensor_id: self.sensor_id.clone(),
            name: self.name.clone(),
            status: self.status,
            lat: pos.lat,
            lon: pos.lon,
            speed_kn,
            course_deg,
            heading_deg: self.heading_deg,
            miss_count: self.misses,
            hits: self.hits,
            total_hits: self.total_hits,
            last_update_time: self.last_update_time,
            state_time: self.state_time,
            filter: self.estimator.kind(),
            motion: self.estimator.motion_label(),
        }
    }

    /// Full debug view. `lookahead_secs` sets the horizon of the single
    /// predicted position; the caller supplies trajectory data.
    pub fn detail(
        &self,
        frame: &LocalFrame,
        lookahead_secs: f64,
        trajectory_points: usize,
        predicted_path: Vec<TrajectoryPoint>,
    ) -> TrackDetail {
        let x = *self.state();
        let p = self.cov();
        let predicted_state = self
            .estimator
            .predict(lookahead_secs)
            .map(|e| *e.state())
            .unwrap_or(x);
        TrackDetail {
            view: self.view(frame),
            state: [x[0], x[1], x[2], x[3], x[4]],
            cov_diagonal: [p[(0, 0)], p[(1, 1)], p[(2, 2)], p[(3, 3)], p[(4, 4)]],
            model_probabilities: self.estimator.model_probabilities(),
            estimated: frame.to_geodetic(x[0], x[1]),
            predicted: frame.to_geodetic(predicted_state[0], predicted_state[1]),
            predicted_at: self.state_time + lookahead_secs,
            nis: self.last_nis,
            divergences: self.divergences,
            born_at: self.born_at,
            trajectory_points,
            predicted_path,
        }
    }
}

/// Read-only per-track summary published in every snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackView {
    pub track_id: TrackId,
    pub source_type: SourceType,
    pub sensor_id: String,
    pub name: Option<String>,
    pub status: TrackStatus,
    pub lat: f64,
    pub lon: f64,
    pub speed_kn: f64,
    pub course_deg: f64,
    pub heading_deg: Option<f64>,
    pub miss_count: u32,
    pub hits: u32,
    pub total_hits: u32,
    pub last_update_time: f64,
    pub state_time: f64,
    pub filter: FilterKind,
    /// Dominant IMM model, or the filter name
    pub motion: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackDetail {
    #[serde(flatten)]
    pub view: TrackView,
    /// [east, north, v_east, v_north, turn_rate] in the local plane
    pub state: [f64; 5],
    pub cov_diagonal: [f64; 5],
    pub model_probabilities: Vec<ModelProbability>,
    pub estimated: GeoPoint,
    pub predicted: GeoPoint,
    pub predicted_at: f64,
    pub nis: Option<f64>,
    pub divergences: u32,
    pub born_at: f64,
    pub trajectory_points: usize,
    pub predicted_path: Vec<TrajectoryPoint>,
}
