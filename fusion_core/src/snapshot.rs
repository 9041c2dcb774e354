//! Immutable, versioned picture of the engine state after one cycle.
//!
//! Each cycle builds a new [`Snapshot`] and swaps it into the
//! [`SnapshotPublisher`]. Readers hold an `Arc<Snapshot>` and keep whichever
//! generation they loaded, no matter how many cycles run meanwhile.

use crate::alert::Alert;
use crate::config::TrajectoryConfig;
use crate::error::{FusionError, Result};
use crate::fuser::{FusedTarget, FusionStats};
use crate::geo::LocalFrame;
use crate::track::{Track, TrackDetail, TrackView};
use crate::trajectory::{predict_path, TrajectoryBuffer, TrajectoryPoint, TrajectoryStats};
use crate::types::TrackId;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Counters for one fusion cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CycleStats {
    /// Detections consumed this cycle (both sources)
    pub detections: usize,
    pub births: usize,
    pub confirmations: usize,
    pub deletions: usize,
    /// Tracks whose predict/update was numerically rejected
    pub divergences: usize,
    /// Detections with several equally good track candidates
    pub ambiguities: usize,
    pub newly_fused: usize,
    pub defused: usize,
    /// Alerts emitted after cooldown
    pub alerts: usize,
    /// Detections rejected at ingestion since the previous cycle
    pub malformed: u64,
    /// Batches dropped on queue overflow since the previous cycle
    pub dropped_batches: u64,
    /// Wall-clock processing time
    pub duration_us: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    /// Increases by one per published cycle; 0 is the empty startup picture
    pub generation: u64,
    /// Cycle time the picture refers to
    pub timestamp: f64,
    pub radar: Vec<TrackView>,
    pub ais: Vec<TrackView>,
    pub fused: Vec<FusedTarget>,
    pub stats: FusionStats,
    /// Alerts raised by this cycle
    pub alerts: Vec<Alert>,
    pub cycle: CycleStats,
    /// Deadline exceeded: fusion ran maintenance only and alerts were skipped
    pub partial: bool,
    #[serde(skip)]
    frame: LocalFrame,
    #[serde(skip)]
    lookahead_secs: f64,
    #[serde(skip)]
    prediction: (f64, f64),
    #[serde(skip)]
    tracks: HashMap<TrackId, Track>,
    #[serde(skip)]
    trajectories: HashMap<TrackId, TrajectoryBuffer>,
}

/// Everything a cycle hands over to build its snapshot.
pub struct SnapshotParts {
    pub generation: u64,
    pub timestamp: f64,
    pub fused: Vec<FusedTarget>,
    pub stats: FusionStats,
    pub alerts: Vec<Alert>,
    pub cycle: CycleStats,
    pub partial: bool,
    pub frame: LocalFrame,
    pub lookahead_secs: f64,
    pub trajectory: TrajectoryConfig,
    pub trajectories: HashMap<TrackId, TrajectoryBuffer>,
}

impl Snapshot {
    /// Picture published before the first cycle.
    pub fn empty(frame: LocalFrame) -> Self {
        Self {
            generation: 0,
            timestamp: 0.0,
            radar: Vec::new(),
            ais: Vec::new(),
            fused: Vec::new(),
            stats: FusionStats::default(),
            alerts: Vec::new(),
            cycle: CycleStats::default(),
            partial: false,
            frame,
            lookahead_secs: 0.0,
            prediction: (0.0, 0.0),
            tracks: HashMap::new(),
            trajectories: HashMap::new(),
        }
    }

    pub fn build(parts: SnapshotParts, radar: &[Track], ais: &[Track]) -> Self {
        let frame = parts.frame;
        Self {
            generation: parts.generation,
            timestamp: parts.timestamp,
            radar: radar.iter().map(|t| t.view(&frame)).collect(),
            ais: ais.iter().map(|t| t.view(&frame)).collect(),
            fused: parts.fused,
            stats: parts.stats,
            alerts: parts.alerts,
            cycle: parts.cycle,
            partial: parts.partial,
            frame,
            lookahead_secs: parts.lookahead_secs,
            prediction: (
                parts.trajectory.prediction_horizon_secs,
                parts.trajectory.prediction_step_secs,
            ),
            tracks: radar
                .iter()
                .chain(ais.iter())
                .map(|t| (t.id, t.clone()))
                .collect(),
            trajectories: parts.trajectories,
        }
    }

    /// Debug view of a live track.
    pub fn track_detail(&self, id: TrackId) -> Result<TrackDetail> {
        let track = self.tracks.get(&id).ok_or(FusionError::UnknownTargetId(id))?;
        let (horizon, step) = self.prediction;
        let path = predict_path(&track.estimator, track.state_time, horizon, step, &self.frame);
        let points = self.trajectories.get(&id).map_or(0, |b| b.len());
        Ok(track.detail(&self.frame, self.lookahead_secs, points, path))
    }

    /// History of a live or recently deleted track, oldest first.
    pub fn trajectory(&self, id: TrackId, last_n: Option<usize>) -> Result<Vec<TrajectoryPoint>> {
        self.trajectories
            .get(&id)
            .map(|buf| buf.tail(last_n))
            .ok_or(FusionError::UnknownTargetId(id))
    }

    /// Speed, duration and heading summary of a live or recently deleted
    /// track's history.
    pub fn trajectory_stats(&self, id: TrackId) -> Result<TrajectoryStats> {
        self.trajectories
            .get(&id)
            .and_then(TrajectoryBuffer::stats)
            .ok_or(FusionError::UnknownTargetId(id))
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

/// Single-writer, many-reader slot holding the latest snapshot.
#[derive(Debug)]
pub struct SnapshotPublisher {
    current: RwLock<Arc<Snapshot>>,
}

impl SnapshotPublisher {
    pub fn new(initial: Snapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// The write lock is held only for the pointer swap.
    pub fn publish(&self, snapshot: Snapshot) {
        let next = Arc::new(snapshot);
        *self.current.write() = next;
    }

    pub fn load(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.current.read())
    }
}
