//! Bounded per-track position history and short-horizon prediction.
//!
//! A [`TrajectoryBuffer`] is a queue of sealed, immutable chunks of
//! [`CHUNK_LEN`] points behind `Arc`s plus one open tail chunk. Publishing a
//! snapshot clones the buffer: the sealed chunks are shared, so a cycle
//! copies at most one open chunk per track no matter how long the history.

use crate::config::TrajectoryConfig;
use crate::estimator::Estimator;
use crate::geo::{course_from_velocity, LocalFrame};
use crate::types::TrackId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Points per sealed chunk.
pub const CHUNK_LEN: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub lat: f64,
    pub lon: f64,
    pub speed_kn: f64,
    pub course_deg: f64,
    pub timestamp: f64,
}

impl TrajectoryPoint {
    /// Point from a local-plane state `[e, n, ve, vn, ..]` at `timestamp`.
    pub fn from_state(frame: &LocalFrame, state: &crate::types::StateVec, timestamp: f64) -> Self {
        let pos = frame.to_geodetic(state[0], state[1]);
        let (speed_kn, course_deg) = course_from_velocity(state[2], state[3]);
        Self {
            lat: pos.lat,
            lon: pos.lon,
            speed_kn,
            course_deg,
            timestamp,
        }
    }
}

/// Bounded history of one track, oldest first.
#[derive(Clone, Debug, Default)]
pub struct TrajectoryBuffer {
    sealed: VecDeque<Arc<[TrajectoryPoint]>>,
    /// Points of the front sealed chunk already evicted
    head_skip: usize,
    open: Vec<TrajectoryPoint>,
    len: usize,
}

impl TrajectoryBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append `point`, then evict from the front down to `capacity`.
    pub fn push(&mut self, point: TrajectoryPoint, capacity: usize) {
        self.open.push(point);
        self.len += 1;
        if self.open.len() == CHUNK_LEN {
            let chunk = std::mem::replace(&mut self.open, Vec::with_capacity(CHUNK_LEN));
            self.sealed.push_back(chunk.into());
        }
        self.truncate_front(capacity);
    }

    fn truncate_front(&mut self, capacity: usize) {
        while self.len > capacity {
            let excess = self.len - capacity;
            match self.sealed.front() {
                Some(front) => {
                    let available = front.len() - self.head_skip;
                    let drop = excess.min(available);
                    self.head_skip += drop;
                    self.len -= drop;
                    if self.head_skip == front.len() {
                        self.sealed.pop_front();
                        self.head_skip = 0;
                    }
                }
                None => {
                    self.open.drain(..excess);
                    self.len -= excess;
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrajectoryPoint> + '_ {
        self.sealed
            .iter()
            .enumerate()
            .flat_map(move |(i, chunk)| {
                let skip = if i == 0 { self.head_skip } else { 0 };
                chunk[skip..].iter()
            })
            .chain(self.open.iter())
    }

    /// Most recent `last_n` points (all when `None`), oldest first.
    pub fn tail(&self, last_n: Option<usize>) -> Vec<TrajectoryPoint> {
        let n = last_n.unwrap_or(self.len).min(self.len);
        self.iter().skip(self.len - n).copied().collect()
    }

    /// Number of chunks a clone shares instead of copying.
    pub fn shared_chunks(&self) -> usize {
        self.sealed.len()
    }

    /// Summary over the retained points; `None` when empty.
    pub fn stats(&self) -> Option<TrajectoryStats> {
        let first = self.iter().next()?;
        let mut last = first;
        let mut sum = 0.0;
        let mut max_speed_kn = f64::MIN;
        let mut min_speed_kn = f64::MAX;
        for p in self.iter() {
            sum += p.speed_kn;
            max_speed_kn = max_speed_kn.max(p.speed_kn);
            min_speed_kn = min_speed_kn.min(p.speed_kn);
            last = p;
        }
        Some(TrajectoryStats {
            points: self.len,
            avg_speed_kn: sum / self.len as f64,
            max_speed_kn,
            min_speed_kn,
            direction: Compass::from_course(last.course_deg),
            duration_secs: last.timestamp - first.timestamp,
        })
    }
}

/// Eight-point compass sector of a course.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compass {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
}

impl Compass {
    const SECTORS: [Compass; 8] = [
        Compass::N,
        Compass::NE,
        Compass::E,
        Compass::SE,
        Compass::S,
        Compass::SW,
        Compass::W,
        Compass::NW,
    ];

    /// Sector centred on the course: N covers [337.5, 22.5).
    pub fn from_course(course_deg: f64) -> Self {
        let normalised = course_deg.rem_euclid(360.0);
        let index = ((normalised + 22.5) / 45.0).floor() as usize % 8;
        Self::SECTORS[index]
    }
}

impl fmt::Display for Compass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Per-track history summary.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStats {
    pub points: usize,
    pub avg_speed_kn: f64,
    pub max_speed_kn: f64,
    pub min_speed_kn: f64,
    /// Sector of the most recent course
    pub direction: Compass,
    /// Time between the oldest and newest retained point
    pub duration_secs: f64,
}

#[derive(Debug)]
pub struct TrajectoryStore {
    capacity: usize,
    retired_capacity: usize,
    live: HashMap<TrackId, TrajectoryBuffer>,
    retired: HashMap<TrackId, TrajectoryBuffer>,
    /// Retirement order, oldest first
    retired_order: VecDeque<TrackId>,
}

impl TrajectoryStore {
    pub fn new(config: &TrajectoryConfig) -> Self {
        Self {
            capacity: config.capacity.max(1),
            retired_capacity: config.retired_capacity,
            live: HashMap::new(),
            retired: HashMap::new(),
            retired_order: VecDeque::new(),
        }
    }

    /// Apply new bounds; existing buffers are trimmed on their next append.
    pub fn set_limits(&mut self, config: &TrajectoryConfig) {
        self.capacity = config.capacity.max(1);
        self.retired_capacity = config.retired_capacity;
        self.evict_retired();
    }

    /// Append one point, evicting the oldest beyond capacity.
    pub fn record(&mut self, id: TrackId, point: TrajectoryPoint) {
        self.live.entry(id).or_default().push(point, self.capacity);
    }

    /// Move a deleted track's history to the bounded retired set.
    pub fn retire(&mut self, id: TrackId) {
        if let Some(buf) = self.live.remove(&id) {
            self.retired.insert(id, buf);
            self.retired_order.push_back(id);
            self.evict_retired();
        }
    }

    fn evict_retired(&mut self) {
        while self.retired_order.len() > self.retired_capacity {
            if let Some(old) = self.retired_order.pop_front() {
                self.retired.remove(&old);
            }
        }
    }

    pub fn get(&self, id: TrackId) -> Option<&TrajectoryBuffer> {
        self.live.get(&id).or_else(|| self.retired.get(&id))
    }

    pub fn len(&self, id: TrackId) -> usize {
        self.get(id).map_or(0, |b| b.len())
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty() && self.retired.is_empty()
    }

    /// All points, or the most recent `last_n`, oldest first.
    pub fn query(&self, id: TrackId, last_n: Option<usize>) -> Option<Vec<TrajectoryPoint>> {
        self.get(id).map(|buf| buf.tail(last_n))
    }

    /// Cheap clones of every live and retired buffer for a snapshot.
    pub fn share(&self) -> HashMap<TrackId, TrajectoryBuffer> {
        self.live
            .iter()
            .chain(self.retired.iter())
            .map(|(id, buf)| (*id, buf.clone()))
            .collect()
    }
}

/// Project an estimate forward in `step_secs` increments up to
/// `horizon_secs`. The estimator is not modified; projection stops early if
/// a prediction is numerically rejected.
pub fn predict_path(
    estimator: &Estimator,
    state_time: f64,
    horizon_secs: f64,
    step_secs: f64,
    frame: &LocalFrame,
) -> Vec<TrajectoryPoint> {
    let mut path = Vec::new();
    if step_secs <= 0.0 {
        return path;
    }
    let mut current = estimator.clone();
    let mut elapsed = 0.0;
    while elapsed + step_secs <= horizon_secs + 1e-9 {
        current = match current.predict(step_secs) {
            Ok(next) => next,
            Err(_) => break,
        };
        elapsed += step_secs;
        path.push(TrajectoryPoint::from_state(frame, current.state(), state_time + elapsed));
    }
    path
}
