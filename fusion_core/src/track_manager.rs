//! Track lifecycle management: birth, confirmation, coasting, deletion.
//!
//! # Track Management Policy
//! - **Birth**: each unmatched detection spawns a tentative track (one hit).
//! - **Confirmation**: `confirm_hits` consecutive hits. A miss while
//!   tentative resets the run.
//! - **Coasting**: a confirmed track that misses keeps predicting; the next
//!   hit restores it to confirmed.
//! - **Deletion**: tentative after `tentative_miss_limit` misses are
//!   exceeded; coasting after `coast_miss_limit` misses are exceeded or
//!   `max_coast_secs` elapse since the last update.
//! - **Divergence**: counts as a miss; a tentative track is deleted at once,
//!   an established one after `max_divergence_cycles` in a row.

use crate::config::{FilterConfig, LifecycleConfig, SourceConfig};
use crate::estimator::Estimator;
use crate::geo::LocalFrame;
use crate::track::{Track, TrackStatus};
use crate::types::{Detection, StateCov, StateVec, TrackId};
use tracing::debug;

/// Monotonic id source owned by one engine instance. Ids start at 1 and
/// are never reused.
#[derive(Clone, Debug)]
pub struct IdGenerator {
    next: u64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl IdGenerator {
    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Peek at the next id without consuming it.
    pub fn peek(&self) -> u64 {
        self.next
    }
}

/// Status change produced by one lifecycle event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Confirmed,
    Coasting,
    Recovered,
    Deleted,
}

/// Creates tracks and applies lifecycle rules.
#[derive(Debug, Default)]
pub struct TrackManager {
    ids: IdGenerator,
}

impl TrackManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new tentative track from an unmatched detection.
    pub fn birth_track(
        &mut self,
        det: &Detection,
        frame: &LocalFrame,
        source: &SourceConfig,
        filters: &FilterConfig,
    ) -> Track {
        let id = TrackId(self.ids.next_id());
        let (east, north) = frame.to_local(det.position());

        let (ve, vn, vel_std) = match det.velocity_en() {
            Some((ve, vn)) => (ve, vn, source.velocity_std_ms.max(0.5)),
            None => (0.0, 0.0, source.init_vel_std_ms),
        };
        let state = StateVec::new(east, north, ve, vn, 0.0);

        let ps = source.init_pos_std_m * source.init_pos_std_m;
        let vs = vel_std * vel_std;
        let ws = source.init_turn_rate_std * source.init_turn_rate_std;
        let cov = StateCov::from_diagonal(&StateVec::new(ps, ps, vs, vs, ws));

        let mut track = Track::new(id, det, Estimator::new(source.filter, state, cov, filters));
        if track.hits >= source.lifecycle.confirm_hits {
            track.status = TrackStatus::Confirmed;
        }
        debug!(track = %id, source = %det.source_type, sensor_id = %det.sensor_id, "track born");
        track
    }

    /// Call after a track received an update (hit).
    pub fn register_hit(config: &LifecycleConfig, track: &mut Track) -> Option<Transition> {
        track.misses = 0;
        track.divergences = 0;
        track.hits = track.hits.saturating_add(1);
        track.total_hits = track.total_hits.saturating_add(1);
        match track.status {
            TrackStatus::Tentative if track.hits >= config.confirm_hits => {
                track.status = TrackStatus::Confirmed;
                Some(Transition::Confirmed)
            }
            TrackStatus::Coasting => {
                track.status = TrackStatus::Confirmed;
                Some(Transition::Recovered)
            }
            _ => None,
        }
    }

    /// Call after a track received no update (miss). `now` is the cycle time.
    pub fn register_miss(config: &LifecycleConfig, track: &mut Track, now: f64) -> Option<Transition> {
        track.misses = track.misses.saturating_add(1);
        track.hits = 0;
        match track.status {
            TrackStatus::Tentative => {
                if track.misses > config.tentative_miss_limit {
                    track.status = TrackStatus::Deleted;
                    return Some(Transition::Deleted);
                }
                None
            }
            TrackStatus::Confirmed | TrackStatus::Coasting => {
                let was_confirmed = track.status == TrackStatus::Confirmed;
                let coasted_too_long = config
                    .max_coast_secs
                    .is_some_and(|limit| now - track.last_update_time > limit);
                if track.misses > config.coast_miss_limit || coasted_too_long {
                    track.status = TrackStatus::Deleted;
                    Some(Transition::Deleted)
                } else if was_confirmed {
                    track.status = TrackStatus::Coasting;
                    Some(Transition::Coasting)
                } else {
                    None
                }
            }
            TrackStatus::Deleted => None,
        }
    }

    /// Call when a track's predict or update was numerically rejected.
    pub fn register_divergence(
        config: &LifecycleConfig,
        track: &mut Track,
        now: f64,
    ) -> Option<Transition> {
        track.divergences = track.divergences.saturating_add(1);
        if track.status == TrackStatus::Tentative {
            track.status = TrackStatus::Deleted;
            return Some(Transition::Deleted);
        }
        let transition = Self::register_miss(config, track, now);
        if track.status != TrackStatus::Deleted && track.divergences >= config.max_divergence_cycles {
            track.status = TrackStatus::Deleted;
            return Some(Transition::Deleted);
        }
        transition
    }

    /// Remove all deleted tracks, returning them (order preserved).
    pub fn prune_deleted(tracks: &mut Vec<Track>) -> Vec<Track> {
        let (deleted, live): (Vec<Track>, Vec<Track>) = std::mem::take(tracks)
            .into_iter()
            .partition(|t| t.status == TrackStatus::Deleted);
        *tracks = live;
        deleted
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
