//! Cross-sensor fusion: pairs established radar tracks with established AIS
//! tracks believed to be the same vessel and publishes one [`FusedTarget`]
//! per vessel.
//!
//! # Identity rules
//! - `fused_id`s come from a generator owned by the fuser and are never reused.
//! - Fusing two single-source targets keeps the lower (older) id.
//! - Defusing keeps the id on the radar side; the AIS side gets a new id.
//! - A pair whose backing track is deleted degrades to a single-source
//!   target with the same id.
//!
//! # Kinematic compatibility
//! Speed and course tolerances widen with the velocity uncertainty of both
//! estimates (`velocity_sigma_gate` standard deviations), so a radar track
//! initiated from position-only plots can pair with a moving AIS vessel
//! before its velocity has converged.
//!
//! # Hysteresis
//! A fused pair is re-checked every full cycle; it is split only after
//! `defuse_after` consecutive incompatible cycles.

use crate::association::{self, BipartiteGraph};
use crate::config::FusionConfig;
use crate::geo::{angle_diff_deg, course_from_velocity, haversine_m, LocalFrame};
use crate::track::{Track, TrackStatus};
use crate::track_manager::IdGenerator;
use crate::types::{FusedId, TargetSource, TrackId, KNOTS_TO_MS};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Confidence published per provenance.
pub const CONFIDENCE_FUSED: f64 = 0.9;
pub const CONFIDENCE_AIS_ONLY: f64 = 0.8;
pub const CONFIDENCE_RADAR_ONLY: f64 = 0.7;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FusedTarget {
    pub fused_id: FusedId,
    pub source_type: TargetSource,
    pub has_radar: bool,
    pub has_ais: bool,
    pub radar_track: Option<TrackId>,
    pub ais_track: Option<TrackId>,
    pub lat: f64,
    pub lon: f64,
    pub speed_kn: f64,
    pub course_deg: f64,
    pub heading_deg: Option<f64>,
    /// [v_east, v_north] in m/s
    pub velocity_ms: [f64; 2],
    pub mmsi: Option<String>,
    pub name: Option<String>,
    pub confidence: f64,
    /// Confirmed if any backing track is confirmed, else coasting
    pub status: TrackStatus,
    pub timestamp: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionStats {
    /// Established radar tracks
    pub radar_targets: usize,
    /// Established AIS tracks
    pub ais_targets: usize,
    /// Published fused targets (all provenances)
    pub fused_targets: usize,
    pub radar_only: usize,
    pub ais_only: usize,
    /// Targets backed by both sensors
    pub fused_count: usize,
}

#[derive(Clone, Debug, Default)]
pub struct FusionOutput {
    pub targets: Vec<FusedTarget>,
    pub stats: FusionStats,
    pub newly_fused: usize,
    pub defused: usize,
}

#[derive(Clone, Debug)]
struct FusedEntry {
    radar: Option<TrackId>,
    ais: Option<TrackId>,
    /// Consecutive incompatible cycles while paired
    fail_streak: u32,
}

#[derive(Debug, Default)]
pub struct Fuser {
    entries: BTreeMap<FusedId, FusedEntry>,
    by_radar: HashMap<TrackId, FusedId>,
    by_ais: HashMap<TrackId, FusedId>,
    ids: IdGenerator,
}

impl Fuser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fused id currently backed by `track`, if any.
    pub fn fused_id_of(&self, track: TrackId) -> Option<FusedId> {
        self.by_radar
            .get(&track)
            .or_else(|| self.by_ais.get(&track))
            .copied()
    }

    /// Position distance in metres if the two tracks are kinematically
    /// compatible at time `now`, `None` otherwise.
    pub fn compatibility(
        radar: &Track,
        ais: &Track,
        now: f64,
        frame: &LocalFrame,
        config: &FusionConfig,
    ) -> Option<f64> {
        let (re, rn) = radar.position_at(now);
        let (ae, an) = ais.position_at(now);
        let distance = haversine_m(frame.to_geodetic(re, rn), frame.to_geodetic(ae, an));
        if distance >= config.max_distance_m {
            return None;
        }

        let (r_speed, r_course) = radar.speed_course();
        let (a_speed, a_course) = ais.speed_course();
        let (r_sigma, a_sigma) = (speed_sigma_kn(radar), speed_sigma_kn(ais));
        let gate = config.velocity_sigma_gate;

        let speed_slack = gate * r_sigma.hypot(a_sigma);
        if (r_speed - a_speed).abs() >= config.max_speed_diff_kn + speed_slack {
            return None;
        }
        let min_speed = config.min_speed_for_course_kn;
        if r_speed > min_speed && a_speed > min_speed {
            // Course std of each estimate is roughly speed std over speed
            let course_sigma = (r_sigma / r_speed).hypot(a_sigma / a_speed).to_degrees();
            let tolerance = config.max_course_diff_deg + gate * course_sigma;
            if tolerance < 180.0 && angle_diff_deg(r_course, a_course) >= tolerance {
                return None;
            }
        }
        Some(distance)
    }

    /// Run one fusion pass over the established tracks. With `full == false`
    /// only bookkeeping runs: stale links are dropped and new single-source
    /// targets surfaced, but no pairing or hysteresis is evaluated.
    pub fn fuse(
        &mut self,
        radar_tracks: &[Track],
        ais_tracks: &[Track],
        now: f64,
        frame: &LocalFrame,
        config: &FusionConfig,
        full: bool,
    ) -> FusionOutput {
        let radar: BTreeMap<TrackId, &Track> = radar_tracks
            .iter()
            .filter(|t| t.status.is_established())
            .map(|t| (t.id, t))
            .collect();
        let ais: BTreeMap<TrackId, &Track> = ais_tracks
            .iter()
            .filter(|t| t.status.is_established())
            .map(|t| (t.id, t))
            .collect();

        self.drop_stale_links(&radar, &ais);

        let mut defused = 0;
        let mut newly_fused = 0;
        if full {
            defused = self.check_pairs(&radar, &ais, now, frame, config);
            newly_fused = self.pair_new(&radar, &ais, now, frame, config);
        }

        // Surface every established track that has no target yet
        for id in radar.keys() {
            if !self.by_radar.contains_key(id) {
                self.insert_entry(Some(*id), None);
            }
        }
        for id in ais.keys() {
            if !self.by_ais.contains_key(id) {
                self.insert_entry(None, Some(*id));
            }
        }

        let targets: Vec<FusedTarget> = self
            .entries
            .iter()
            .filter_map(|(fid, e)| {
                let r = e.radar.and_then(|id| radar.get(&id).copied());
                let a = e.ais.and_then(|id| ais.get(&id).copied());
                build_target(*fid, r, a, now, frame)
            })
            .collect();

        let mut stats = FusionStats {
            radar_targets: radar.len(),
            ais_targets: ais.len(),
            fused_targets: targets.len(),
            ..FusionStats::default()
        };
        for t in &targets {
            match t.source_type {
                TargetSource::Fused => stats.fused_count += 1,
                TargetSource::Radar => stats.radar_only += 1,
                TargetSource::Ais => stats.ais_only += 1,
            }
        }

        FusionOutput {
            targets,
            stats,
            newly_fused,
            defused,
        }
    }

    fn insert_entry(&mut self, radar: Option<TrackId>, ais: Option<TrackId>) -> FusedId {
        let fid = FusedId(self.ids.next_id());
        if let Some(r) = radar {
            self.by_radar.insert(r, fid);
        }
        if let Some(a) = ais {
            self.by_ais.insert(a, fid);
        }
        self.entries.insert(
            fid,
            FusedEntry {
                radar,
                ais,
                fail_streak: 0,
            },
        );
        fid
    }

    /// Unlink tracks that are no longer established; drop empty entries.
    fn drop_stale_links(
        &mut self,
        radar: &BTreeMap<TrackId, &Track>,
        ais: &BTreeMap<TrackId, &Track>,
    ) {
        let by_radar = &mut self.by_radar;
        let by_ais = &mut self.by_ais;
        self.entries.retain(|_, e| {
            if let Some(r) = e.radar.filter(|r| !radar.contains_key(r)) {
                by_radar.remove(&r);
                e.radar = None;
                e.fail_streak = 0;
            }
            if let Some(a) = e.ais.filter(|a| !ais.contains_key(a)) {
                by_ais.remove(&a);
                e.ais = None;
                e.fail_streak = 0;
            }
            e.radar.is_some() || e.ais.is_some()
        });
    }

    /// Hysteresis over existing pairs; returns the number of splits.
    fn check_pairs(
        &mut self,
        radar: &BTreeMap<TrackId, &Track>,
        ais: &BTreeMap<TrackId, &Track>,
        now: f64,
        frame: &LocalFrame,
        config: &FusionConfig,
    ) -> usize {
        let mut to_split = Vec::new();
        for (fid, e) in self.entries.iter_mut() {
            let (Some(r), Some(a)) = (e.radar, e.ais) else {
                continue;
            };
            let (Some(rt), Some(at)) = (radar.get(&r), ais.get(&a)) else {
                continue;
            };
            if Self::compatibility(rt, at, now, frame, config).is_some() {
                e.fail_streak = 0;
            } else {
                e.fail_streak += 1;
                if e.fail_streak >= config.defuse_after {
                    to_split.push((*fid, a));
                }
            }
        }

        for (fid, a) in &to_split {
            if let Some(e) = self.entries.get_mut(fid) {
                e.ais = None;
                e.fail_streak = 0;
            }
            self.by_ais.remove(a);
            let new_id = self.insert_entry(None, Some(*a));
            debug!(fused = %fid, ais_track = %a, new_fused = %new_id, "defused incompatible pair");
        }
        to_split.len()
    }

    /// Pair confirmed single-source tracks; returns the number of new pairs.
    fn pair_new(
        &mut self,
        radar: &BTreeMap<TrackId, &Track>,
        ais: &BTreeMap<TrackId, &Track>,
        now: f64,
        frame: &LocalFrame,
        config: &FusionConfig,
    ) -> usize {
        let is_paired = |fid: Option<&FusedId>, entries: &BTreeMap<FusedId, FusedEntry>| {
            fid.and_then(|f| entries.get(f))
                .is_some_and(|e| e.radar.is_some() && e.ais.is_some())
        };
        let radar_free: Vec<&Track> = radar
            .values()
            .filter(|t| t.status == TrackStatus::Confirmed)
            .filter(|t| !is_paired(self.by_radar.get(&t.id), &self.entries))
            .copied()
            .collect();
        let ais_free: Vec<&Track> = ais
            .values()
            .filter(|t| t.status == TrackStatus::Confirmed)
            .filter(|t| !is_paired(self.by_ais.get(&t.id), &self.entries))
            .copied()
            .collect();
        if radar_free.is_empty() || ais_free.is_empty() {
            return 0;
        }

        let mut graph = BipartiteGraph::new(radar_free.len(), ais_free.len());
        for (i, rt) in radar_free.iter().enumerate() {
            for (j, at) in ais_free.iter().enumerate() {
                if let Some(d) = Self::compatibility(rt, at, now, frame, config) {
                    graph.add_edge(i, j, d);
                }
            }
        }
        let assignment = association::solve(&graph, config.strategy);

        for &(i, j) in &assignment.pairs {
            let (r, a) = (radar_free[i].id, ais_free[j].id);
            let existing: Vec<FusedId> = [self.by_radar.get(&r), self.by_ais.get(&a)]
                .into_iter()
                .flatten()
                .copied()
                .collect();
            let survivor = match existing.iter().min() {
                Some(&fid) => fid,
                None => FusedId(self.ids.next_id()),
            };
            for fid in existing.iter().filter(|f| **f != survivor) {
                self.entries.remove(fid);
            }
            self.entries.insert(
                survivor,
                FusedEntry {
                    radar: Some(r),
                    ais: Some(a),
                    fail_streak: 0,
                },
            );
            self.by_radar.insert(r, survivor);
            self.by_ais.insert(a, survivor);
            debug!(fused = %survivor, radar_track = %r, ais_track = %a, "fused radar and AIS tracks");
        }
        assignment.pairs.len()
    }
}

/// One-sigma speed uncertainty of a track estimate, in knots.
fn speed_sigma_kn(track: &Track) -> f64 {
    let cov = track.cov();
    let variance = 0.5 * (cov[(2, 2)] + cov[(3, 3)]);
    variance.max(0.0).sqrt() / KNOTS_TO_MS
}

/// Combine the backing tracks into one published target.
fn build_target(
    fused_id: FusedId,
    radar: Option<&Track>,
    ais: Option<&Track>,
    now: f64,
    frame: &LocalFrame,
) -> Option<FusedTarget> {
    let (source_type, confidence) = match (radar, ais) {
        (Some(_), Some(_)) => (TargetSource::Fused, CONFIDENCE_FUSED),
        (None, Some(_)) => (TargetSource::Ais, CONFIDENCE_AIS_ONLY),
        (Some(_), None) => (TargetSource::Radar, CONFIDENCE_RADAR_ONLY),
        (None, None) => return None,
    };

    // AIS position unless radar saw the vessel more recently; AIS velocity always
    let position_track = match (radar, ais) {
        (Some(r), Some(a)) if r.last_update_time > a.last_update_time => r,
        (_, Some(a)) => a,
        (Some(r), None) => r,
        (None, None) => return None,
    };
    let velocity_track = ais.or(radar)?;

    let (e, n) = position_track.position_at(now);
    let pos = frame.to_geodetic(e, n);
    let (ve, vn) = velocity_track.velocity();
    let (speed_kn, course_deg) = course_from_velocity(ve, vn);

    let established = [radar, ais].into_iter().flatten();
    let status = if established.clone().any(|t| t.status == TrackStatus::Confirmed) {
        TrackStatus::Confirmed
    } else {
        TrackStatus::Coasting
    };
    let timestamp = established.map(|t| t.last_update_time).fold(f64::MIN, f64::max);

    Some(FusedTarget {
        fused_id,
        source_type,
        has_radar: radar.is_some(),
        has_ais: ais.is_some(),
        radar_track: radar.map(|t| t.id),
        ais_track: ais.map(|t| t.id),
        lat: pos.lat,
        lon: pos.lon,
        speed_kn,
        course_deg,
        heading_deg: ais.and_then(|t| t.heading_deg),
        velocity_ms: [ve, vn],
        mmsi: ais.map(|t| t.sensor_id.clone()),
        name: ais.and_then(|t| t.name.clone()),
        confidence,
        status,
        timestamp,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
