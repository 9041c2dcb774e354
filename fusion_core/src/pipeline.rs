//! Fusion pipeline: one complete cycle over the batches received since the
//! previous cycle.
//!
//! # Processing steps per cycle
//! 1. Partition detections by source (radar never competes with AIS)
//! 2. Per source, for each group of detections sharing a timestamp (oldest
//!    first): build kinematic candidates against the current tracks (grid +
//!    rayon), solve the assignment per connected component, predict + update
//!    matched tracks in parallel, birth tracks for unmatched detections
//! 3. Per source: predict tracks nothing hit to the cycle time
//! 4. Per source: lifecycle bookkeeping (once per track), pruning
//! 5. Append one trajectory point per live track
//! 6. Cross-sensor fusion (maintenance only once the deadline is exceeded)
//! 7. Alert evaluation (skipped once the deadline is exceeded)
//! 8. Build the immutable snapshot

use crate::{
    alert::AlertEvaluator,
    association::solve,
    config::{EngineConfig, SourceConfig},
    error::{FusionError, Result},
    estimator::Estimator,
    fuser::Fuser,
    gating::{build_candidates, DetectionPoint, TrackPrior},
    geo::LocalFrame,
    kf::Observation,
    snapshot::{CycleStats, Snapshot, SnapshotParts},
    track::{Track, TrackStatus},
    track_manager::{TrackManager, Transition},
    trajectory::{TrajectoryPoint, TrajectoryStore},
    types::{Detection, DetectionBatch, SourceType, TrackId},
};
use rayon::prelude::*;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle event of one track for a whole cycle.
enum StepOutcome {
    /// Created this cycle; its birth counts as the first hit
    Born,
    Hit,
    Miss,
    Diverged(FusionError),
}

#[derive(Debug, Default)]
struct SourceCounters {
    births: usize,
    confirmations: usize,
    deletions: usize,
    divergences: usize,
    ambiguities: usize,
}

/// Observation matching what the detection reports.
pub fn observation_for(det: &Detection, frame: &LocalFrame, source: &SourceConfig) -> Observation {
    let (east, north) = frame.to_local(det.position());
    match det.velocity_en() {
        Some((ve, vn)) => Observation::position_velocity(
            east,
            north,
            ve,
            vn,
            source.position_std_m,
            source.velocity_std_ms,
        ),
        None => Observation::position(east, north, source.position_std_m),
    }
}

/// The engine state owned by the cycle thread.
pub struct FusionPipeline {
    config: EngineConfig,
    frame: LocalFrame,
    manager: TrackManager,
    radar: Vec<Track>,
    ais: Vec<Track>,
    fuser: Fuser,
    trajectories: TrajectoryStore,
    alerts: AlertEvaluator,
    generation: u64,
}

impl FusionPipeline {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            frame: LocalFrame::new(config.origin),
            manager: TrackManager::new(),
            radar: Vec::new(),
            ais: Vec::new(),
            fuser: Fuser::new(),
            trajectories: TrajectoryStore::new(&config.trajectory),
            alerts: AlertEvaluator::new(),
            generation: 0,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn frame(&self) -> &LocalFrame {
        &self.frame
    }

    pub fn tracks(&self, source: SourceType) -> &[Track] {
        match source {
            SourceType::Radar => &self.radar,
            SourceType::Ais => &self.ais,
        }
    }

    /// Install a new configuration for subsequent cycles. The local origin
    /// is fixed for the lifetime of the pipeline; `queue_capacity` is read
    /// by the engine at start only.
    pub fn apply_config(&mut self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        if config.origin != self.config.origin {
            return Err(FusionError::config(
                "origin cannot change while tracks are live; start a new engine",
            ));
        }
        self.trajectories.set_limits(&config.trajectory);
        self.config = config;
        info!("configuration reloaded");
        Ok(())
    }

    /// Run one cycle at time `now` over `batches` and return the snapshot.
    pub fn run_cycle(&mut self, batches: Vec<DetectionBatch>, now: f64) -> Snapshot {
        let started = Instant::now();
        let deadline = Duration::from_millis(self.config.cycle_deadline_ms);

        let mut radar_dets = Vec::new();
        let mut ais_dets = Vec::new();
        for batch in batches {
            match batch.source_type {
                SourceType::Radar => radar_dets.extend(batch.detections),
                SourceType::Ais => ais_dets.extend(batch.detections),
            }
        }
        let mut cycle = CycleStats {
            detections: radar_dets.len() + ais_dets.len(),
            ..CycleStats::default()
        };

        for (source, dets) in [(SourceType::Radar, radar_dets), (SourceType::Ais, ais_dets)] {
            let tracks = match source {
                SourceType::Radar => &mut self.radar,
                SourceType::Ais => &mut self.ais,
            };
            let counters = track_source(
                tracks,
                dets,
                now,
                &self.frame,
                &self.config,
                source,
                &mut self.manager,
                &mut self.trajectories,
            );
            cycle.births += counters.births;
            cycle.confirmations += counters.confirmations;
            cycle.deletions += counters.deletions;
            cycle.divergences += counters.divergences;
            cycle.ambiguities += counters.ambiguities;
        }

        for track in self.radar.iter().chain(self.ais.iter()) {
            self.trajectories.record(
                track.id,
                TrajectoryPoint::from_state(&self.frame, track.state(), track.state_time),
            );
        }

        let mut partial = started.elapsed() > deadline;
        let fusion = self.fuser.fuse(
            &self.radar,
            &self.ais,
            now,
            &self.frame,
            &self.config.fusion,
            !partial,
        );
        cycle.newly_fused = fusion.newly_fused;
        cycle.defused = fusion.defused;

        partial |= started.elapsed() > deadline;
        let alerts = if partial {
            warn!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                deadline_ms = self.config.cycle_deadline_ms,
                "cycle deadline exceeded, publishing partial snapshot"
            );
            Vec::new()
        } else {
            self.alerts
                .evaluate(&fusion.targets, &self.frame, &self.config.alerts, now)
        };
        cycle.alerts = alerts.len();

        self.generation += 1;
        cycle.duration_us = started.elapsed().as_micros() as u64;
        let parts = SnapshotParts {
            generation: self.generation,
            timestamp: now,
            fused: fusion.targets,
            stats: fusion.stats,
            alerts,
            cycle,
            partial,
            frame: self.frame,
            lookahead_secs: self.config.cycle_interval_secs,
            trajectory: self.config.trajectory.clone(),
            trajectories: self.trajectories.share(),
        };
        Snapshot::build(parts, &self.radar, &self.ais)
    }
}

/// Associate, estimate and manage the tracks of one source.
///
/// Detections are consumed in timestamp order, one group of equal
/// timestamps at a time: each group is gated against the tracks as left by
/// the previous group, so a vessel reporting twice in one cycle updates its
/// track twice instead of spawning a second one. Lifecycle bookkeeping runs
/// once per track per cycle.
#[allow(clippy::too_many_arguments)]
fn track_source(
    tracks: &mut Vec<Track>,
    mut dets: Vec<Detection>,
    now: f64,
    frame: &LocalFrame,
    config: &EngineConfig,
    source: SourceType,
    manager: &mut TrackManager,
    trajectories: &mut TrajectoryStore,
) -> SourceCounters {
    let src = config.source(source);
    let mut counters = SourceCounters::default();
    dets.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    let mut cycle: Vec<CycleOutcome> =
        std::iter::repeat_with(CycleOutcome::default).take(tracks.len()).collect();
    for group in timestamp_groups(&dets) {
        associate_group(tracks, &mut cycle, group, frame, config, source, manager, &mut counters);
    }

    // Tracks nothing hit this cycle are predicted to the cycle time
    let outcomes: Vec<StepOutcome> = tracks
        .par_iter_mut()
        .zip(cycle.into_par_iter())
        .map(|(track, outcome)| outcome.settle(track, now))
        .collect();

    let lifecycle = &src.lifecycle;
    for (track, outcome) in tracks.iter_mut().zip(outcomes) {
        let transition = match outcome {
            StepOutcome::Born => None,
            StepOutcome::Hit => TrackManager::register_hit(lifecycle, track),
            StepOutcome::Miss => TrackManager::register_miss(lifecycle, track, now),
            StepOutcome::Diverged(err) => {
                counters.divergences += 1;
                warn!(track = %track.id, %err, "estimate rejected, keeping previous");
                TrackManager::register_divergence(lifecycle, track, now)
            }
        };
        match transition {
            Some(Transition::Confirmed) => {
                counters.confirmations += 1;
                debug!(track = %track.id, source = %source, "track confirmed");
            }
            Some(Transition::Deleted) => {
                counters.deletions += 1;
                debug!(track = %track.id, source = %source, misses = track.misses, "track deleted");
            }
            Some(Transition::Coasting) | Some(Transition::Recovered) | None => {}
        }
    }

    for dead in TrackManager::prune_deleted(tracks) {
        trajectories.retire(dead.id);
    }
    counters
}

/// Ranges of `dets` (sorted by time) sharing one timestamp.
fn timestamp_groups(dets: &[Detection]) -> Vec<&[Detection]> {
    let mut groups = Vec::new();
    let mut start = 0;
    for i in 1..=dets.len() {
        if i == dets.len() || dets[i].timestamp != dets[start].timestamp {
            groups.push(&dets[start..i]);
            start = i;
        }
    }
    groups
}

/// Gate, assign and update one timestamp group; unmatched detections are
/// born as new tracks that later groups can already associate with.
#[allow(clippy::too_many_arguments)]
fn associate_group(
    tracks: &mut Vec<Track>,
    cycle: &mut Vec<CycleOutcome>,
    group: &[Detection],
    frame: &LocalFrame,
    config: &EngineConfig,
    source: SourceType,
    manager: &mut TrackManager,
    counters: &mut SourceCounters,
) {
    let src = config.source(source);
    let priors: Vec<TrackPrior> = tracks
        .iter()
        .map(|t| TrackPrior {
            state: *t.state(),
            cov: *t.cov(),
            time: t.state_time,
        })
        .collect();
    let points: Vec<DetectionPoint> = group
        .iter()
        .map(|d| DetectionPoint::from_detection(d, frame))
        .collect();
    let graph = build_candidates(&priors, &points, frame, &config.gating, src.position_std_m);
    let assignment = solve(&graph, config.gating.strategy);

    for amb in &assignment.ambiguities {
        if let Some(&(ti, _)) = assignment.pairs.iter().find(|(_, m)| *m == amb.col) {
            let err = FusionError::AssociationAmbiguity {
                detection: amb.col,
                candidates: amb.candidates,
                chosen: tracks[ti].id,
            };
            debug!(source = %source, %err, "resolved association tie");
        }
    }
    counters.ambiguities += assignment.ambiguities.len();

    let matches = assignment.by_row(tracks.len());
    tracks
        .par_iter_mut()
        .zip(cycle.par_iter_mut())
        .zip(matches.par_iter())
        .for_each(|((track, outcome), m)| {
            if let Some(j) = *m {
                match update_track(track, &group[j], frame, src, config) {
                    Ok(()) => outcome.hit = true,
                    Err(err) => {
                        debug!(track = %track.id, %err, "update rejected");
                        outcome.rejected.get_or_insert(err);
                    }
                }
            }
        });

    for &j in &assignment.unmatched_cols {
        let track = manager.birth_track(&group[j], frame, src, &config.filter);
        counters.births += 1;
        tracks.push(track);
        cycle.push(CycleOutcome {
            born: true,
            ..CycleOutcome::default()
        });
    }
}

/// What happened to one track over all groups of a cycle.
#[derive(Debug, Default)]
struct CycleOutcome {
    born: bool,
    hit: bool,
    /// First numeric failure, kept only if no other update succeeded
    rejected: Option<FusionError>,
}

impl CycleOutcome {
    fn settle(self, track: &mut Track, now: f64) -> StepOutcome {
        if self.born {
            return StepOutcome::Born;
        }
        if self.hit {
            return StepOutcome::Hit;
        }
        if let Some(err) = self.rejected {
            return StepOutcome::Diverged(err);
        }
        match coast_track(track, now) {
            Ok(()) => StepOutcome::Miss,
            Err(err) => StepOutcome::Diverged(err),
        }
    }
}

/// Predict to the detection time and update. On failure the track is left
/// untouched.
fn update_track(
    track: &mut Track,
    det: &Detection,
    frame: &LocalFrame,
    src: &SourceConfig,
    config: &EngineConfig,
) -> Result<()> {
    let obs = observation_for(det, frame, src);
    let (posterior, nis) = track
        .estimator
        .predict(det.timestamp - track.state_time)
        .and_then(|prior| prior.update(&obs))?;
    track.estimator = maybe_upgrade(posterior, nis, src, config, track.id);
    track.state_time = track.state_time.max(det.timestamp);
    track.last_update_time = track.last_update_time.max(det.timestamp);
    track.last_nis = Some(nis);
    track.absorb_identity(det);
    Ok(())
}

/// Predict a track nothing hit this cycle forward to `now`.
fn coast_track(track: &mut Track, now: f64) -> Result<()> {
    track.estimator = track.estimator.predict(now - track.state_time)?;
    track.state_time = track.state_time.max(now);
    Ok(())
}

/// Switch a single-model track to IMM when its innovation shows a manoeuvre.
fn maybe_upgrade(
    estimator: Estimator,
    nis: f64,
    src: &SourceConfig,
    config: &EngineConfig,
    id: TrackId,
) -> Estimator {
    match (src.adaptive_imm_nis, &estimator) {
        (Some(threshold), Estimator::Single { .. }) if nis > threshold => {
            debug!(track = %id, nis, "manoeuvre detected, switching to IMM");
            estimator.upgrade_to_imm(&config.filter)
        }
        _ => estimator,
    }
}

/// Number of tracks in `status`.
pub fn count_status(tracks: &[Track], status: TrackStatus) -> usize {
    tracks.iter().filter(|t| t.status == status).count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilterKind, DEFAULT_ORIGIN};
    use crate::types::GeoPoint;

    fn batch(source: SourceType, detections: Vec<Detection>) -> Vec<DetectionBatch> {
        vec![DetectionBatch {
            source_type: source,
            received_at: 0.0,
            detections,
        }]
    }

    #[test]
    fn stationary_radar_target_confirms_on_third_hit() {
        let mut p = FusionPipeline::new(EngineConfig::default()).unwrap();
        for t in 0..3 {
            let det = Detection::radar("5", DEFAULT_ORIGIN.lat, DEFAULT_ORIGIN.lon, t as f64);
            let snap = p.run_cycle(batch(SourceType::Radar, vec![det]), t as f64);
            assert_eq!(snap.radar.len(), 1, "cycle {t}");
            let expected = if t < 2 { TrackStatus::Tentative } else { TrackStatus::Confirmed };
            assert_eq!(snap.radar[0].status, expected, "cycle {t}");
        }
        assert_eq!(count_status(p.tracks(SourceType::Radar), TrackStatus::Confirmed), 1);
    }

    #[test]
    fn distant_detections_spawn_separate_tracks() {
        let mut p = FusionPipeline::new(EngineConfig::default()).unwrap();
        let frame = LocalFrame::new(DEFAULT_ORIGIN);
        let far = frame.to_geodetic(5000.0, 0.0);
        let dets = vec![
            Detection::radar("1", DEFAULT_ORIGIN.lat, DEFAULT_ORIGIN.lon, 0.0),
            Detection::radar("2", far.lat, far.lon, 0.0),
        ];
        let snap = p.run_cycle(batch(SourceType::Radar, dets), 0.0);
        assert_eq!(snap.radar.len(), 2);
        assert_eq!(snap.cycle.births, 2);
        assert_ne!(snap.radar[0].track_id, snap.radar[1].track_id);
    }

    #[test]
    fn one_batch_with_two_fixes_of_one_vessel_updates_one_track() {
        let mut p = FusionPipeline::new(EngineConfig::default()).unwrap();
        let frame = *p.frame();
        let fix = |t: f64| {
            let pos = frame.to_geodetic(5.0 * t, 0.0);
            Detection::ais("412000003", pos.lat, pos.lon, t).with_motion(9.7, 90.0)
        };
        // Out of order inside the batch on purpose
        let snap = p.run_cycle(batch(SourceType::Ais, vec![fix(2.0), fix(0.0)]), 2.0);
        assert_eq!(snap.ais.len(), 1);
        assert_eq!(snap.cycle.births, 1);
        assert_eq!(snap.ais[0].last_update_time, 2.0);
        // Lifecycle counts the cycle once: birth only
        assert_eq!(snap.ais[0].hits, 1);

        let snap = p.run_cycle(batch(SourceType::Ais, vec![fix(4.0), fix(6.0)]), 6.0);
        assert_eq!(snap.ais.len(), 1);
        assert_eq!(snap.cycle.births, 0);
        assert_eq!(snap.ais[0].hits, 2);
    }

    #[test]
    fn detections_group_by_shared_timestamp() {
        let dets: Vec<Detection> = [0.0, 0.0, 1.5, 3.0, 3.0, 3.0]
            .iter()
            .map(|&t| Detection::radar("1", DEFAULT_ORIGIN.lat, DEFAULT_ORIGIN.lon, t))
            .collect();
        let sizes: Vec<usize> = timestamp_groups(&dets).iter().map(|g| g.len()).collect();
        assert_eq!(sizes, vec![2, 1, 3]);
        assert!(timestamp_groups(&[]).is_empty());
    }

    #[test]
    fn radar_and_ais_never_share_tracks() {
        let mut p = FusionPipeline::new(EngineConfig::default()).unwrap();
        let mut batches = batch(
            SourceType::Radar,
            vec![Detection::radar("1", DEFAULT_ORIGIN.lat, DEFAULT_ORIGIN.lon, 0.0)],
        );
        batches.extend(batch(
            SourceType::Ais,
            vec![Detection::ais("412000001", DEFAULT_ORIGIN.lat, DEFAULT_ORIGIN.lon, 0.0)],
        ));
        let snap = p.run_cycle(batches, 0.0);
        assert_eq!(snap.radar.len(), 1);
        assert_eq!(snap.ais.len(), 1);
        assert_eq!(snap.radar[0].filter, FilterKind::Imm);
        assert_eq!(snap.ais[0].filter, FilterKind::Kf);
    }

    #[test]
    fn adaptive_profile_upgrades_manoeuvring_ais_track() {
        let mut config = EngineConfig::default();
        config.ais.adaptive_imm_nis = Some(50.0);
        let mut p = FusionPipeline::new(config).unwrap();
        let frame = *p.frame();

        // Straight north, then a sharp turn east with a velocity report
        for t in 0..3 {
            let pos = frame.to_geodetic(0.0, 5.0 * t as f64 * 10.0);
            let det = Detection::ais("412000002", pos.lat, pos.lon, t as f64 * 10.0).with_motion(9.7, 0.0);
            p.run_cycle(batch(SourceType::Ais, vec![det]), t as f64 * 10.0);
        }
        let pos = frame.to_geodetic(40.0, 110.0);
        let det = Detection::ais("412000002", pos.lat, pos.lon, 30.0).with_motion(9.7, 90.0);
        let snap = p.run_cycle(batch(SourceType::Ais, vec![det]), 30.0);
        assert_eq!(snap.ais.len(), 1);
        assert_eq!(snap.ais[0].filter, FilterKind::Imm);
    }

    #[test]
    fn origin_is_fixed_on_reload() {
        let mut p = FusionPipeline::new(EngineConfig::default()).unwrap();
        let moved = EngineConfig {
            origin: GeoPoint::new(31.0, 121.0),
            ..EngineConfig::default()
        };
        assert!(matches!(p.apply_config(moved), Err(FusionError::InvalidConfig(_))));

        let mut tighter = EngineConfig::default();
        tighter.trajectory.capacity = 5;
        assert!(p.apply_config(tighter).is_ok());
        assert_eq!(p.config().trajectory.capacity, 5);
    }
}
