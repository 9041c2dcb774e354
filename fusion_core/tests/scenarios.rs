//! End-to-end scenarios driven through the engine handle.

use fusion_core::config::{EngineConfig, DEFAULT_ORIGIN};
use fusion_core::geo::LocalFrame;
use fusion_core::{
    AlertKind, Detection, Engine, EngineHandle, FusionError, FusionStats, GeoPoint, Snapshot,
    SourceType, TargetSource, TrackStatus,
};
use std::sync::Arc;

const MMSI: &str = "412440123";

struct Harness {
    engine: Engine,
    handle: EngineHandle,
}

impl Harness {
    fn new(config: EngineConfig) -> Self {
        let engine = Engine::new(config).unwrap();
        let handle = engine.handle();
        Self { engine, handle }
    }

    fn radar(&self, p: GeoPoint, t: f64) {
        self.handle
            .submit_detections(SourceType::Radar, vec![Detection::radar("17", p.lat, p.lon, t)]);
    }

    fn radar_moving(&self, p: GeoPoint, speed_kn: f64, course_deg: f64, t: f64) {
        let det = Detection::radar("17", p.lat, p.lon, t).with_motion(speed_kn, course_deg);
        self.handle.submit_detections(SourceType::Radar, vec![det]);
    }

    fn ais(&self, p: GeoPoint, speed_kn: f64, course_deg: f64, t: f64) {
        let det = Detection::ais(MMSI, p.lat, p.lon, t)
            .with_motion(speed_kn, course_deg)
            .with_name("ZHE DAI YU 01");
        self.handle.submit_detections(SourceType::Ais, vec![det]);
    }

    fn cycle(&mut self, now: f64) -> Arc<Snapshot> {
        let snap = self.engine.run_cycle(now);
        assert_consistent(&snap);
        snap
    }
}

/// Published targets, backing tracks and counters agree with each other.
fn assert_consistent(snap: &Snapshot) {
    assert!(
        snap.fused.iter().all(|t| t.has_radar || t.has_ais),
        "every fused target is backed by at least one sensor"
    );
    for target in &snap.fused {
        let backing = [(target.radar_track, &snap.radar), (target.ais_track, &snap.ais)];
        for (id, tracks) in backing {
            if let Some(id) = id {
                let track = tracks.iter().find(|t| t.track_id == id);
                assert!(
                    track.is_some_and(|t| t.status.is_established()),
                    "{} backed by missing or unestablished {id}",
                    target.fused_id
                );
            }
        }
    }
    let s = &snap.stats;
    assert_eq!(s.fused_targets, snap.fused.len());
    assert_eq!(s.radar_only + s.ais_only + s.fused_count, snap.fused.len());
}

const RADAR_POS: GeoPoint = GeoPoint::new(30.017, 122.107);
const AIS_POS: GeoPoint = GeoPoint::new(30.018, 122.108);

/// Far enough ahead that predicting a track there overflows its covariance.
const UNREACHABLE_TIME: f64 = 1e100;

#[test]
fn consistent_radar_and_ais_fuse_within_three_cycles() {
    let mut h = Harness::new(EngineConfig::default());
    let mut snap = h.cycle(0.0);
    for t in 0..3 {
        let t = t as f64;
        h.radar(RADAR_POS, t);
        h.ais(AIS_POS, 0.0, 0.0, t);
        snap = h.cycle(t);
    }

    assert_eq!(snap.fused.len(), 1);
    let target = &snap.fused[0];
    assert_eq!(target.source_type, TargetSource::Fused);
    assert_eq!(target.mmsi.as_deref(), Some(MMSI));
    assert_eq!(target.name.as_deref(), Some("ZHE DAI YU 01"));
    assert_eq!(target.confidence, 0.9);
    assert_eq!(
        snap.stats,
        FusionStats {
            radar_targets: 1,
            ais_targets: 1,
            fused_targets: 1,
            radar_only: 0,
            ais_only: 0,
            fused_count: 1,
        }
    );
    assert_eq!(snap.cycle.newly_fused, 1);
    assert!(!snap.partial);
}

#[test]
fn radar_only_track_keeps_fifty_trajectory_points() {
    let mut h = Harness::new(EngineConfig::default());
    let frame = LocalFrame::new(DEFAULT_ORIGIN);
    let mut snap = h.cycle(0.0);
    for k in 0..50 {
        let t = k as f64;
        h.radar(frame.to_geodetic(8.0 * t, 200.0), t);
        snap = h.cycle(t);
    }

    assert_eq!(snap.radar.len(), 1);
    assert_eq!(snap.fused.len(), 1);
    let target = &snap.fused[0];
    assert_eq!(target.source_type, TargetSource::Radar);
    assert!(target.has_radar && !target.has_ais);
    assert_eq!(target.confidence, 0.7);
    let json = serde_json::to_value(target).unwrap();
    assert_eq!(json["source_type"], "radar");

    let id = snap.radar[0].track_id;
    let points = h.handle.get_trajectory(id, None).unwrap();
    assert_eq!(points.len(), 50);
    assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert_eq!(h.handle.get_trajectory(id, Some(10)).unwrap().len(), 10);

    let detail = h.handle.get_track_detail(id).unwrap();
    assert_eq!(detail.trajectory_points, 50);
    assert_eq!(detail.model_probabilities.len(), 3);
    let total: f64 = detail.model_probabilities.iter().map(|m| m.prob).sum();
    assert!((total - 1.0).abs() < 1e-9);
    assert!(!detail.predicted_path.is_empty());
    // ~8 m/s east: speed close to 15.5 kn
    assert!((detail.view.speed_kn - 15.55).abs() < 2.0, "speed {}", detail.view.speed_kn);
}

#[test]
fn empty_cycles_coast_then_delete_at_boundary() {
    let mut h = Harness::new(EngineConfig::default());
    for t in 0..3 {
        h.radar(RADAR_POS, t as f64);
        h.cycle(t as f64);
    }
    let snap = h.engine.run_cycle(3.0);
    assert_eq!(snap.radar[0].status, TrackStatus::Coasting);
    let id = snap.radar[0].track_id;

    let limit = EngineConfig::default().radar.lifecycle.coast_miss_limit;
    for miss in 2..=limit {
        let snap = h.cycle(2.0 + miss as f64);
        assert_eq!(snap.radar.len(), 1, "still coasting after miss {miss}");
        assert_eq!(snap.radar[0].status, TrackStatus::Coasting);
        assert_eq!(snap.radar[0].miss_count, miss);
        assert_eq!(snap.fused[0].status, TrackStatus::Coasting);
    }

    let snap = h.cycle(3.0 + limit as f64);
    assert!(snap.radar.is_empty(), "deleted on miss {}", limit + 1);
    assert!(snap.fused.is_empty());
    assert_eq!(snap.cycle.deletions, 1);

    // History of a recently deleted track stays queryable; its detail does not
    assert!(h.handle.get_trajectory(id, None).is_ok());
    assert!(matches!(
        h.handle.get_track_detail(id),
        Err(FusionError::UnknownTargetId(_))
    ));
}

#[test]
fn losing_ais_degrades_to_radar_only_with_same_id() {
    let mut h = Harness::new(EngineConfig::default());
    let mut snap = h.cycle(0.0);
    for t in 0..3 {
        h.radar(RADAR_POS, t as f64);
        h.ais(AIS_POS, 0.0, 0.0, t as f64);
        snap = h.cycle(t as f64);
    }
    let fused_id = snap.fused[0].fused_id;

    // Radar keeps reporting, AIS falls silent until its track is deleted
    let ais_limit = EngineConfig::default().ais.lifecycle.coast_miss_limit;
    for k in 0..=ais_limit {
        let t = 3.0 + k as f64;
        h.radar(RADAR_POS, t);
        snap = h.cycle(t);
        assert_eq!(snap.fused.len(), 1);
        assert_eq!(snap.fused[0].fused_id, fused_id);
    }
    assert!(snap.ais.is_empty());
    assert_eq!(snap.fused[0].source_type, TargetSource::Radar);
    assert_eq!(snap.stats.radar_only, 1);
}

#[test]
fn over_speed_vessel_raises_one_alert_per_cooldown() {
    let mut h = Harness::new(EngineConfig::default());
    let frame = LocalFrame::new(DEFAULT_ORIGIN);
    let speed_kn = 35.0;
    let speed_ms = speed_kn * fusion_core::types::KNOTS_TO_MS;

    let mut alerts = Vec::new();
    for k in 0..10 {
        let t = k as f64;
        h.ais(frame.to_geodetic(0.0, speed_ms * t), speed_kn, 0.0, t);
        h.cycle(t);
        alerts.push(h.handle.get_alerts());
    }

    let total: Vec<_> = alerts.iter().flatten().collect();
    assert_eq!(total.len(), 1, "{total:?}");
    assert_eq!(total[0].kind, AlertKind::SpeedViolation);
    // Raised on the cycle the AIS track was confirmed
    assert_eq!(alerts[2].len(), 1);
    assert!(h.handle.get_alerts().is_empty(), "polling drains the outbox");
}

#[test]
fn partial_config_file_merges_over_defaults() {
    let config = EngineConfig::from_json_str(
        r#"{ "ais": { "lifecycle": { "coast_miss_limit": 20 } }, "fusion": { "defuse_after": 5 } }"#,
    )
    .unwrap();
    assert_eq!(config.ais.lifecycle.coast_miss_limit, 20);
    assert_eq!(config.ais.lifecycle.confirm_hits, 3);
    assert_eq!(config.fusion.defuse_after, 5);
    assert_eq!(config.radar, EngineConfig::default().radar);

    let mut h = Harness::new(config);
    assert_eq!(h.cycle(0.0).generation, 1);
}

#[test]
fn repeated_reports_within_one_cycle_keep_one_track() {
    let mut h = Harness::new(EngineConfig::default());
    let frame = LocalFrame::new(DEFAULT_ORIGIN);
    let speed_ms = 10.0 * fusion_core::types::KNOTS_TO_MS;

    let mut snap = h.cycle(0.0);
    for k in 0..8 {
        let t0 = 4.0 * k as f64;
        for t in [t0, t0 + 2.0] {
            h.ais(frame.to_geodetic(speed_ms * t, 100.0), 10.0, 90.0, t);
        }
        snap = h.cycle(t0 + 2.0);
        assert_eq!(snap.ais.len(), 1, "cycle {k}: {:?}", snap.ais);
        assert_eq!(snap.cycle.births, usize::from(k == 0), "cycle {k}");
    }

    assert_eq!(snap.ais[0].status, TrackStatus::Confirmed);
    assert_eq!(snap.ais[0].sensor_id, MMSI);
    assert_eq!(snap.stats.ais_targets, 1);
    assert_eq!(snap.stats.ais_only, 1);
    assert_eq!(snap.stats.fused_targets, 1);
    // Both reports of the last cycle were folded in
    assert_eq!(snap.ais[0].last_update_time, 30.0);
}

#[test]
fn moving_vessel_reported_by_both_sensors_fuses() {
    let mut h = Harness::new(EngineConfig::default());
    let frame = LocalFrame::new(DEFAULT_ORIGIN);
    let (speed_kn, course) = (12.0, 45.0);
    let (ve, vn) = fusion_core::geo::velocity_from_course(speed_kn, course);
    let at = |t: f64, offset: f64| frame.to_geodetic(400.0 + ve * t + offset, -300.0 + vn * t);

    let mut snap = h.cycle(0.0);
    for k in 0..3 {
        let t = k as f64;
        h.radar_moving(at(t, 0.0), speed_kn, course, t);
        h.ais(at(t, 30.0), speed_kn, course, t);
        snap = h.cycle(t);
    }
    assert_eq!(snap.stats.fused_count, 1, "{:?}", snap.stats);
    let fused_id = snap.fused[0].fused_id;

    for k in 3..15 {
        let t = k as f64;
        h.radar_moving(at(t, 0.0), speed_kn, course, t);
        h.ais(at(t, 30.0), speed_kn, course, t);
        snap = h.cycle(t);
        assert_eq!(snap.fused.len(), 1, "cycle {k}");
        assert_eq!(snap.fused[0].fused_id, fused_id);
        assert_eq!(snap.fused[0].source_type, TargetSource::Fused);
    }
    let target = &snap.fused[0];
    assert!((target.speed_kn - speed_kn).abs() < 0.5, "speed {}", target.speed_kn);
    assert!((target.course_deg - course).abs() < 3.0, "course {}", target.course_deg);
    assert_eq!(snap.cycle.defused, 0);
}

#[test]
fn position_only_radar_fuses_with_moving_ais_vessel() {
    let mut h = Harness::new(EngineConfig::default());
    let frame = LocalFrame::new(DEFAULT_ORIGIN);
    let speed_kn = 10.0;
    let speed_ms = speed_kn * fusion_core::types::KNOTS_TO_MS;
    let at = |t: f64| frame.to_geodetic(-500.0 + speed_ms * t, 250.0);

    let mut snap = h.cycle(0.0);
    for k in 0..3 {
        let t = k as f64;
        h.radar(at(t), t);
        h.ais(at(t), speed_kn, 90.0, t);
        snap = h.cycle(t);
    }
    // The radar track has barely started estimating velocity
    let radar_speed = snap.radar[0].speed_kn;
    assert!(speed_kn - radar_speed > 5.0, "radar speed {radar_speed}");
    assert_eq!(snap.stats.fused_count, 1, "{:?}", snap.stats);
    assert_eq!(snap.fused[0].mmsi.as_deref(), Some(MMSI));
    let fused_id = snap.fused[0].fused_id;

    for k in 3..15 {
        let t = k as f64;
        h.radar(at(t), t);
        h.ais(at(t), speed_kn, 90.0, t);
        snap = h.cycle(t);
        assert_eq!(snap.fused.len(), 1, "cycle {k}");
        assert_eq!(snap.fused[0].fused_id, fused_id, "stays fused while radar velocity converges");
    }
}

#[test]
fn diverging_tentative_track_is_dropped_at_once() {
    let mut h = Harness::new(EngineConfig::default());
    h.radar(RADAR_POS, 0.0);
    let snap = h.cycle(0.0);
    assert_eq!(snap.radar[0].status, TrackStatus::Tentative);
    let id = snap.radar[0].track_id;

    let snap = h.cycle(UNREACHABLE_TIME);
    assert_eq!(snap.cycle.divergences, 1);
    assert_eq!(snap.cycle.deletions, 1);
    assert!(snap.radar.is_empty());
    assert!(snap.fused.is_empty());
    assert!(matches!(
        h.handle.get_track_detail(id),
        Err(FusionError::UnknownTargetId(_))
    ));
}

#[test]
fn diverging_confirmed_track_coasts_until_divergence_limit() {
    let mut h = Harness::new(EngineConfig::default());
    for t in 0..3 {
        h.radar(RADAR_POS, t as f64);
        h.cycle(t as f64);
    }
    let snap = h.handle.get_snapshot();
    assert_eq!(snap.radar[0].status, TrackStatus::Confirmed);
    let id = snap.radar[0].track_id;
    let fused_id = snap.fused[0].fused_id;
    let before = snap.radar[0].clone();

    let limit = EngineConfig::default().radar.lifecycle.max_divergence_cycles;
    for k in 1..limit {
        let snap = h.cycle(UNREACHABLE_TIME);
        assert_eq!(snap.cycle.divergences, 1);
        assert_eq!(snap.cycle.deletions, 0);
        assert_eq!(snap.radar.len(), 1, "kept after {k} divergent cycles");
        let view = &snap.radar[0];
        assert_eq!(view.status, TrackStatus::Coasting);
        // The rejected estimate is not installed
        assert_eq!(view.state_time, before.state_time);
        assert_eq!((view.lat, view.lon), (before.lat, before.lon));
        assert_eq!(snap.fused[0].fused_id, fused_id);
        assert_eq!(snap.fused[0].status, TrackStatus::Coasting);
        assert_eq!(h.handle.get_track_detail(id).unwrap().divergences, k);
    }

    let snap = h.cycle(UNREACHABLE_TIME);
    assert_eq!(snap.cycle.divergences, 1);
    assert_eq!(snap.cycle.deletions, 1);
    assert!(snap.radar.is_empty());
    assert!(snap.fused.is_empty());
    assert!(h.handle.get_trajectory(id, None).is_ok());
}
