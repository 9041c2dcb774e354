//! Alert evaluation over fused targets.
//!
//! [`evaluate_conditions`] is a pure function of the current targets; the
//! [`AlertEvaluator`] wraps it with a per-(target, condition) cooldown so a
//! condition that persists is reported once per `cooldown_secs`.

use crate::config::AlertConfig;
use crate::fuser::FusedTarget;
use crate::geo::{
    angle_diff_deg, bearing_from_origin_deg, distance_to_polygon_edge_m, point_in_polygon, LocalFrame,
};
use crate::types::{FusedId, GeoPoint, METRES_PER_NM};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::info;

/// Below this relative speed (m/s) two targets are treated as keeping
/// station and no CPA risk is evaluated.
const MIN_CLOSING_SPEED_MS: f64 = 0.25;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    SpeedViolation,
    ZoneIntrusion,
    /// Outside a restricted zone but within the buffer of its edge
    ZoneProximity,
    CpaRisk,
    UnidentifiedVessel,
    Stationary,
    /// Inside the close range of the site
    CloseRange,
    /// Beyond the far range of the site
    FarRange,
    /// Course points at the site
    ApproachingSite,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::SpeedViolation => "speed_violation",
            AlertKind::ZoneIntrusion => "zone_intrusion",
            AlertKind::ZoneProximity => "zone_proximity",
            AlertKind::CpaRisk => "cpa_risk",
            AlertKind::UnidentifiedVessel => "unidentified_vessel",
            AlertKind::Stationary => "stationary",
            AlertKind::CloseRange => "close_range",
            AlertKind::FarRange => "far_range",
            AlertKind::ApproachingSite => "approaching_site",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub target_id: FusedId,
    pub kind: AlertKind,
    pub severity: Severity,
    pub description: String,
    pub timestamp: f64,
    /// The other vessel of a CPA pair
    pub other_target: Option<FusedId>,
    /// Zone name for intrusions and proximity
    pub zone: Option<String>,
    /// Range to the site, or to the zone edge for proximity
    pub distance_m: Option<f64>,
    pub cpa_m: Option<f64>,
    pub tcpa_secs: Option<f64>,
}

impl Alert {
    fn new(target: &FusedTarget, kind: AlertKind, severity: Severity, description: String, now: f64) -> Self {
        Self {
            target_id: target.fused_id,
            kind,
            severity,
            description,
            timestamp: now,
            other_target: None,
            zone: None,
            distance_m: None,
            cpa_m: None,
            tcpa_secs: None,
        }
    }
}

/// Closest point of approach between two constant-velocity movers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cpa {
    pub cpa_m: f64,
    /// Negative when the closest approach lies in the past
    pub tcpa_secs: f64,
}

/// CPA/TCPA for positions `p` (metres) and velocities `v` (m/s) in a common
/// plane. Parallel movers report their current separation at t = 0.
pub fn cpa_tcpa(p1: (f64, f64), v1: (f64, f64), p2: (f64, f64), v2: (f64, f64)) -> Cpa {
    let dp = (p2.0 - p1.0, p2.1 - p1.1);
    let dv = (v2.0 - v1.0, v2.1 - v1.1);
    let dv2 = dv.0 * dv.0 + dv.1 * dv.1;
    if dv2 < 1e-12 {
        return Cpa {
            cpa_m: dp.0.hypot(dp.1),
            tcpa_secs: 0.0,
        };
    }
    let tcpa = -(dp.0 * dv.0 + dp.1 * dv.1) / dv2;
    let (cx, cy) = (dp.0 + dv.0 * tcpa, dp.1 + dv.1 * tcpa);
    Cpa {
        cpa_m: cx.hypot(cy),
        tcpa_secs: tcpa,
    }
}

/// Every alert condition that holds for `targets` right now, without
/// cooldown. Output order: per target (input order) speed, zones,
/// unidentified, stationary, range, approach; then CPA pairs.
pub fn evaluate_conditions(
    targets: &[FusedTarget],
    frame: &LocalFrame,
    config: &AlertConfig,
    now: f64,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    for t in targets {
        if let Some(limit) = config.speed_limit_kn.filter(|l| t.speed_kn > *l) {
            alerts.push(Alert::new(
                t,
                AlertKind::SpeedViolation,
                config.speed_severity,
                format!("{} speed {:.1} kn exceeds limit {:.1} kn", t.fused_id, t.speed_kn, limit),
                now,
            ));
        }

        let pos = GeoPoint::new(t.lat, t.lon);
        for zone in &config.zones {
            if point_in_polygon(pos, &zone.polygon) {
                let mut alert = Alert::new(
                    t,
                    AlertKind::ZoneIntrusion,
                    zone.severity,
                    format!("{} inside restricted zone '{}'", t.fused_id, zone.name),
                    now,
                );
                alert.zone = Some(zone.name.clone());
                alerts.push(alert);
                continue;
            }
            let Some(buffer) = config.zone_buffer_m else {
                continue;
            };
            let edge = distance_to_polygon_edge_m(frame, pos, &zone.polygon);
            if edge <= buffer {
                let mut alert = Alert::new(
                    t,
                    AlertKind::ZoneProximity,
                    zone.severity.min(Severity::Warning),
                    format!("{} {:.0} m from restricted zone '{}'", t.fused_id, edge, zone.name),
                    now,
                );
                alert.zone = Some(zone.name.clone());
                alert.distance_m = Some(edge);
                alerts.push(alert);
            }
        }

        if let Some(limit) = config.unidentified_speed_kn {
            if t.has_radar && !t.has_ais && t.speed_kn > limit {
                alerts.push(Alert::new(
                    t,
                    AlertKind::UnidentifiedVessel,
                    Severity::Warning,
                    format!("{} under way at {:.1} kn without AIS", t.fused_id, t.speed_kn),
                    now,
                ));
            }
        }

        if let Some(limit) = config.stationary_speed_kn.filter(|l| t.speed_kn < *l) {
            alerts.push(Alert::new(
                t,
                AlertKind::Stationary,
                Severity::Info,
                format!("{} stationary ({:.1} kn, below {:.1} kn)", t.fused_id, t.speed_kn, limit),
                now,
            ));
        }

        let (east, north) = frame.to_local(pos);
        let range_m = east.hypot(north);
        let range_nm = range_m / METRES_PER_NM;
        let range_alert = match (config.close_range_nm, config.far_range_nm) {
            (Some(close), _) if range_nm < close => Some((AlertKind::CloseRange, Severity::Critical, close)),
            (_, Some(far)) if range_nm > far => Some((AlertKind::FarRange, Severity::Info, far)),
            _ => None,
        };
        if let Some((kind, severity, limit)) = range_alert {
            let mut alert = Alert::new(
                t,
                kind,
                severity,
                format!("{} at {:.2} NM from site (limit {:.2} NM)", t.fused_id, range_nm, limit),
                now,
            );
            alert.distance_m = Some(range_m);
            alerts.push(alert);
        }

        if let Some(rule) = &config.approach {
            // Bearing from the target back to the site
            let to_site = (bearing_from_origin_deg(east, north) + 180.0).rem_euclid(360.0);
            let offset = angle_diff_deg(t.course_deg, to_site);
            if range_nm <= rule.range_nm && t.speed_kn >= rule.min_speed_kn && offset <= rule.half_angle_deg {
                let mut alert = Alert::new(
                    t,
                    AlertKind::ApproachingSite,
                    rule.severity,
                    format!(
                        "{} heading for the site at {:.1} kn, {:.2} NM out ({:.0} deg off)",
                        t.fused_id, t.speed_kn, range_nm, offset
                    ),
                    now,
                );
                alert.distance_m = Some(range_m);
                alerts.push(alert);
            }
        }
    }

    if let Some(threshold) = config.cpa_threshold_m {
        let local: Vec<(f64, f64)> = targets
            .iter()
            .map(|t| frame.to_local(GeoPoint::new(t.lat, t.lon)))
            .collect();
        for i in 0..targets.len() {
            for j in (i + 1)..targets.len() {
                let (a, b) = (&targets[i], &targets[j]);
                let va = (a.velocity_ms[0], a.velocity_ms[1]);
                let vb = (b.velocity_ms[0], b.velocity_ms[1]);
                if (vb.0 - va.0).hypot(vb.1 - va.1) < MIN_CLOSING_SPEED_MS {
                    continue;
                }
                let cpa = cpa_tcpa(local[i], va, local[j], vb);
                if cpa.tcpa_secs < 0.0 || cpa.tcpa_secs > config.tcpa_horizon_secs || cpa.cpa_m >= threshold {
                    continue;
                }
                let severity = if cpa.cpa_m < threshold / 2.0 {
                    Severity::Critical
                } else {
                    Severity::Warning
                };
                let mut alert = Alert::new(
                    a,
                    AlertKind::CpaRisk,
                    severity,
                    format!(
                        "{} and {} pass within {:.0} m in {:.0} s",
                        a.fused_id, b.fused_id, cpa.cpa_m, cpa.tcpa_secs
                    ),
                    now,
                );
                alert.other_target = Some(b.fused_id);
                alert.cpa_m = Some(cpa.cpa_m);
                alert.tcpa_secs = Some(cpa.tcpa_secs);
                alerts.push(alert);
            }
        }
    }

    alerts
}

/// Identity of one alert condition for cooldown purposes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ConditionKey {
    /// Conditions a target can be in at most once
    Target(AlertKind),
    Zone(AlertKind, String),
    Cpa(FusedId),
}

impl ConditionKey {
    fn of(alert: &Alert) -> Self {
        match alert.kind {
            AlertKind::ZoneIntrusion | AlertKind::ZoneProximity => {
                Self::Zone(alert.kind, alert.zone.clone().unwrap_or_default())
            }
            AlertKind::CpaRisk => Self::Cpa(alert.other_target.unwrap_or(alert.target_id)),
            kind => Self::Target(kind),
        }
    }
}

/// Stateful evaluator applying the per-condition cooldown.
#[derive(Debug, Default)]
pub struct AlertEvaluator {
    last_emitted: HashMap<(FusedId, ConditionKey), f64>,
}

impl AlertEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(
        &mut self,
        targets: &[FusedTarget],
        frame: &LocalFrame,
        config: &AlertConfig,
        now: f64,
    ) -> Vec<Alert> {
        let cooldown = config.cooldown_secs;
        self.last_emitted.retain(|_, t| now - *t < cooldown);

        let mut emitted = Vec::new();
        for alert in evaluate_conditions(targets, frame, config, now) {
            let key = (alert.target_id, ConditionKey::of(&alert));
            if self.last_emitted.contains_key(&key) {
                continue;
            }
            self.last_emitted.insert(key, now);
            info!(
                target = %alert.target_id,
                kind = ?alert.kind,
                severity = %alert.severity,
                "{}",
                alert.description
            );
            emitted.push(alert);
        }
        emitted
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApproachConfig, RestrictedZone, DEFAULT_ORIGIN};
    use crate::geo::velocity_from_course;
    use crate::track::TrackStatus;
    use crate::types::TargetSource;
    use approx::assert_abs_diff_eq;

    fn target(id: u64, east: f64, north: f64, speed_kn: f64, course: f64, has_ais: bool) -> FusedTarget {
        let frame = LocalFrame::new(DEFAULT_ORIGIN);
        let pos = frame.to_geodetic(east, north);
        let (ve, vn) = velocity_from_course(speed_kn, course);
        FusedTarget {
            fused_id: FusedId(id),
            source_type: if has_ais { TargetSource::Ais } else { TargetSource::Radar },
            has_radar: !has_ais,
            has_ais,
            radar_track: None,
            ais_track: None,
            lat: pos.lat,
            lon: pos.lon,
            speed_kn,
            course_deg: course,
            heading_deg: None,
            velocity_ms: [ve, vn],
            mmsi: None,
            name: None,
            confidence: 0.8,
            status: TrackStatus::Confirmed,
            timestamp: 0.0,
        }
    }

    fn quiet_config() -> AlertConfig {
        AlertConfig {
            speed_limit_kn: None,
            cpa_threshold_m: None,
            ..AlertConfig::default()
        }
    }

    #[test]
    fn cpa_head_on() {
        let cpa = cpa_tcpa((0.0, 0.0), (5.0, 0.0), (1000.0, 50.0), (-5.0, 0.0));
        assert_abs_diff_eq!(cpa.tcpa_secs, 100.0, epsilon = 1e-9);
        assert_abs_diff_eq!(cpa.cpa_m, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn cpa_parallel_reports_current_separation() {
        let cpa = cpa_tcpa((0.0, 0.0), (3.0, 0.0), (0.0, 40.0), (3.0, 0.0));
        assert_abs_diff_eq!(cpa.cpa_m, 40.0, epsilon = 1e-9);
        assert_eq!(cpa.tcpa_secs, 0.0);
    }

    #[test]
    fn speed_violation_once_per_cooldown() {
        let frame = LocalFrame::new(DEFAULT_ORIGIN);
        let config = AlertConfig {
            speed_limit_kn: Some(30.0),
            cooldown_secs: 60.0,
            ..quiet_config()
        };
        let targets = vec![target(1, 0.0, 0.0, 35.0, 90.0, true)];
        let mut ev = AlertEvaluator::new();

        let first = ev.evaluate(&targets, &frame, &config, 0.0);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, AlertKind::SpeedViolation);
        assert_eq!(first[0].severity, Severity::Warning);
        for t in 1..60 {
            assert!(ev.evaluate(&targets, &frame, &config, t as f64).is_empty());
        }
        assert_eq!(ev.evaluate(&targets, &frame, &config, 60.0).len(), 1);
    }

    #[test]
    fn zone_intrusion_uses_zone_severity() {
        let frame = LocalFrame::new(DEFAULT_ORIGIN);
        let o = DEFAULT_ORIGIN;
        let config = AlertConfig {
            zones: vec![RestrictedZone {
                name: "anchorage".into(),
                polygon: vec![
                    GeoPoint::new(o.lat - 0.01, o.lon - 0.01),
                    GeoPoint::new(o.lat - 0.01, o.lon + 0.01),
                    GeoPoint::new(o.lat + 0.01, o.lon + 0.01),
                    GeoPoint::new(o.lat + 0.01, o.lon - 0.01),
                ],
                severity: Severity::Critical,
            }],
            ..quiet_config()
        };
        let targets = vec![target(1, 0.0, 0.0, 5.0, 0.0, true), target(2, 5000.0, 0.0, 5.0, 0.0, true)];
        let alerts = evaluate_conditions(&targets, &frame, &config, 0.0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].target_id, FusedId(1));
        assert_eq!(alerts[0].zone.as_deref(), Some("anchorage"));
        assert_eq!(alerts[0].severity, Severity::Critical);
    }

    #[test]
    fn converging_pair_raises_cpa_risk() {
        let frame = LocalFrame::new(DEFAULT_ORIGIN);
        let config = AlertConfig {
            cpa_threshold_m: Some(100.0),
            ..quiet_config()
        };
        // 1 km apart, closing head-on at 10 kn each, 20 m lateral offset
        let targets = vec![
            target(1, 0.0, 0.0, 10.0, 90.0, true),
            target(2, 1000.0, 20.0, 10.0, 270.0, true),
        ];
        let alerts = evaluate_conditions(&targets, &frame, &config, 0.0);
        assert_eq!(alerts.len(), 1);
        let a = &alerts[0];
        assert_eq!(a.kind, AlertKind::CpaRisk);
        assert_eq!(a.other_target, Some(FusedId(2)));
        assert_eq!(a.severity, Severity::Critical);
        assert!(a.tcpa_secs.unwrap() > 0.0);
    }

    #[test]
    fn diverging_or_moored_pairs_are_quiet() {
        let frame = LocalFrame::new(DEFAULT_ORIGIN);
        let config = AlertConfig {
            cpa_threshold_m: Some(100.0),
            ..quiet_config()
        };
        let diverging = vec![
            target(1, 0.0, 0.0, 10.0, 270.0, true),
            target(2, 50.0, 0.0, 10.0, 90.0, true),
        ];
        assert!(evaluate_conditions(&diverging, &frame, &config, 0.0).is_empty());
        let moored = vec![
            target(1, 0.0, 0.0, 0.0, 0.0, true),
            target(2, 30.0, 0.0, 0.0, 0.0, true),
        ];
        assert!(evaluate_conditions(&moored, &frame, &config, 0.0).is_empty());
    }

    #[test]
    fn unidentified_fast_radar_contact() {
        let frame = LocalFrame::new(DEFAULT_ORIGIN);
        let config = AlertConfig {
            unidentified_speed_kn: Some(15.0),
            ..quiet_config()
        };
        let targets = vec![target(1, 0.0, 0.0, 20.0, 0.0, false), target(2, 9000.0, 0.0, 20.0, 0.0, true)];
        let alerts = evaluate_conditions(&targets, &frame, &config, 0.0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::UnidentifiedVessel);
    }

    fn square_zone(half_side_deg: f64) -> RestrictedZone {
        let o = DEFAULT_ORIGIN;
        let d = half_side_deg;
        RestrictedZone {
            name: "berth".into(),
            polygon: vec![
                GeoPoint::new(o.lat - d, o.lon - d),
                GeoPoint::new(o.lat - d, o.lon + d),
                GeoPoint::new(o.lat + d, o.lon + d),
                GeoPoint::new(o.lat + d, o.lon - d),
            ],
            severity: Severity::Critical,
        }
    }

    #[test]
    fn zone_buffer_warns_before_intrusion() {
        let frame = LocalFrame::new(DEFAULT_ORIGIN);
        let zone = square_zone(0.001);
        let (edge_east, _) = frame.to_local(GeoPoint::new(DEFAULT_ORIGIN.lat, DEFAULT_ORIGIN.lon + 0.001));
        let config = AlertConfig {
            zones: vec![zone],
            zone_buffer_m: Some(100.0),
            ..quiet_config()
        };
        let targets = vec![
            target(1, 0.0, 0.0, 5.0, 0.0, true),
            target(2, edge_east + 60.0, 0.0, 5.0, 0.0, true),
            target(3, edge_east + 400.0, 0.0, 5.0, 0.0, true),
        ];
        let alerts = evaluate_conditions(&targets, &frame, &config, 0.0);
        assert_eq!(alerts.len(), 2, "{alerts:?}");
        assert_eq!(alerts[0].kind, AlertKind::ZoneIntrusion);
        assert_eq!(alerts[1].kind, AlertKind::ZoneProximity);
        assert_eq!(alerts[1].target_id, FusedId(2));
        assert_eq!(alerts[1].severity, Severity::Warning);
        assert_abs_diff_eq!(alerts[1].distance_m.unwrap(), 60.0, epsilon = 1e-6);

        // No buffer configured: proximity is never reported
        let strict = AlertConfig {
            zone_buffer_m: None,
            ..config
        };
        assert_eq!(evaluate_conditions(&targets, &frame, &strict, 0.0).len(), 1);
    }

    #[test]
    fn range_rules_measure_from_site() {
        let frame = LocalFrame::new(DEFAULT_ORIGIN);
        let config = AlertConfig {
            close_range_nm: Some(0.3),
            far_range_nm: Some(10.0),
            ..quiet_config()
        };
        let targets = vec![
            target(1, 300.0, 200.0, 5.0, 0.0, true),
            target(2, 5000.0, 0.0, 5.0, 0.0, true),
            target(3, 0.0, -19_000.0, 5.0, 0.0, true),
        ];
        let alerts = evaluate_conditions(&targets, &frame, &config, 0.0);
        assert_eq!(alerts.len(), 2, "{alerts:?}");
        assert_eq!((alerts[0].target_id, alerts[0].kind), (FusedId(1), AlertKind::CloseRange));
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_abs_diff_eq!(alerts[0].distance_m.unwrap(), 300f64.hypot(200.0), epsilon = 1e-6);
        assert_eq!((alerts[1].target_id, alerts[1].kind), (FusedId(3), AlertKind::FarRange));
        assert_eq!(alerts[1].severity, Severity::Info);
    }

    #[test]
    fn stationary_targets_are_reported_once_per_cooldown() {
        let frame = LocalFrame::new(DEFAULT_ORIGIN);
        let config = AlertConfig {
            stationary_speed_kn: Some(0.5),
            ..quiet_config()
        };
        let targets = vec![target(1, 100.0, 0.0, 0.2, 0.0, true), target(2, 900.0, 0.0, 6.0, 0.0, true)];
        let mut ev = AlertEvaluator::new();
        let first = ev.evaluate(&targets, &frame, &config, 0.0);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, AlertKind::Stationary);
        assert_eq!(first[0].target_id, FusedId(1));
        assert!(ev.evaluate(&targets, &frame, &config, 30.0).is_empty());
    }

    #[test]
    fn vessel_steering_at_site_raises_approach() {
        let frame = LocalFrame::new(DEFAULT_ORIGIN);
        let config = AlertConfig {
            approach: Some(ApproachConfig::default()),
            ..quiet_config()
        };
        // 2 km east of the site: course 270 points at it, 0 points away
        let targets = vec![
            target(1, 2000.0, 0.0, 12.0, 265.0, true),
            target(2, 2000.0, 500.0, 12.0, 0.0, true),
            target(3, -2000.0, 0.0, 2.0, 90.0, true),
            target(4, 0.0, 9000.0, 12.0, 180.0, true),
        ];
        let alerts = evaluate_conditions(&targets, &frame, &config, 0.0);
        assert_eq!(alerts.len(), 1, "{alerts:?}");
        assert_eq!(alerts[0].kind, AlertKind::ApproachingSite);
        assert_eq!(alerts[0].target_id, FusedId(1));
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(AlertKind::ApproachingSite.to_string(), "approaching_site");
    }
}
