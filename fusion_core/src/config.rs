//! Engine configuration.
//!
//! Every field has a default; a JSON file only needs to carry the values it
//! overrides. Partial files are deep-merged over [`EngineConfig::default`]
//! before deserialization, so a nested object such as `"ais": {"lifecycle":
//! {"coast_miss_limit": 20}}` keeps every sibling at its AIS default.

use crate::error::{FusionError, Result};
use crate::types::{GeoPoint, SourceType, STATE_DIM};
use crate::alert::Severity;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// Default deployment origin: the Dinghai fishing-port radar site.
pub const DEFAULT_ORIGIN: GeoPoint = GeoPoint::new(30.017, 122.107);

/// Longest accepted cycle interval (one hour).
pub const MAX_CYCLE_INTERVAL_SECS: f64 = 3600.0;

// ---------------------------------------------------------------------------
// Association
// ---------------------------------------------------------------------------

/// How a cost matrix is turned into a one-to-one matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    /// Repeatedly take the cheapest remaining pair.
    Greedy,
    /// Global minimum total cost (Hungarian algorithm).
    Optimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatingConfig {
    /// Maximum kinematic cost (metres-equivalent) for a pair to be considered
    pub gate_distance_m: f64,
    /// Seconds of travel charged per m/s of velocity disagreement
    pub velocity_weight_s: f64,
    /// Optional χ² threshold on the position innovation (2 DOF)
    pub mahalanobis_chi2: Option<f64>,
    pub strategy: AssignmentStrategy,
}

impl Default for GatingConfig {
    fn default() -> Self {
        Self {
            gate_distance_m: 300.0,
            velocity_weight_s: 20.0,
            mahalanobis_chi2: None,
            strategy: AssignmentStrategy::Optimal,
        }
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Estimator family selectable per source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Kf,
    Ekf,
    Ukf,
    Imm,
}

impl FilterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKind::Kf => "kf",
            FilterKind::Ekf => "ekf",
            FilterKind::Ukf => "ukf",
            FilterKind::Imm => "imm",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UkfConfig {
    pub alpha: f64,
    pub beta: f64,
    pub kappa: f64,
}

impl Default for UkfConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 2.0,
            kappa: 0.0,
        }
    }
}

/// One member of the IMM model bank.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImmModelConfig {
    pub name: String,
    /// Kf, Ekf or Ukf (nested IMM is rejected by validation)
    pub kind: FilterKind,
    /// White-noise acceleration std (m/s²)
    pub accel_std: f64,
    /// Turn-rate random walk std (rad/s per √s)
    pub turn_rate_std: f64,
    pub initial_prob: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImmConfig {
    pub models: Vec<ImmModelConfig>,
    /// Row-stochastic Markov transition matrix, `transition[i][j] = P(j | i)`
    pub transition: Vec<Vec<f64>>,
}

impl Default for ImmConfig {
    fn default() -> Self {
        Self {
            models: vec![
                ImmModelConfig {
                    name: "cv-calm".into(),
                    kind: FilterKind::Kf,
                    accel_std: 0.05,
                    turn_rate_std: 0.0,
                    initial_prob: 0.6,
                },
                ImmModelConfig {
                    name: "cv-agile".into(),
                    kind: FilterKind::Kf,
                    accel_std: 0.5,
                    turn_rate_std: 0.0,
                    initial_prob: 0.2,
                },
                ImmModelConfig {
                    name: "ct".into(),
                    kind: FilterKind::Ekf,
                    accel_std: 0.2,
                    turn_rate_std: 0.01,
                    initial_prob: 0.2,
                },
            ],
            transition: vec![
                vec![0.90, 0.05, 0.05],
                vec![0.05, 0.90, 0.05],
                vec![0.05, 0.05, 0.90],
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Acceleration noise for stand-alone constant-velocity filters (m/s²)
    pub cv_accel_std: f64,
    /// Acceleration noise for stand-alone coordinated-turn filters (m/s²)
    pub ct_accel_std: f64,
    /// Turn-rate random walk for stand-alone coordinated-turn filters
    pub ct_turn_rate_std: f64,
    pub ukf: UkfConfig,
    pub imm: ImmConfig,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            cv_accel_std: 0.1,
            ct_accel_std: 0.2,
            ct_turn_rate_std: 0.01,
            ukf: UkfConfig::default(),
            imm: ImmConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-source tracking
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Consecutive hits (birth included) before a tentative track is confirmed
    pub confirm_hits: u32,
    /// Misses a tentative track survives
    pub tentative_miss_limit: u32,
    /// Misses a confirmed/coasting track survives
    pub coast_miss_limit: u32,
    /// Optional wall-clock limit on coasting since the last update
    pub max_coast_secs: Option<f64>,
    /// Consecutive divergent cycles before early deletion
    pub max_divergence_cycles: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            confirm_hits: 3,
            tentative_miss_limit: 1,
            coast_miss_limit: 5,
            max_coast_secs: None,
            max_divergence_cycles: 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub filter: FilterKind,
    /// Position measurement std (metres)
    pub position_std_m: f64,
    /// Velocity measurement std (m/s) when speed/course are reported
    pub velocity_std_ms: f64,
    pub init_pos_std_m: f64,
    /// Initial velocity std when the birth detection carries no velocity
    pub init_vel_std_ms: f64,
    pub init_turn_rate_std: f64,
    /// NIS above which a single-model track is upgraded to IMM
    pub adaptive_imm_nis: Option<f64>,
    pub lifecycle: LifecycleConfig,
}

impl SourceConfig {
    pub fn radar_default() -> Self {
        Self {
            filter: FilterKind::Imm,
            position_std_m: 25.0,
            velocity_std_ms: 1.0,
            init_pos_std_m: 50.0,
            init_vel_std_ms: 5.0,
            init_turn_rate_std: 0.02,
            adaptive_imm_nis: None,
            lifecycle: LifecycleConfig::default(),
        }
    }

    pub fn ais_default() -> Self {
        Self {
            filter: FilterKind::Kf,
            position_std_m: 10.0,
            velocity_std_ms: 0.3,
            init_pos_std_m: 20.0,
            init_vel_std_ms: 5.0,
            init_turn_rate_std: 0.02,
            adaptive_imm_nis: None,
            lifecycle: LifecycleConfig {
                confirm_hits: 3,
                tentative_miss_limit: 3,
                coast_miss_limit: 10,
                max_coast_secs: None,
                max_divergence_cycles: 3,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Fusion, trajectories, alerts
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    pub max_distance_m: f64,
    pub max_speed_diff_kn: f64,
    pub max_course_diff_deg: f64,
    /// Courses are only compared when both tracks move faster than this
    pub min_speed_for_course_kn: f64,
    /// Standard deviations of combined velocity uncertainty added to the
    /// speed and course tolerances
    pub velocity_sigma_gate: f64,
    /// Consecutive incompatible cycles before a fused pair is split
    pub defuse_after: u32,
    pub strategy: AssignmentStrategy,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            max_distance_m: 250.0,
            max_speed_diff_kn: 5.0,
            max_course_diff_deg: 45.0,
            min_speed_for_course_kn: 2.0,
            velocity_sigma_gate: 2.0,
            defuse_after: 3,
            strategy: AssignmentStrategy::Optimal,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryConfig {
    /// Points kept per track
    pub capacity: usize,
    /// Deleted tracks whose trajectory stays queryable
    pub retired_capacity: usize,
    pub prediction_horizon_secs: f64,
    pub prediction_step_secs: f64,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            capacity: 200,
            retired_capacity: 256,
            prediction_horizon_secs: 120.0,
            prediction_step_secs: 10.0,
        }
    }
}

/// Named restricted area (polygon vertices in lat/lon, implicitly closed).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RestrictedZone {
    pub name: String,
    pub polygon: Vec<GeoPoint>,
    pub severity: Severity,
}

/// Raise `approaching_site` for a vessel heading at the site.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApproachConfig {
    /// Course within this many degrees of the bearing to the site
    pub half_angle_deg: f64,
    /// Only vessels inside this range are considered
    pub range_nm: f64,
    pub min_speed_kn: f64,
    pub severity: Severity,
}

impl Default for ApproachConfig {
    fn default() -> Self {
        Self {
            half_angle_deg: 15.0,
            range_nm: 3.0,
            min_speed_kn: 5.0,
            severity: Severity::Critical,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    pub speed_limit_kn: Option<f64>,
    pub speed_severity: Severity,
    pub zones: Vec<RestrictedZone>,
    /// Outside a zone but this close to its edge raises `zone_proximity`
    pub zone_buffer_m: Option<f64>,
    /// Range rules are measured from the site (the local origin)
    pub close_range_nm: Option<f64>,
    pub far_range_nm: Option<f64>,
    /// Slower than this raises `stationary`
    pub stationary_speed_kn: Option<f64>,
    pub approach: Option<ApproachConfig>,
    pub cpa_threshold_m: Option<f64>,
    pub tcpa_horizon_secs: f64,
    /// Radar-only targets faster than this raise `unidentified_vessel`
    pub unidentified_speed_kn: Option<f64>,
    pub cooldown_secs: f64,
    /// Alerts buffered between two `get_alerts` polls
    pub outbox_capacity: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            speed_limit_kn: Some(30.0),
            speed_severity: Severity::Warning,
            zones: Vec::new(),
            zone_buffer_m: None,
            close_range_nm: None,
            far_range_nm: None,
            stationary_speed_kn: None,
            approach: None,
            cpa_threshold_m: Some(100.0),
            tcpa_horizon_secs: 600.0,
            unidentified_speed_kn: None,
            cooldown_secs: 60.0,
            outbox_capacity: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Local tangent plane origin
    pub origin: GeoPoint,
    pub cycle_interval_secs: f64,
    /// Beyond this, optional stages are skipped and the snapshot is partial
    pub cycle_deadline_ms: u64,
    /// Batches buffered per source between cycles (read at engine start)
    pub queue_capacity: usize,
    pub gating: GatingConfig,
    pub radar: SourceConfig,
    pub ais: SourceConfig,
    pub filter: FilterConfig,
    pub fusion: FusionConfig,
    pub trajectory: TrajectoryConfig,
    pub alerts: AlertConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN,
            cycle_interval_secs: 1.0,
            cycle_deadline_ms: 500,
            queue_capacity: 64,
            gating: GatingConfig::default(),
            radar: SourceConfig::radar_default(),
            ais: SourceConfig::ais_default(),
            filter: FilterConfig::default(),
            fusion: FusionConfig::default(),
            trajectory: TrajectoryConfig::default(),
            alerts: AlertConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn source(&self, source: SourceType) -> &SourceConfig {
        match source {
            SourceType::Radar => &self.radar,
            SourceType::Ais => &self.ais,
        }
    }

    /// Parse a (possibly partial) JSON document over the defaults and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let overrides: Value = serde_json::from_str(json)?;
        let mut merged = serde_json::to_value(Self::default())?;
        deep_merge(&mut merged, overrides);
        let config: Self = serde_json::from_value(merged)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Worker tick period, clamped to [1 ms, MAX_CYCLE_INTERVAL_SECS].
    pub fn cycle_interval(&self) -> Duration {
        let secs = self.cycle_interval_secs.clamp(1e-3, MAX_CYCLE_INTERVAL_SECS);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::from_secs(1))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure(
            self.origin.lat.abs() < 85.0 && self.origin.lon.abs() <= 180.0,
            "origin must be a valid lat/lon away from the poles",
        )?;
        ensure(
            positive(self.cycle_interval_secs) && self.cycle_interval_secs <= MAX_CYCLE_INTERVAL_SECS,
            format!("cycle_interval_secs must be in (0, {MAX_CYCLE_INTERVAL_SECS}]"),
        )?;
        ensure(self.cycle_deadline_ms > 0, "cycle_deadline_ms must be > 0")?;
        ensure(self.queue_capacity > 0, "queue_capacity must be > 0")?;

        ensure(positive(self.gating.gate_distance_m), "gating.gate_distance_m must be > 0")?;
        ensure(
            self.gating.velocity_weight_s >= 0.0,
            "gating.velocity_weight_s must be >= 0",
        )?;
        if let Some(chi2) = self.gating.mahalanobis_chi2 {
            ensure(positive(chi2), "gating.mahalanobis_chi2 must be > 0")?;
        }

        for (label, src) in [("radar", &self.radar), ("ais", &self.ais)] {
            validate_source(label, src)?;
        }
        validate_filters(&self.filter)?;

        let f = &self.fusion;
        ensure(positive(f.max_distance_m), "fusion.max_distance_m must be > 0")?;
        ensure(positive(f.max_speed_diff_kn), "fusion.max_speed_diff_kn must be > 0")?;
        ensure(
            f.max_course_diff_deg > 0.0 && f.max_course_diff_deg <= 180.0,
            "fusion.max_course_diff_deg must be in (0, 180]",
        )?;
        ensure(f.min_speed_for_course_kn >= 0.0, "fusion.min_speed_for_course_kn must be >= 0")?;
        ensure(
            f.velocity_sigma_gate.is_finite() && f.velocity_sigma_gate >= 0.0,
            "fusion.velocity_sigma_gate must be >= 0",
        )?;
        ensure(f.defuse_after >= 1, "fusion.defuse_after must be >= 1")?;

        let t = &self.trajectory;
        ensure(t.capacity >= 1, "trajectory.capacity must be >= 1")?;
        ensure(t.prediction_horizon_secs >= 0.0, "trajectory.prediction_horizon_secs must be >= 0")?;
        ensure(positive(t.prediction_step_secs), "trajectory.prediction_step_secs must be > 0")?;

        let a = &self.alerts;
        ensure(a.cooldown_secs >= 0.0, "alerts.cooldown_secs must be >= 0")?;
        ensure(a.outbox_capacity >= 1, "alerts.outbox_capacity must be >= 1")?;
        ensure(positive(a.tcpa_horizon_secs), "alerts.tcpa_horizon_secs must be > 0")?;
        if let Some(limit) = a.speed_limit_kn {
            ensure(positive(limit), "alerts.speed_limit_kn must be > 0")?;
        }
        if let Some(cpa) = a.cpa_threshold_m {
            ensure(positive(cpa), "alerts.cpa_threshold_m must be > 0")?;
        }
        for zone in &a.zones {
            ensure(
                zone.polygon.len() >= 3,
                format!("zone '{}' needs at least 3 vertices", zone.name),
            )?;
        }
        for (label, value) in [
            ("alerts.zone_buffer_m", a.zone_buffer_m),
            ("alerts.close_range_nm", a.close_range_nm),
            ("alerts.far_range_nm", a.far_range_nm),
        ] {
            if let Some(v) = value {
                ensure(positive(v), format!("{label} must be > 0"))?;
            }
        }
        if let (Some(close), Some(far)) = (a.close_range_nm, a.far_range_nm) {
            ensure(close < far, "alerts.close_range_nm must be below far_range_nm")?;
        }
        if let Some(speed) = a.stationary_speed_kn {
            ensure(positive(speed), "alerts.stationary_speed_kn must be > 0")?;
        }
        if let Some(ap) = &a.approach {
            ensure(
                ap.half_angle_deg > 0.0 && ap.half_angle_deg < 180.0,
                "alerts.approach.half_angle_deg must be in (0, 180)",
            )?;
            ensure(positive(ap.range_nm), "alerts.approach.range_nm must be > 0")?;
            ensure(
                ap.min_speed_kn.is_finite() && ap.min_speed_kn >= 0.0,
                "alerts.approach.min_speed_kn must be >= 0",
            )?;
        }
        Ok(())
    }
}

fn validate_source(label: &str, src: &SourceConfig) -> Result<()> {
    ensure(positive(src.position_std_m), format!("{label}.position_std_m must be > 0"))?;
    ensure(positive(src.velocity_std_ms), format!("{label}.velocity_std_ms must be > 0"))?;
    ensure(positive(src.init_pos_std_m), format!("{label}.init_pos_std_m must be > 0"))?;
    ensure(positive(src.init_vel_std_ms), format!("{label}.init_vel_std_ms must be > 0"))?;
    ensure(
        positive(src.init_turn_rate_std),
        format!("{label}.init_turn_rate_std must be > 0"),
    )?;
    if let Some(nis) = src.adaptive_imm_nis {
        ensure(positive(nis), format!("{label}.adaptive_imm_nis must be > 0"))?;
    }
    let lc = &src.lifecycle;
    ensure(lc.confirm_hits >= 1, format!("{label}.lifecycle.confirm_hits must be >= 1"))?;
    ensure(
        lc.tentative_miss_limit <= lc.coast_miss_limit,
        format!("{label}.lifecycle.tentative_miss_limit must not exceed coast_miss_limit"),
    )?;
    ensure(
        lc.max_divergence_cycles >= 1,
        format!("{label}.lifecycle.max_divergence_cycles must be >= 1"),
    )?;
    if let Some(secs) = lc.max_coast_secs {
        ensure(positive(secs), format!("{label}.lifecycle.max_coast_secs must be > 0"))?;
    }
    Ok(())
}

fn validate_filters(f: &FilterConfig) -> Result<()> {
    ensure(positive(f.cv_accel_std), "filter.cv_accel_std must be > 0")?;
    ensure(positive(f.ct_accel_std), "filter.ct_accel_std must be > 0")?;
    ensure(f.ct_turn_rate_std >= 0.0, "filter.ct_turn_rate_std must be >= 0")?;
    let ukf = &f.ukf;
    ensure(positive(ukf.alpha), "filter.ukf.alpha must be > 0")?;
    ensure(
        ukf.beta.is_finite() && ukf.kappa.is_finite(),
        "filter.ukf.beta and filter.ukf.kappa must be finite",
    )?;
    // Sigma-point spread is sqrt(n + lambda) with n + lambda = alpha^2 (n + kappa)
    let spread = ukf.alpha * ukf.alpha * (STATE_DIM as f64 + ukf.kappa);
    ensure(
        positive(spread),
        format!("filter.ukf: n + lambda must be > 0 (kappa must exceed -{STATE_DIM})"),
    )?;

    let imm = &f.imm;
    let n = imm.models.len();
    ensure(n >= 1, "filter.imm.models must not be empty")?;
    ensure(
        imm.transition.len() == n && imm.transition.iter().all(|row| row.len() == n),
        format!("filter.imm.transition must be {n}x{n}"),
    )?;
    for (i, row) in imm.transition.iter().enumerate() {
        ensure(
            row.iter().all(|p| p.is_finite() && *p >= 0.0),
            format!("filter.imm.transition row {i} has negative entries"),
        )?;
        let sum: f64 = row.iter().sum();
        ensure(
            (sum - 1.0).abs() < 1e-6,
            format!("filter.imm.transition row {i} sums to {sum}, expected 1"),
        )?;
    }
    let prob_sum: f64 = imm.models.iter().map(|m| m.initial_prob).sum();
    ensure(
        (prob_sum - 1.0).abs() < 1e-6 && imm.models.iter().all(|m| m.initial_prob >= 0.0),
        "filter.imm initial probabilities must be non-negative and sum to 1",
    )?;
    for m in &imm.models {
        ensure(
            m.kind != FilterKind::Imm,
            format!("IMM model '{}' cannot itself be an IMM", m.name),
        )?;
        ensure(positive(m.accel_std), format!("IMM model '{}' accel_std must be > 0", m.name))?;
        ensure(
            m.turn_rate_std >= 0.0,
            format!("IMM model '{}' turn_rate_std must be >= 0", m.name),
        )?;
    }
    Ok(())
}

fn positive(x: f64) -> bool {
    x.is_finite() && x > 0.0
}

fn ensure(cond: bool, msg: impl Into<String>) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(FusionError::config(msg))
    }
}

/// Recursively overlay `patch` onto `base`; objects merge key by key, any
/// other value replaces.
fn deep_merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
