//! Scenario definitions.
//!
//! Each scenario is a harbour picture (vessels, radar site, sensor settings,
//! restricted zones) around the default engine origin. All scenarios are
//! deterministic given the same seed.

use crate::replay::ReplayRecord;
use crate::sensor_sim::{AisSimConfig, RadarSimConfig, SensorSimulator};
use crate::vessel::{Motion, Vessel};
use fusion_core::alert::Severity;
use fusion_core::config::{EngineConfig, RestrictedZone, DEFAULT_ORIGIN};
use fusion_core::geo::LocalFrame;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use sensor_models::RadarSite;
use serde::{Deserialize, Serialize};

/// Which pre-defined scenario to load.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// Port approach: inbound/outbound ships, pilot boat, moored barge, fishing craft without AIS
    Harbour,
    /// Converging and overtaking traffic that must raise CPA alerts
    Crossing,
    /// Restricted anchorage entered by a dark fast boat, a ship switching AIS off and a speeding ferry
    Intrusion,
    /// 500 vessels across the coverage, heavy clutter
    Stress,
}

impl ScenarioKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioKind::Harbour => "harbour",
            ScenarioKind::Crossing => "crossing",
            ScenarioKind::Intrusion => "intrusion",
            ScenarioKind::Stress => "stress",
        }
    }
}

/// A fully configured simulation scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    pub duration_secs: f64,
    /// Simulation step, also the fusion cycle interval
    pub step_secs: f64,
    pub site: RadarSite,
    pub radar: RadarSimConfig,
    pub ais: AisSimConfig,
    pub vessels: Vec<Vessel>,
    pub zones: Vec<RestrictedZone>,
    /// Warn this many metres before a vessel reaches a zone
    pub zone_buffer_m: Option<f64>,
    /// Radar-only targets faster than this are reported as unidentified
    pub unidentified_speed_kn: Option<f64>,
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        let mut scenario = Scenario {
            name: kind.as_str().into(),
            seed,
            duration_secs: 600.0,
            step_secs: 1.0,
            site: RadarSite::at(DEFAULT_ORIGIN),
            radar: RadarSimConfig::default(),
            ais: AisSimConfig::default(),
            vessels: Vec::new(),
            zones: Vec::new(),
            zone_buffer_m: None,
            unidentified_speed_kn: None,
        };
        match kind {
            ScenarioKind::Harbour => scenario.harbour(),
            ScenarioKind::Crossing => scenario.crossing(),
            ScenarioKind::Intrusion => scenario.intrusion(),
            ScenarioKind::Stress => scenario.stress(),
        }
        scenario
    }

    /// Engine configuration matched to this scenario's site, step and zones.
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig {
            origin: self.site.position,
            cycle_interval_secs: self.step_secs,
            ..EngineConfig::default()
        };
        config.radar.position_std_m = self.site.position_std_m(self.site.max_range_nm / 4.0);
        config.alerts.zones = self.zones.clone();
        config.alerts.zone_buffer_m = self.zone_buffer_m;
        config.alerts.unidentified_speed_kn = self.unidentified_speed_kn;
        config
    }

    pub fn frame(&self) -> LocalFrame {
        LocalFrame::new(self.site.position)
    }

    /// Step-by-step sensor output of this scenario.
    pub fn playback(&self) -> anyhow::Result<Playback> {
        let sensors = SensorSimulator::new(
            self.site.clone(),
            self.frame(),
            self.radar.clone(),
            self.ais.clone(),
            self.seed,
        )?;
        Ok(Playback {
            header: Some(ReplayRecord::Header {
                scenario: self.name.clone(),
                seed: self.seed,
                site: self.site.clone(),
            }),
            frame: self.frame(),
            vessels: self.vessels.clone(),
            sensors,
            t: 0.0,
            step: self.step_secs,
            duration: self.duration_secs,
        })
    }

    // -----------------------------------------------------------------------
    // Harbour
    // -----------------------------------------------------------------------
    fn harbour(&mut self) {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(1));
        let mut vessels = vec![
            Vessel::new(
                0,
                [-8000.0, -6000.0],
                [0.0, 0.0],
                Motion::Waypoints {
                    points: vec![[-1000.0, -500.0], [0.0, 800.0]],
                    speed_ms: 6.0,
                },
            )
            .with_transponder(412_440_101, "COSCO NINGBO"),
            Vessel::new(1, [1500.0, 2000.0], [3.0, 4.0], Motion::Straight)
                .with_transponder(412_440_123, "ZHE DAI YU 01"),
            Vessel::new(2, [-2000.0, 3000.0], [0.0, 7.0], Motion::Turn { rate_deg_s: 1.5 })
                .with_transponder(412_440_207, "PILOT 3"),
            Vessel::new(3, [800.0, -1200.0], [0.0, 0.0], Motion::Straight)
                .with_transponder(412_440_318, "HAI GANG 12"),
            Vessel::new(
                4,
                [3000.0, -2500.0],
                [-5.0, 0.0],
                Motion::Segmented {
                    segments: vec![
                        (0.0, Motion::Straight),
                        (200.0, Motion::Turn { rate_deg_s: 2.0 }),
                        (245.0, Motion::Straight),
                    ],
                },
            )
            .with_transponder(412_440_452, "ZHOUSHAN FERRY 2"),
        ];
        // Fishing craft without AIS
        for id in 5..11 {
            let east = rng.gen_range(-6000.0..6000.0);
            let north = rng.gen_range(-6000.0..6000.0);
            let speed: f64 = rng.gen_range(1.0..5.0);
            let course: f64 = rng.gen_range(0.0..360.0_f64).to_radians();
            vessels.push(Vessel::new(
                id,
                [east, north],
                [speed * course.sin(), speed * course.cos()],
                Motion::Straight,
            ));
        }
        self.vessels = vessels;
    }

    // -----------------------------------------------------------------------
    // Crossing
    // -----------------------------------------------------------------------
    fn crossing(&mut self) {
        self.duration_secs = 600.0;
        self.vessels = vec![
            // Meet at the origin after 500 s
            Vessel::new(0, [-3000.0, 0.0], [6.0, 0.0], Motion::Straight)
                .with_transponder(412_550_001, "MIN RONG 8"),
            Vessel::new(1, [0.0, -3000.0], [0.0, 6.0], Motion::Straight)
                .with_transponder(412_550_002, "XIN HAI 19"),
            // Overtakes vessel 0 with 60 m lateral clearance
            Vessel::new(2, [-3500.0, 60.0], [7.5, 0.0], Motion::Straight)
                .with_transponder(412_550_003, "DONG FANG 5"),
            Vessel::new(3, [3000.0, -3000.0], [-5.0, 0.0], Motion::Straight),
        ];
    }

    // -----------------------------------------------------------------------
    // Intrusion
    // -----------------------------------------------------------------------
    fn intrusion(&mut self) {
        self.duration_secs = 300.0;
        let frame = self.frame();
        self.zones = vec![RestrictedZone {
            name: "Anchorage A".into(),
            polygon: [[1000.0, 1000.0], [2500.0, 1000.0], [2500.0, 2500.0], [1000.0, 2500.0]]
                .iter()
                .map(|[e, n]| frame.to_geodetic(*e, *n))
                .collect(),
            severity: Severity::Critical,
        }];
        self.zone_buffer_m = Some(300.0);
        self.unidentified_speed_kn = Some(15.0);
        self.vessels = vec![
            // Dark fast boat crossing the anchorage at ~23 kn
            Vessel::new(0, [-3000.0, 1800.0], [12.0, 0.0], Motion::Straight),
            // Switches AIS off on its way in
            Vessel::new(1, [-2000.0, -2000.0], [4.0, 4.0], Motion::Straight)
                .with_transponder(412_660_001, "YU LONG 7")
                .ais_silent_after(120.0),
            // ~31 kn ferry, over the speed limit
            Vessel::new(2, [-5000.0, -1000.0], [16.0, 0.0], Motion::Straight)
                .with_transponder(412_660_002, "SEA EXPRESS"),
            Vessel::new(3, [1800.0, 1800.0], [0.0, 0.0], Motion::Straight)
                .with_transponder(412_660_003, "HAI XUN 31"),
        ];
    }

    // -----------------------------------------------------------------------
    // Stress
    // -----------------------------------------------------------------------
    fn stress(&mut self) {
        self.duration_secs = 120.0;
        self.radar.clutter_per_scan = 5.0;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(4));
        self.vessels = (0..500u64)
            .map(|id| {
                let bearing: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
                let range = rng.gen_range(1000.0..20_000.0);
                let speed: f64 = rng.gen_range(0.0..10.0);
                let course: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
                let motion = if rng.gen_bool(0.1) {
                    Motion::Turn { rate_deg_s: rng.gen_range(-1.0..1.0) }
                } else {
                    Motion::Straight
                };
                let v = Vessel::new(
                    id,
                    [range * bearing.sin(), range * bearing.cos()],
                    [speed * course.sin(), speed * course.cos()],
                    motion,
                );
                if rng.gen_bool(0.7) {
                    v.with_transponder(413_000_000 + id as u32, format!("VESSEL {id}"))
                } else {
                    v
                }
            })
            .collect();
    }
}

/// Sensor output of a scenario, one simulation step per item.
///
/// The first item carries the header; every later one holds the step's radar
/// scan and AIS reports (when due), the ground truth and the closing tick.
pub struct Playback {
    header: Option<ReplayRecord>,
    frame: LocalFrame,
    vessels: Vec<Vessel>,
    sensors: SensorSimulator,
    t: f64,
    step: f64,
    duration: f64,
}

impl Iterator for Playback {
    type Item = Vec<ReplayRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(header) = self.header.take() {
            return Some(vec![header]);
        }
        if self.t > self.duration {
            return None;
        }
        let t = self.t;
        let mut records = Vec::with_capacity(4);
        if let Some(plots) = self.sensors.radar_scan(&self.vessels, t) {
            records.push(ReplayRecord::Radar { time: t, plots });
        }
        if let Some(reports) = self.sensors.ais_reports(&self.vessels, t) {
            records.push(ReplayRecord::Ais { time: t, reports });
        }
        let vessels = self
            .vessels
            .iter()
            .filter(|v| v.is_active(t))
            .map(|v| v.ground_truth(&self.frame, t))
            .collect();
        records.push(ReplayRecord::Truth { time: t, vessels });
        records.push(ReplayRecord::Tick { time: t });

        for v in &mut self.vessels {
            v.step(t, self.step);
        }
        self.t += self.step;
        Some(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_scenario_builds_a_valid_config() {
        for kind in [
            ScenarioKind::Harbour,
            ScenarioKind::Crossing,
            ScenarioKind::Intrusion,
            ScenarioKind::Stress,
        ] {
            let s = Scenario::build(kind, 42);
            assert_eq!(s.name, kind.as_str());
            assert!(!s.vessels.is_empty());
            s.engine_config().validate().unwrap();
        }
    }

    #[test]
    fn build_is_deterministic() {
        let a = Scenario::build(ScenarioKind::Harbour, 9);
        let b = Scenario::build(ScenarioKind::Harbour, 9);
        let pos = |s: &Scenario| s.vessels.iter().map(|v| (v.east, v.north)).collect::<Vec<_>>();
        assert_eq!(pos(&a), pos(&b));
    }

    #[test]
    fn playback_opens_with_header_and_ticks_every_step() {
        let mut s = Scenario::build(ScenarioKind::Crossing, 1);
        s.duration_secs = 9.0;
        let steps: Vec<_> = s.playback().unwrap().collect();
        assert_eq!(steps.len(), 11);
        assert!(matches!(steps[0].as_slice(), [ReplayRecord::Header { .. }]));
        for step in &steps[1..] {
            assert!(matches!(step.last(), Some(ReplayRecord::Tick { .. })));
        }
        // Radar every second, AIS every other second
        let count = |f: fn(&ReplayRecord) -> bool| steps.iter().flatten().filter(|r| f(r)).count();
        assert_eq!(count(|r| matches!(r, ReplayRecord::Radar { .. })), 10);
        assert_eq!(count(|r| matches!(r, ReplayRecord::Ais { .. })), 5);
    }

    #[test]
    fn intrusion_zone_is_in_the_engine_config() {
        let config = Scenario::build(ScenarioKind::Intrusion, 0).engine_config();
        assert_eq!(config.alerts.zones.len(), 1);
        assert_eq!(config.alerts.zones[0].polygon.len(), 4);
        assert_eq!(config.alerts.unidentified_speed_kn, Some(15.0));
        assert_eq!(config.alerts.zone_buffer_m, Some(300.0));
        assert!(Scenario::build(ScenarioKind::Harbour, 0).engine_config().alerts.zone_buffer_m.is_none());
    }
}
