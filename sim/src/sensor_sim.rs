//! Radar and AIS sensor simulation.
//!
//! - Radar: one scan per period, per-vessel detection probability, Gaussian
//!   range/bearing noise from the site's [`PolarNoise`](sensor_models::PolarNoise),
//!   Poisson clutter spread uniformly over the coverage ring
//! - AIS: one position report per fitted transponder per period, small GNSS
//!   noise, occasional lost slots

use crate::vessel::Vessel;
use fusion_core::geo::LocalFrame;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use anyhow::{anyhow, ensure};
use rand_distr::{Normal, Poisson};
use sensor_models::radar::METRES_PER_NM;
use sensor_models::{AisPositionReport, RadarPlot, RadarSite};
use serde::{Deserialize, Serialize};

/// Target numbers at or above this are assigned to clutter plots.
pub const CLUTTER_TARGET_BASE: u32 = 9000;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RadarSimConfig {
    pub scan_period_secs: f64,
    pub p_detection: f64,
    /// Mean clutter plots per scan
    pub clutter_per_scan: f64,
    /// Std of the plot extractor's own speed estimate (knots)
    pub speed_std_kn: f64,
    /// Std of the plot extractor's own course estimate (degrees)
    pub course_std_deg: f64,
}

impl Default for RadarSimConfig {
    fn default() -> Self {
        Self {
            scan_period_secs: 1.0,
            p_detection: 0.95,
            clutter_per_scan: 0.5,
            speed_std_kn: 0.5,
            course_std_deg: 3.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AisSimConfig {
    pub report_period_secs: f64,
    /// Probability a scheduled report is lost (slot collision, shadowing)
    pub p_lost: f64,
    pub position_std_m: f64,
}

impl Default for AisSimConfig {
    fn default() -> Self {
        Self {
            report_period_secs: 2.0,
            p_lost: 0.05,
            position_std_m: 5.0,
        }
    }
}

/// Sampling distributions fixed for the whole run.
struct Noise {
    range_nm: Normal<f64>,
    bearing_deg: Normal<f64>,
    speed_kn: Normal<f64>,
    course_deg: Normal<f64>,
    gnss_m: Normal<f64>,
    clutter: Option<Poisson<f64>>,
}

/// Produces sensor-native reports from ground truth, deterministically per seed.
pub struct SensorSimulator {
    site: RadarSite,
    frame: LocalFrame,
    radar: RadarSimConfig,
    ais: AisSimConfig,
    noise: Noise,
    next_scan: f64,
    next_ais: f64,
    rng: ChaCha8Rng,
}

fn gaussian(what: &str, std: f64) -> anyhow::Result<Normal<f64>> {
    ensure!(std.is_finite() && std >= 0.0, "{what} noise std must be finite and >= 0, got {std}");
    Normal::new(0.0, std).map_err(|e| anyhow!("invalid {what} noise std {std}: {e}"))
}

impl SensorSimulator {
    pub fn new(
        site: RadarSite,
        frame: LocalFrame,
        radar: RadarSimConfig,
        ais: AisSimConfig,
        seed: u64,
    ) -> anyhow::Result<Self> {
        ensure!(radar.scan_period_secs > 0.0, "radar scan period must be > 0");
        ensure!(ais.report_period_secs > 0.0, "AIS report period must be > 0");
        let clutter = if radar.clutter_per_scan > 0.0 {
            Some(
                Poisson::new(radar.clutter_per_scan)
                    .map_err(|e| anyhow!("invalid clutter rate {}: {e}", radar.clutter_per_scan))?,
            )
        } else {
            None
        };
        let noise = Noise {
            range_nm: gaussian("range", site.noise.range_std_m / METRES_PER_NM)?,
            bearing_deg: gaussian("bearing", site.noise.bearing_std_deg)?,
            speed_kn: gaussian("speed", radar.speed_std_kn)?,
            course_deg: gaussian("course", radar.course_std_deg)?,
            gnss_m: gaussian("GNSS", ais.position_std_m)?,
            clutter,
        };
        Ok(Self {
            site,
            frame,
            radar,
            ais,
            noise,
            next_scan: 0.0,
            next_ais: 0.0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    /// Radar plots of one scan, if a scan is due at `t`.
    pub fn radar_scan(&mut self, vessels: &[Vessel], t: f64) -> Option<Vec<RadarPlot>> {
        if t < self.next_scan {
            return None;
        }
        self.next_scan += self.radar.scan_period_secs;

        let mut plots = Vec::new();
        for v in vessels.iter().filter(|v| v.is_active(t)) {
            if self.rng.gen::<f64>() > self.radar.p_detection {
                continue;
            }
            let (range_nm, bearing_deg) =
                self.site.range_bearing(self.frame.to_geodetic(v.east, v.north));
            if range_nm > self.site.max_range_nm {
                continue;
            }
            let (speed_kn, course_deg) = v.speed_course();
            let n = &self.noise;
            let rng = &mut self.rng;
            plots.push(RadarPlot {
                target_number: v.id as u32 + 1,
                range_nm: range_nm + n.range_nm.sample(rng),
                bearing_deg: (bearing_deg + n.bearing_deg.sample(rng)).rem_euclid(360.0),
                speed_kn: Some((speed_kn + n.speed_kn.sample(rng)).max(0.0)),
                course_deg: Some((course_deg + n.course_deg.sample(rng)).rem_euclid(360.0)),
                timestamp: t,
            });
        }

        let n_clutter = self.noise.clutter.as_ref().map_or(0, |p| p.sample(&mut self.rng) as u32);
        for k in 0..n_clutter {
            plots.push(RadarPlot {
                target_number: CLUTTER_TARGET_BASE + k,
                range_nm: self.rng.gen_range(self.site.min_range_nm..self.site.max_range_nm),
                bearing_deg: self.rng.gen_range(0.0..360.0),
                speed_kn: Some(self.rng.gen_range(0.0..1.0)),
                course_deg: None,
                timestamp: t,
            });
        }
        Some(plots)
    }

    /// AIS position reports, if a reporting slot is due at `t`.
    pub fn ais_reports(&mut self, vessels: &[Vessel], t: f64) -> Option<Vec<AisPositionReport>> {
        if t < self.next_ais {
            return None;
        }
        self.next_ais += self.ais.report_period_secs;

        let mut reports = Vec::new();
        for v in vessels.iter().filter(|v| v.is_active(t)) {
            let Some(tx) = v.transponder.as_ref().filter(|_| v.transmits(t)) else {
                continue;
            };
            if self.rng.gen::<f64>() < self.ais.p_lost {
                continue;
            }
            let p = self.frame.to_geodetic(
                v.east + self.noise.gnss_m.sample(&mut self.rng),
                v.north + self.noise.gnss_m.sample(&mut self.rng),
            );
            let (speed_kn, course_deg) = v.speed_course();
            // SOG is broadcast in 0.1 kn steps, COG in 0.1 degree steps
            let sog_kn = (speed_kn * 10.0).round() / 10.0;
            let cog_deg = ((course_deg * 10.0).round() / 10.0).rem_euclid(360.0);
            reports.push(AisPositionReport {
                mmsi: tx.mmsi,
                lat: p.lat,
                lon: p.lon,
                sog_kn,
                cog_deg,
                heading_deg: (course_deg.round() as u16) % 360,
                name: Some(tx.name.clone()),
                timestamp: t,
            });
        }
        Some(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vessel::Motion;
    use fusion_core::config::DEFAULT_ORIGIN;

    fn simulator(radar: RadarSimConfig, seed: u64) -> SensorSimulator {
        SensorSimulator::new(
            RadarSite::default(),
            LocalFrame::new(DEFAULT_ORIGIN),
            radar,
            AisSimConfig::default(),
            seed,
        )
        .unwrap()
    }

    fn fleet() -> Vec<Vessel> {
        vec![
            Vessel::new(0, [2000.0, 1000.0], [3.0, 0.0], Motion::Straight)
                .with_transponder(412_000_001, "ALPHA"),
            Vessel::new(1, [-3000.0, 500.0], [0.0, -4.0], Motion::Straight),
        ]
    }

    #[test]
    fn same_seed_same_plots() {
        let vessels = fleet();
        let a = simulator(RadarSimConfig::default(), 7).radar_scan(&vessels, 0.0);
        let b = simulator(RadarSimConfig::default(), 7).radar_scan(&vessels, 0.0);
        assert_eq!(a, b);
    }

    #[test]
    fn scans_follow_the_period() {
        let mut sim = simulator(RadarSimConfig { scan_period_secs: 2.0, ..Default::default() }, 1);
        let vessels = fleet();
        assert!(sim.radar_scan(&vessels, 0.0).is_some());
        assert!(sim.radar_scan(&vessels, 1.0).is_none());
        assert!(sim.radar_scan(&vessels, 2.0).is_some());
    }

    #[test]
    fn perfect_radar_sees_every_vessel_and_no_clutter() {
        let radar = RadarSimConfig {
            p_detection: 1.0,
            clutter_per_scan: 0.0,
            ..Default::default()
        };
        let plots = simulator(radar, 3).radar_scan(&fleet(), 0.0).unwrap();
        assert_eq!(plots.len(), 2);
        assert!(plots.iter().all(|p| p.target_number < CLUTTER_TARGET_BASE));
        let site = RadarSite::default();
        assert!(plots.iter().all(|p| site.check(p).is_ok()));
    }

    #[test]
    fn only_transmitting_vessels_report_ais() {
        let mut sim = simulator(RadarSimConfig::default(), 11);
        let mut seen = 0;
        for k in 0..20 {
            if let Some(reports) = sim.ais_reports(&fleet(), 2.0 * k as f64) {
                assert!(reports.iter().all(|r| r.mmsi == 412_000_001));
                assert!(reports.iter().all(|r| r.normalize().is_ok()));
                seen += reports.len();
            }
        }
        assert!(seen > 10, "{seen}");
    }

    #[test]
    fn negative_noise_is_refused() {
        let ais = AisSimConfig { position_std_m: -1.0, ..Default::default() };
        assert!(SensorSimulator::new(
            RadarSite::default(),
            LocalFrame::new(DEFAULT_ORIGIN),
            RadarSimConfig::default(),
            ais,
            0,
        )
        .is_err());
    }
}
