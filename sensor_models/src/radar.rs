//! Radar site geometry and plot normalization.
//!
//! Plots arrive as range (nautical miles) and bearing (degrees true) from the
//! antenna, the way a tracked-target message reports them. They are placed on
//! the chart with an equirectangular approximation, which is accurate to a few
//! metres inside harbour radar coverage.

use crate::noise::PolarNoise;
use crate::NormalizeError;
use fusion_core::{Detection, GeoPoint};
use serde::{Deserialize, Serialize};

pub const METRES_PER_NM: f64 = 1852.0;
/// Length of one degree of latitude used by the plot conversion.
pub const METRES_PER_DEG: f64 = 111_000.0;

/// One tracked-target report from the radar's own plot extractor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RadarPlot {
    pub target_number: u32,
    pub range_nm: f64,
    pub bearing_deg: f64,
    #[serde(default)]
    pub speed_kn: Option<f64>,
    #[serde(default)]
    pub course_deg: Option<f64>,
    pub timestamp: f64,
}

/// Physical configuration of a radar installation and its clutter limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarSite {
    pub position: GeoPoint,
    /// Plots closer than this are antenna ringing / sea return
    pub min_range_nm: f64,
    pub max_range_nm: f64,
    pub min_speed_kn: f64,
    pub max_speed_kn: f64,
    pub noise: PolarNoise,
}

impl Default for RadarSite {
    fn default() -> Self {
        Self {
            position: fusion_core::config::DEFAULT_ORIGIN,
            min_range_nm: 0.05,
            max_range_nm: 15.0,
            min_speed_kn: 0.0,
            max_speed_kn: 50.0,
            noise: PolarNoise::default(),
        }
    }
}

/// Outcome of normalizing one radar scan.
#[derive(Clone, Debug, Default)]
pub struct ScanReport {
    pub detections: Vec<Detection>,
    pub rejected: Vec<NormalizeError>,
}

impl RadarSite {
    pub fn at(position: GeoPoint) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// Chart position of a plot at `range_nm` / `bearing_deg` from the antenna.
    pub fn plot_position(&self, range_nm: f64, bearing_deg: f64) -> GeoPoint {
        let deg = range_nm * METRES_PER_NM / METRES_PER_DEG;
        let (sb, cb) = bearing_deg.to_radians().sin_cos();
        GeoPoint::new(
            self.position.lat + deg * cb,
            self.position.lon + deg * sb / self.position.lat.to_radians().cos(),
        )
    }

    /// Inverse of [`Self::plot_position`]: (range NM, bearing degrees true).
    pub fn range_bearing(&self, p: GeoPoint) -> (f64, f64) {
        let dlat = p.lat - self.position.lat;
        let dlon = (p.lon - self.position.lon) * self.position.lat.to_radians().cos();
        let range_nm = dlat.hypot(dlon) * METRES_PER_DEG / METRES_PER_NM;
        let bearing = dlon.atan2(dlat).to_degrees().rem_euclid(360.0);
        (range_nm, bearing)
    }

    /// Clutter pre-filter: range and speed limits.
    pub fn check(&self, plot: &RadarPlot) -> Result<(), NormalizeError> {
        let target = plot.target_number;
        for (field, v) in [
            ("range", plot.range_nm),
            ("bearing", plot.bearing_deg),
            ("timestamp", plot.timestamp),
        ] {
            if !v.is_finite() {
                return Err(NormalizeError::NonFinite { target, field });
            }
        }
        if !(self.min_range_nm..=self.max_range_nm).contains(&plot.range_nm) {
            return Err(NormalizeError::RangeLimit {
                target,
                range_nm: plot.range_nm,
                min_nm: self.min_range_nm,
                max_nm: self.max_range_nm,
            });
        }
        if let Some(speed) = plot.speed_kn {
            if !(self.min_speed_kn..=self.max_speed_kn).contains(&speed) {
                return Err(NormalizeError::SpeedLimit {
                    target,
                    speed_kn: speed,
                    min_kn: self.min_speed_kn,
                    max_kn: self.max_speed_kn,
                });
            }
        }
        Ok(())
    }

    pub fn normalize(&self, plot: &RadarPlot) -> Result<Detection, NormalizeError> {
        self.check(plot)?;
        let p = self.plot_position(plot.range_nm, plot.bearing_deg);
        let det = Detection::radar(plot.target_number.to_string(), p.lat, p.lon, plot.timestamp);
        Ok(match (plot.speed_kn, plot.course_deg) {
            (Some(speed), Some(course)) if course.is_finite() => {
                det.with_motion(speed, course.rem_euclid(360.0))
            }
            _ => det,
        })
    }

    pub fn normalize_scan(&self, plots: &[RadarPlot]) -> ScanReport {
        let mut report = ScanReport::default();
        for plot in plots {
            match self.normalize(plot) {
                Ok(det) => report.detections.push(det),
                Err(e) => report.rejected.push(e),
            }
        }
        report
    }

    /// Position std to configure the radar track filter with, for plots
    /// around `range_nm`.
    pub fn position_std_m(&self, range_nm: f64) -> f64 {
        self.noise.equivalent_position_std(range_nm * METRES_PER_NM)
    }
}
