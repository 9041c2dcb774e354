//! Decoded AIS position reports (message types 1–3, 18, 19).
//!
//! Fields carry the ITU-R M.1371 "not available" sentinels; they are turned
//! into absent values here so the tracker never sees them.

use crate::NormalizeError;
use fusion_core::Detection;
use serde::{Deserialize, Serialize};

pub const LAT_NOT_AVAILABLE: f64 = 91.0;
pub const LON_NOT_AVAILABLE: f64 = 181.0;
pub const SOG_NOT_AVAILABLE: f64 = 102.3;
pub const COG_NOT_AVAILABLE: f64 = 360.0;
pub const HEADING_NOT_AVAILABLE: u16 = 511;

const MAX_MMSI: u32 = 999_999_999;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AisPositionReport {
    pub mmsi: u32,
    pub lat: f64,
    pub lon: f64,
    /// Speed over ground (knots)
    pub sog_kn: f64,
    /// Course over ground (degrees true)
    pub cog_deg: f64,
    /// True heading (degrees), 511 when not available
    pub heading_deg: u16,
    /// Vessel name from static data, `@`-padded as broadcast
    #[serde(default)]
    pub name: Option<String>,
    pub timestamp: f64,
}

impl AisPositionReport {
    pub fn new(mmsi: u32, lat: f64, lon: f64, timestamp: f64) -> Self {
        Self {
            mmsi,
            lat,
            lon,
            sog_kn: SOG_NOT_AVAILABLE,
            cog_deg: COG_NOT_AVAILABLE,
            heading_deg: HEADING_NOT_AVAILABLE,
            name: None,
            timestamp,
        }
    }

    fn sog(&self) -> Option<f64> {
        (self.sog_kn.is_finite() && self.sog_kn >= 0.0 && self.sog_kn < SOG_NOT_AVAILABLE)
            .then_some(self.sog_kn)
    }

    fn cog(&self) -> Option<f64> {
        (self.cog_deg.is_finite() && (0.0..COG_NOT_AVAILABLE).contains(&self.cog_deg))
            .then_some(self.cog_deg)
    }

    fn heading(&self) -> Option<f64> {
        (self.heading_deg < 360).then_some(f64::from(self.heading_deg))
    }

    fn clean_name(&self) -> Option<String> {
        let name = self.name.as_deref()?.trim_end_matches('@').trim();
        (!name.is_empty()).then(|| name.to_string())
    }

    pub fn normalize(&self) -> Result<Detection, NormalizeError> {
        if self.mmsi == 0 || self.mmsi > MAX_MMSI {
            return Err(NormalizeError::InvalidMmsi(self.mmsi));
        }
        if !(self.lat.abs() <= 90.0 && self.lon.abs() <= 180.0) {
            return Err(NormalizeError::PositionUnavailable { mmsi: self.mmsi });
        }

        let mut det = Detection::ais(self.mmsi.to_string(), self.lat, self.lon, self.timestamp);
        if let (Some(sog), Some(cog)) = (self.sog(), self.cog()) {
            det = det.with_motion(sog, cog);
        }
        if let Some(heading) = self.heading() {
            det = det.with_heading(heading);
        }
        if let Some(name) = self.clean_name() {
            det = det.with_name(name);
        }
        Ok(det)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> AisPositionReport {
        AisPositionReport {
            sog_kn: 11.5,
            cog_deg: 273.4,
            heading_deg: 271,
            name: Some("ZHE DAI YU 01@@@@@@".into()),
            ..AisPositionReport::new(412_440_123, 30.018, 122.108, 5.0)
        }
    }

    #[test]
    fn full_report_normalizes() {
        let det = report().normalize().unwrap();
        assert_eq!(det.sensor_id, "412440123");
        assert_eq!(det.speed_kn, Some(11.5));
        assert_eq!(det.course_deg, Some(273.4));
        assert_eq!(det.heading_deg, Some(271.0));
        assert_eq!(det.name.as_deref(), Some("ZHE DAI YU 01"));
    }

    #[test]
    fn sentinels_become_absent() {
        let mut r = report();
        r.heading_deg = HEADING_NOT_AVAILABLE;
        r.cog_deg = COG_NOT_AVAILABLE;
        r.name = Some("@@@@".into());
        let det = r.normalize().unwrap();
        assert!(det.heading_deg.is_none());
        assert!(det.speed_kn.is_none() && det.course_deg.is_none());
        assert!(det.name.is_none());

        let mut r = report();
        r.sog_kn = SOG_NOT_AVAILABLE;
        assert!(r.normalize().unwrap().velocity_en().is_none());
    }

    #[test]
    fn unavailable_position_is_refused() {
        let mut r = report();
        r.lat = LAT_NOT_AVAILABLE;
        assert_eq!(r.normalize(), Err(NormalizeError::PositionUnavailable { mmsi: 412_440_123 }));
        let mut r = report();
        r.lon = LON_NOT_AVAILABLE;
        assert!(r.normalize().is_err());
    }

    #[test]
    fn zero_mmsi_is_refused() {
        let mut r = report();
        r.mmsi = 0;
        assert_eq!(r.normalize(), Err(NormalizeError::InvalidMmsi(0)));
    }
}
