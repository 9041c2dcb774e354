//! `sensor_models`: Sensor-native reports and their normalization into
//! fusion [`Detection`](fusion_core::Detection)s.
//!
//! - [`radar`]: radar site geometry, range/bearing plots, clutter limits
//! - [`ais`]: decoded AIS position reports and "not available" sentinels
//! - [`noise`]: polar measurement noise mapped into the local plane

pub mod ais;
pub mod noise;
pub mod radar;

pub use ais::AisPositionReport;
pub use noise::PolarNoise;
pub use radar::{RadarPlot, RadarSite, ScanReport};

use thiserror::Error;

/// Why a sensor report was refused at the normalization boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    #[error("radar plot {target}: range {range_nm:.3} NM outside [{min_nm}, {max_nm}]")]
    RangeLimit {
        target: u32,
        range_nm: f64,
        min_nm: f64,
        max_nm: f64,
    },

    #[error("radar plot {target}: speed {speed_kn:.1} kn outside [{min_kn}, {max_kn}]")]
    SpeedLimit {
        target: u32,
        speed_kn: f64,
        min_kn: f64,
        max_kn: f64,
    },

    #[error("radar plot {target}: non-finite {field}")]
    NonFinite { target: u32, field: &'static str },

    #[error("AIS report {mmsi}: position not available")]
    PositionUnavailable { mmsi: u32 },

    #[error("AIS report carries invalid MMSI {0}")]
    InvalidMmsi(u32),
}
