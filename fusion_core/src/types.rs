//! Fundamental types used across the entire workspace.

use crate::error::{FusionError, Result};
use nalgebra::{DMatrix, DVector, Matrix5, Vector5};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Scalar type: use f64 throughout for numerical precision in the filters.
// ---------------------------------------------------------------------------

/// Number of states shared by every filter variant.
pub const STATE_DIM: usize = 5;

/// Vessel state vector: [east, north, v_east, v_north, turn_rate]
/// (metres, m/s, rad/s) in the local tangent plane.
pub type StateVec = Vector5<f64>;

/// 5×5 state covariance matrix
pub type StateCov = Matrix5<f64>;

/// Generic dynamic-size vector (used for measurement innovation)
pub type DVec = DVector<f64>;

/// Generic dynamic-size matrix (used for H, R, S)
pub type DMat = DMatrix<f64>;

/// Knots → metres per second.
pub const KNOTS_TO_MS: f64 = 0.514444;

/// Metres per international nautical mile.
pub const METRES_PER_NM: f64 = 1852.0;

/// Highest speed over ground an AIS position report can carry (102.3 means "not available").
pub const MAX_REPORTED_SPEED_KN: f64 = 102.2;

// ---------------------------------------------------------------------------
// Identifier types: newtype wrappers so IDs are never confused at compile time
// ---------------------------------------------------------------------------

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TrackId(pub u64);

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FusedId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl fmt::Display for FusedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// Sensor modality a detection or track comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Radar,
    Ais,
}

impl SourceType {
    pub const ALL: [SourceType; 2] = [SourceType::Radar, SourceType::Ais];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Radar => "radar",
            SourceType::Ais => "ais",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance of a fused target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetSource {
    Radar,
    Ais,
    Fused,
}

// ---------------------------------------------------------------------------
// Geodetic position
// ---------------------------------------------------------------------------

/// WGS-84 latitude / longitude in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// A single normalized sensor observation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Which modality produced this observation
    pub source_type: SourceType,
    /// Sensor-native identifier (MMSI for AIS, target number for radar)
    pub sensor_id: String,
    pub lat: f64,
    pub lon: f64,
    /// Speed over ground (knots), when the sensor reports it
    #[serde(default)]
    pub speed_kn: Option<f64>,
    /// Course over ground (degrees true), when the sensor reports it
    #[serde(default)]
    pub course_deg: Option<f64>,
    /// True heading (degrees), AIS only
    #[serde(default)]
    pub heading_deg: Option<f64>,
    /// Vessel name, AIS static data
    #[serde(default)]
    pub name: Option<String>,
    /// Observation time in seconds
    pub timestamp: f64,
}

impl Detection {
    pub fn radar(sensor_id: impl Into<String>, lat: f64, lon: f64, timestamp: f64) -> Self {
        Self::new(SourceType::Radar, sensor_id, lat, lon, timestamp)
    }

    pub fn ais(mmsi: impl Into<String>, lat: f64, lon: f64, timestamp: f64) -> Self {
        Self::new(SourceType::Ais, mmsi, lat, lon, timestamp)
    }

    fn new(
        source_type: SourceType,
        sensor_id: impl Into<String>,
        lat: f64,
        lon: f64,
        timestamp: f64,
    ) -> Self {
        Self {
            source_type,
            sensor_id: sensor_id.into(),
            lat,
            lon,
            speed_kn: None,
            course_deg: None,
            heading_deg: None,
            name: None,
            timestamp,
        }
    }

    /// Attach reported speed over ground (knots) and course (degrees true).
    pub fn with_motion(mut self, speed_kn: f64, course_deg: f64) -> Self {
        self.speed_kn = Some(speed_kn);
        self.course_deg = Some(course_deg);
        self
    }

    pub fn with_heading(mut self, heading_deg: f64) -> Self {
        self.heading_deg = Some(heading_deg);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }

    /// Reported velocity as (v_east, v_north) in m/s, if both speed and course are known.
    pub fn velocity_en(&self) -> Option<(f64, f64)> {
        match (self.speed_kn, self.course_deg) {
            (Some(speed), Some(course)) => Some(crate::geo::velocity_from_course(speed, course)),
            _ => None,
        }
    }

    /// Check the record is physically meaningful before it reaches the tracker.
    pub fn validate(&self) -> Result<()> {
        let reject = |reason: String| {
            Err(FusionError::MalformedDetection {
                source_type: self.source_type,
                sensor_id: self.sensor_id.clone(),
                reason,
            })
        };

        if self.sensor_id.trim().is_empty() {
            return reject("empty sensor id".into());
        }
        if !self.timestamp.is_finite() {
            return reject(format!("non-finite timestamp {}", self.timestamp));
        }
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return reject(format!("latitude {} out of range", self.lat));
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return reject(format!("longitude {} out of range", self.lon));
        }
        if let Some(speed) = self.speed_kn {
            if !speed.is_finite() || !(0.0..=MAX_REPORTED_SPEED_KN).contains(&speed) {
                return reject(format!("speed {speed} kn out of range"));
            }
        }
        if let Some(course) = self.course_deg {
            if !course.is_finite() || !(0.0..360.0).contains(&course) {
                return reject(format!("course {course} deg out of range"));
            }
        }
        if let Some(heading) = self.heading_deg {
            if !heading.is_finite() || !(0.0..360.0).contains(&heading) {
                return reject(format!("heading {heading} deg out of range"));
            }
        }
        if self.speed_kn.is_some() != self.course_deg.is_some() {
            return reject("speed and course must be reported together".into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DetectionBatch: detections from one modality received together
// ---------------------------------------------------------------------------

/// A batch of detections submitted by one sensor feed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub source_type: SourceType,
    /// Time the batch was enqueued by the feed
    pub received_at: f64,
    pub detections: Vec<Detection>,
}
