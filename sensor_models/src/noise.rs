//! Polar measurement noise of a radar, expressed in the local east/north plane.

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

/// Range / bearing noise of a surface-search radar.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolarNoise {
    /// Range standard deviation (metres)
    pub range_std_m: f64,
    /// Bearing standard deviation (degrees)
    pub bearing_std_deg: f64,
}

impl Default for PolarNoise {
    fn default() -> Self {
        Self {
            range_std_m: 15.0,
            bearing_std_deg: 0.3,
        }
    }
}

impl PolarNoise {
    pub fn new(range_std_m: f64, bearing_std_deg: f64) -> Self {
        Self { range_std_m, bearing_std_deg }
    }

    /// Jacobian of (east, north) = (r·sin b, r·cos b) with respect to (r, b).
    fn jacobian(range_m: f64, bearing_deg: f64) -> Matrix2<f64> {
        let (sb, cb) = bearing_deg.to_radians().sin_cos();
        Matrix2::new(
            sb, range_m * cb,
            cb, -range_m * sb,
        )
    }

    /// Position covariance in the local plane for a plot at `range_m` / `bearing_deg`.
    ///
    /// Cross-range error grows linearly with range, so distant plots get an
    /// elongated ellipse perpendicular to the line of sight.
    pub fn local_cov(&self, range_m: f64, bearing_deg: f64) -> Matrix2<f64> {
        let j = Self::jacobian(range_m, bearing_deg);
        let r = Matrix2::from_diagonal(&Vector2::new(
            self.range_std_m * self.range_std_m,
            self.bearing_std_deg.to_radians().powi(2),
        ));
        j * r * j.transpose()
    }

    /// Isotropic position std with the same total variance as [`Self::local_cov`].
    pub fn equivalent_position_std(&self, range_m: f64) -> f64 {
        let cross = range_m * self.bearing_std_deg.to_radians();
        ((self.range_std_m.powi(2) + cross * cross) / 2.0).sqrt()
    }
}
