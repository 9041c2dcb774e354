//! Geodesy helpers: great-circle distance, local tangent plane, course/speed
//! conversion, polygon containment and edge distance.
//!
//! All filters run in an east/north plane (metres) anchored at the deployment
//! origin. Over a harbour-sized area (tens of kilometres) the equirectangular
//! projection error stays well below radar measurement noise.

use crate::types::{GeoPoint, KNOTS_TO_MS};
use serde::{Deserialize, Serialize};

/// Mean Earth radius (metres).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in metres.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    EARTH_RADIUS_M * 2.0 * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Local east/north tangent plane anchored at `origin`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LocalFrame {
    origin: GeoPoint,
    cos_lat0: f64,
}

impl LocalFrame {
    pub fn new(origin: GeoPoint) -> Self {
        Self {
            origin,
            cos_lat0: origin.lat.to_radians().cos(),
        }
    }

    pub fn origin(&self) -> GeoPoint {
        self.origin
    }

    /// Geodetic → (east, north) metres.
    pub fn to_local(&self, p: GeoPoint) -> (f64, f64) {
        let east = (p.lon - self.origin.lon).to_radians() * EARTH_RADIUS_M * self.cos_lat0;
        let north = (p.lat - self.origin.lat).to_radians() * EARTH_RADIUS_M;
        (east, north)
    }

    /// (east, north) metres → geodetic.
    pub fn to_geodetic(&self, east: f64, north: f64) -> GeoPoint {
        let lat = self.origin.lat + (north / EARTH_RADIUS_M).to_degrees();
        let lon = self.origin.lon + (east / (EARTH_RADIUS_M * self.cos_lat0)).to_degrees();
        GeoPoint::new(lat, lon)
    }
}

/// Speed (knots) and course (degrees true) → (v_east, v_north) in m/s.
pub fn velocity_from_course(speed_kn: f64, course_deg: f64) -> (f64, f64) {
    let v = speed_kn * KNOTS_TO_MS;
    let c = course_deg.to_radians();
    (v * c.sin(), v * c.cos())
}

/// (v_east, v_north) in m/s → (speed knots, course degrees true in [0, 360)).
pub fn course_from_velocity(ve: f64, vn: f64) -> (f64, f64) {
    let speed_kn = (ve * ve + vn * vn).sqrt() / KNOTS_TO_MS;
    let course = ve.atan2(vn).to_degrees().rem_euclid(360.0);
    (speed_kn, course)
}

/// Smallest absolute difference between two bearings, in [0, 180].
pub fn angle_diff_deg(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    if d > 180.0 {
        360.0 - d
    } else {
        d
    }
}

/// Ray-casting containment test on lat/lon vertices (polygon implicitly closed).
pub fn point_in_polygon(p: GeoPoint, polygon: &[GeoPoint]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (pi, pj) = (polygon[i], polygon[j]);
        if (pi.lat > p.lat) != (pj.lat > p.lat) {
            let lon_at = pi.lon + (p.lat - pi.lat) * (pj.lon - pi.lon) / (pj.lat - pi.lat);
            if p.lon < lon_at {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Distance in metres from `p` to the nearest edge of `polygon`, measured
/// in `frame`'s plane. An empty polygon gives `f64::INFINITY`.
pub fn distance_to_polygon_edge_m(frame: &LocalFrame, p: GeoPoint, polygon: &[GeoPoint]) -> f64 {
    let (px, py) = frame.to_local(p);
    let local: Vec<(f64, f64)> = polygon.iter().map(|v| frame.to_local(*v)).collect();
    let mut best = f64::INFINITY;
    for (i, &(ax, ay)) in local.iter().enumerate() {
        let (bx, by) = local[(i + 1) % local.len()];
        let (dx, dy) = (bx - ax, by - ay);
        let len2 = dx * dx + dy * dy;
        let t = if len2 > 0.0 {
            (((px - ax) * dx + (py - ay) * dy) / len2).clamp(0.0, 1.0)
        } else {
            0.0
        };
        best = best.min((px - ax - t * dx).hypot(py - ay - t * dy));
    }
    best
}

/// Bearing in degrees true from `frame`'s origin to local point (east, north).
pub fn bearing_from_origin_deg(east: f64, north: f64) -> f64 {
    east.atan2(north).to_degrees().rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn haversine_same_point_is_zero() {
        let p = GeoPoint::new(30.017, 122.107);
        assert_abs_diff_eq!(haversine_m(p, p), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn haversine_one_millidegree_latitude() {
        let a = GeoPoint::new(30.017, 122.107);
        let b = GeoPoint::new(30.018, 122.107);
        assert_abs_diff_eq!(haversine_m(a, b), 111.19, epsilon = 0.1);
    }

    #[test]
    fn local_frame_roundtrip() {
        let frame = LocalFrame::new(GeoPoint::new(30.017, 122.107));
        let p = GeoPoint::new(30.031, 122.088);
        let (e, n) = frame.to_local(p);
        let back = frame.to_geodetic(e, n);
        assert_abs_diff_eq!(back.lat, p.lat, epsilon = 1e-12);
        assert_abs_diff_eq!(back.lon, p.lon, epsilon = 1e-12);
        // Local distance agrees with great-circle distance at harbour scale
        let d_local = (e * e + n * n).sqrt();
        let d_gc = haversine_m(frame.origin(), p);
        assert!((d_local - d_gc).abs() < 1.0, "local={d_local} gc={d_gc}");
    }

    #[test]
    fn course_speed_roundtrip() {
        let (ve, vn) = velocity_from_course(10.0, 90.0);
        assert_abs_diff_eq!(vn, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(ve, 5.14444, epsilon = 1e-6);
        let (speed, course) = course_from_velocity(ve, vn);
        assert_abs_diff_eq!(speed, 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(course, 90.0, epsilon = 1e-9);
    }

    #[test]
    fn angle_difference_wraps() {
        assert_abs_diff_eq!(angle_diff_deg(350.0, 10.0), 20.0, epsilon = 1e-9);
        assert_abs_diff_eq!(angle_diff_deg(10.0, 350.0), 20.0, epsilon = 1e-9);
        assert_abs_diff_eq!(angle_diff_deg(0.0, 180.0), 180.0, epsilon = 1e-9);
    }

    #[test]
    fn polygon_containment() {
        let square = [
            GeoPoint::new(30.0, 122.0),
            GeoPoint::new(30.0, 122.1),
            GeoPoint::new(30.1, 122.1),
            GeoPoint::new(30.1, 122.0),
        ];
        assert!(point_in_polygon(GeoPoint::new(30.05, 122.05), &square));
        assert!(!point_in_polygon(GeoPoint::new(30.15, 122.05), &square));
        assert!(!point_in_polygon(GeoPoint::new(30.05, 121.95), &square));
    }

    #[test]
    fn edge_distance_outside_and_inside() {
        let frame = LocalFrame::new(GeoPoint::new(30.0, 122.0));
        let square: Vec<GeoPoint> = [(0.0, 0.0), (1000.0, 0.0), (1000.0, 1000.0), (0.0, 1000.0)]
            .iter()
            .map(|&(e, n)| frame.to_geodetic(e, n))
            .collect();
        let outside = frame.to_geodetic(1150.0, 500.0);
        assert_abs_diff_eq!(distance_to_polygon_edge_m(&frame, outside, &square), 150.0, epsilon = 1e-6);
        let corner = frame.to_geodetic(-30.0, -40.0);
        assert_abs_diff_eq!(distance_to_polygon_edge_m(&frame, corner, &square), 50.0, epsilon = 1e-6);
        let inside = frame.to_geodetic(500.0, 100.0);
        assert_abs_diff_eq!(distance_to_polygon_edge_m(&frame, inside, &square), 100.0, epsilon = 1e-6);
    }

    #[test]
    fn bearing_from_origin_is_true_north_based() {
        assert_abs_diff_eq!(bearing_from_origin_deg(0.0, 100.0), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bearing_from_origin_deg(100.0, 0.0), 90.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bearing_from_origin_deg(-100.0, 0.0), 270.0, epsilon = 1e-9);
    }
}
