//! Simulated vessels and their ground-truth kinematics.
//!
//! Vessels move in the engine's local tangent plane: `east`, `north` in
//! metres and `ve`, `vn` in m/s.

use fusion_core::geo::{course_from_velocity, LocalFrame};
use fusion_core::metrics::GroundTruth;
use serde::{Deserialize, Serialize};

/// How a vessel moves between steps.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Motion {
    /// Constant velocity.
    Straight,
    /// Constant turn rate (degrees per second, positive = starboard).
    Turn { rate_deg_s: f64 },
    /// Steer toward each `[east, north]` waypoint in turn at `speed_ms`,
    /// stopping at the last one.
    Waypoints { points: Vec<[f64; 2]>, speed_ms: f64 },
    /// Switch motion at given times; the active entry is the last one
    /// whose start time has passed.
    Segmented { segments: Vec<(f64, Motion)> },
}

/// AIS transponder fitted to a vessel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transponder {
    pub mmsi: u32,
    pub name: String,
    /// The transponder stops transmitting from this time on
    #[serde(default)]
    pub silent_after: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Vessel {
    pub id: u64,
    pub east: f64,
    pub north: f64,
    pub ve: f64,
    pub vn: f64,
    pub motion: Motion,
    /// `None` for vessels that carry no AIS (small craft, intruders)
    pub transponder: Option<Transponder>,
    #[serde(default)]
    pub appear_at: Option<f64>,
    #[serde(default)]
    pub disappear_at: Option<f64>,
    /// Index of the next waypoint for `Motion::Waypoints`
    #[serde(skip)]
    waypoint: usize,
}

impl Vessel {
    pub fn new(id: u64, position: [f64; 2], velocity: [f64; 2], motion: Motion) -> Self {
        Self {
            id,
            east: position[0],
            north: position[1],
            ve: velocity[0],
            vn: velocity[1],
            motion,
            transponder: None,
            appear_at: None,
            disappear_at: None,
            waypoint: 0,
        }
    }

    pub fn with_transponder(mut self, mmsi: u32, name: impl Into<String>) -> Self {
        self.transponder = Some(Transponder {
            mmsi,
            name: name.into(),
            silent_after: None,
        });
        self
    }

    pub fn ais_silent_after(mut self, t: f64) -> Self {
        if let Some(tx) = self.transponder.as_mut() {
            tx.silent_after = Some(t);
        }
        self
    }

    pub fn active_between(mut self, appear_at: Option<f64>, disappear_at: Option<f64>) -> Self {
        self.appear_at = appear_at;
        self.disappear_at = disappear_at;
        self
    }

    /// Advance the true state by `dt` seconds; `t` is the time at the start of the step.
    pub fn step(&mut self, t: f64, dt: f64) {
        let motion = self.motion.clone();
        self.advance(&motion, t, dt);
    }

    fn advance(&mut self, motion: &Motion, t: f64, dt: f64) {
        match motion {
            Motion::Straight => {}
            Motion::Turn { rate_deg_s } => {
                // Course increases clockwise, velocity vector rotates by -ω
                let (s, c) = (-rate_deg_s.to_radians() * dt).sin_cos();
                let (ve, vn) = (self.ve, self.vn);
                self.ve = c * ve - s * vn;
                self.vn = s * ve + c * vn;
            }
            Motion::Waypoints { points, speed_ms } => {
                while let Some(wp) = points.get(self.waypoint) {
                    let (de, dn) = (wp[0] - self.east, wp[1] - self.north);
                    let dist = de.hypot(dn);
                    if dist > speed_ms * dt {
                        self.ve = speed_ms * de / dist;
                        self.vn = speed_ms * dn / dist;
                        break;
                    }
                    self.waypoint += 1;
                }
                if self.waypoint >= points.len() {
                    self.ve = 0.0;
                    self.vn = 0.0;
                }
            }
            Motion::Segmented { segments } => {
                if let Some((_, active)) = segments.iter().filter(|(start, _)| *start <= t).last() {
                    self.advance(active, t, dt);
                    return;
                }
            }
        }
        self.east += self.ve * dt;
        self.north += self.vn * dt;
    }

    pub fn is_active(&self, t: f64) -> bool {
        self.appear_at.map_or(true, |a| t >= a) && self.disappear_at.map_or(true, |d| t < d)
    }

    /// The transponder is fitted and still transmitting at `t`.
    pub fn transmits(&self, t: f64) -> bool {
        self.transponder
            .as_ref()
            .is_some_and(|tx| tx.silent_after.map_or(true, |s| t < s))
    }

    /// (speed knots, course degrees true)
    pub fn speed_course(&self) -> (f64, f64) {
        course_from_velocity(self.ve, self.vn)
    }

    pub fn ground_truth(&self, frame: &LocalFrame, t: f64) -> GroundTruth {
        GroundTruth {
            vessel_id: self.id,
            time: t,
            position: frame.to_geodetic(self.east, self.north),
            velocity_ms: [self.ve, self.vn],
        }
    }
}
