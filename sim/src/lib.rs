//! `sim`: Harbour scenario simulator: vessels, radar and AIS sensor
//! simulation, replay logs and scored runs through the fusion engine.

pub mod replay;
pub mod runner;
pub mod scenarios;
pub mod sensor_sim;
pub mod vessel;

pub use replay::{load_replay, read_replay, ReplayRecord, ReplayWriter};
pub use runner::{run_records, RunSummary, Runner, DEFAULT_MATCH_RADIUS_M};
pub use scenarios::{Playback, Scenario, ScenarioKind};
pub use sensor_sim::{AisSimConfig, RadarSimConfig, SensorSimulator};
pub use vessel::{Motion, Transponder, Vessel};
