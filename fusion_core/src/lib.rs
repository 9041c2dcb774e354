//! `fusion_core`: Radar/AIS multi-sensor track fusion and estimation engine.
//!
//! # Module layout
//! - [`types`]: Fundamental types (ids, detections, state vectors)
//! - [`error`]: Error taxonomy
//! - [`geo`]: Great-circle distance, local tangent plane, bearings
//! - [`config`]: Engine configuration (JSON, defaulted, validated)
//! - [`kf`]: Constant-velocity Kalman filter and shared numerics
//! - [`ekf`]: Coordinated-turn extended Kalman filter
//! - [`ukf`]: Coordinated-turn unscented Kalman filter
//! - [`imm`]: Interacting Multiple Model bank
//! - [`estimator`]: Per-track estimator (single model or IMM)
//! - [`gating`]: Kinematic cost, χ² gate, spatial grid
//! - [`association`]: Bipartite graph, components, greedy / Hungarian solvers
//! - [`track`]: Track struct, status and public views
//! - [`track_manager`]: Birth / confirmation / coasting / deletion logic
//! - [`trajectory`]: Bounded per-track history, summary stats and path prediction
//! - [`fuser`]: Radar/AIS pairing into fused targets
//! - [`alert`]: Speed, zone, CPA and unidentified-vessel alerts
//! - [`snapshot`]: Immutable published picture
//! - [`ingest`]: Bounded per-source ingestion queues
//! - [`pipeline`]: One full fusion cycle
//! - [`engine`]: Engine owner, worker thread and shared handle
//! - [`metrics`]: RMSE, precision/recall, fused-id switches

pub mod alert;
pub mod association;
pub mod config;
pub mod ekf;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod fuser;
pub mod gating;
pub mod geo;
pub mod imm;
pub mod ingest;
pub mod kf;
pub mod metrics;
pub mod pipeline;
pub mod snapshot;
pub mod track;
pub mod track_manager;
pub mod trajectory;
pub mod types;
pub mod ukf;

pub use alert::{Alert, AlertKind, Severity};
pub use config::{EngineConfig, FilterKind};
pub use engine::{Engine, EngineHandle};
pub use error::{FusionError, Result};
pub use fuser::{FusedTarget, FusionStats};
pub use pipeline::FusionPipeline;
pub use snapshot::{CycleStats, Snapshot};
pub use track::{Track, TrackDetail, TrackStatus, TrackView};
pub use trajectory::{Compass, TrajectoryPoint, TrajectoryStats};
pub use types::{
    Detection, DetectionBatch, FusedId, GeoPoint, SourceType, StateCov, StateVec, TargetSource,
    TrackId,
};
