//! Error types for the fusion engine.

use crate::types::{SourceType, TrackId};
use thiserror::Error;

/// Result type alias for the fusion engine
pub type Result<T> = std::result::Result<T, FusionError>;

/// Errors raised by ingestion, estimation, queries and configuration.
#[derive(Error, Debug)]
pub enum FusionError {
    /// Rejected at the ingestion boundary; never reaches the track state machine.
    #[error("malformed {source_type} detection from '{sensor_id}': {reason}")]
    MalformedDetection {
        source_type: SourceType,
        sensor_id: String,
        reason: String,
    },

    /// Covariance lost positive semi-definiteness or the state became non-finite.
    #[error("numeric divergence in {filter} filter: {reason}")]
    NumericDivergence { filter: &'static str, reason: String },

    /// Several candidates were equally good; the lowest track id won.
    #[error("ambiguous association for detection {detection}: {candidates} equal-cost tracks, chose {chosen}")]
    AssociationAmbiguity {
        detection: usize,
        candidates: usize,
        chosen: TrackId,
    },

    #[error("unknown target id {0}")]
    UnknownTargetId(TrackId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FusionError {
    pub fn divergence<S: Into<String>>(filter: &'static str, reason: S) -> Self {
        Self::NumericDivergence {
            filter,
            reason: reason.into(),
        }
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
