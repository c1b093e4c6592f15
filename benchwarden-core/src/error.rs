use thiserror::Error;

use crate::{
    orchestration::runner::RunnerError,
    report::ParseError,
    types::{RunStatus, ids::ResourceKey},
};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(ResourceKey),

    #[error("Invalid transition {from:?} -> {to:?}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("Invalid profile reference: {0}")]
    InvalidProfile(String),

    #[error("Invalid cadence expression '{expression}': {reason}")]
    InvalidCadence { expression: String, reason: String },

    #[error("Job runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("Report parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;
