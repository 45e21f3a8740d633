//! Error types for pipeline construction

use crate::backend::BackendError;
use thiserror::Error;

/// Errors that prevent a precompute pipeline from being built or a stage from running
#[derive(Error, Debug)]
pub enum PrecomputeError {
    #[error("Graphics backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Invalid precompute configuration: {0}")]
    InvalidConfig(String),
    #[error("Stage input is missing: {0}")]
    MissingInput(&'static str),
}

pub type PrecomputeResult<T> = Result<T, PrecomputeError>;
