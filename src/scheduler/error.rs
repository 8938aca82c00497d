//! Engine error taxonomy. Only configuration-time failures surface here;
//! execution outcomes are recorded as runs and never become errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed schedule parameters, unknown target, or a taken name.
    #[error("validation failed: {0}")]
    Validation(String),

    /// pause/resume called from a state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
