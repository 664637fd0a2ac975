//! Error taxonomy for the game core.
//!
//! Invalid player intents are not errors at all: they are silently
//! dropped by the room (the offending client simply sees no state
//! change). `GameError` covers the cases that must be surfaced.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GameError {
    /// A grid access with indices outside the configured width/height.
    /// Callers inside the core are expected to bounds-check first, so
    /// hitting this means corrupted state. It terminates the affected
    /// room only, never the service.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GameError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
