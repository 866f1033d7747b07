//! Error taxonomy for room and game operations.
//!
//! Validation failures are detected before any mutation; conflict errors
//! surface optimistic-write races the caller may retry.

use thiserror::Error;

/// Convenience alias used across the engine, store and deck modules.
pub type GameResult<T> = Result<T, GameError>;

/// Root error type for all game operations.
#[derive(Debug, Error)]
pub enum GameError {
    /// Action invalid for the current stage, bet out of range, actor not
    /// seated, or similar user-correctable input. No mutation performed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Room, player or hand missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic version mismatch after bounded retries.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Deck provider unreachable or unrecoverable after retries.
    #[error("deck provider failure: {0}")]
    Provider(String),

    /// Unexpected failure, possibly after a partial mutation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GameError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

impl From<serde_json::Error> for GameError {
    fn from(e: serde_json::Error) -> Self {
        GameError::Internal(format!("state encoding failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GameError::bad_request("bet below minimum");
        assert!(err.to_string().contains("bad request"));
        assert!(err.to_string().contains("bet below minimum"));
    }

    #[test]
    fn test_json_error_conversion() {
        let bad = serde_json::from_str::<serde_json::Value>("{");
        let err: GameError = bad.unwrap_err().into();
        assert!(matches!(err, GameError::Internal(_)));
    }
}
