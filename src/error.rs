//! Error types for the mixing engine.
//!
//! Errors are only produced on the non-real-time control path. They indicate
//! bugs in the host or the control app rather than conditions the engine can
//! recover from, so the engine reports them upward without retrying. The
//! real-time path never errors; unknown clients produce silence and default
//! control values instead.

use crate::client::{ClientId, ProcessId};

/// Errors returned by the engine's non-real-time control operations.
///
/// Control operations fail atomically: when an operation returns an error,
/// no state change from the failing request entry has been applied.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An operation referenced a client id that was never added.
    #[error("client {client_id} was never added")]
    InvalidClient {
        /// The unknown client id.
        client_id: ClientId,
    },

    /// An IO reference count would overflow on start or underflow on stop.
    #[error("illegal IO state transition: {reason}")]
    IllegalOperation {
        /// What went wrong with the counter.
        reason: &'static str,
    },

    /// A negative PID was passed to the music-player designator.
    #[error("invalid music player PID: {pid}")]
    InvalidPid {
        /// The rejected PID.
        pid: ProcessId,
    },

    /// An app-volume entry was malformed or carried an out-of-range volume
    /// or EQ value.
    #[error("invalid app volume entry: {reason}")]
    InvalidRelativeVolume {
        /// Which validation failed.
        reason: &'static str,
    },

    /// A pan position was outside the raw pan range.
    #[error("pan position {value} out of range")]
    InvalidPanPosition {
        /// The rejected raw pan value.
        value: i32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::InvalidClient { client_id: 42 };
        assert_eq!(err.to_string(), "client 42 was never added");
    }

    #[test]
    fn test_invalid_pan_display() {
        let err = EngineError::InvalidPanPosition { value: 101 };
        assert_eq!(err.to_string(), "pan position 101 out of range");
    }
}
