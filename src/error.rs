//! Unified error handling for the workout tracker.
//!
//! Every variant here is a contract violation by the caller (starting twice,
//! feeding time backwards) or a failure to build host plumbing. Missing
//! location permission while a workout runs is *not* an error: the tracker
//! models it as a state and keeps polling.

use thiserror::Error;

/// Unified error type for tracker operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum TrackerError {
    /// `start()` was called while a workout is already in progress
    #[error("Workout already started")]
    AlreadyStarted,

    /// A repeating timer was started twice without `stop()` in between
    #[error("Timer was already started")]
    TimerAlreadyStarted,

    /// A location subscription was required but permission is missing
    #[error("Location permission is not granted")]
    PermissionDenied,

    /// A fix was offered with a timestamp that does not advance past the previous one
    #[error("Timestamp {current} does not advance past previous timestamp {previous}")]
    NonMonotonicTimestamp { previous: i64, current: i64 },

    /// A clock was asked to move to a negative time or by a negative amount
    #[error("Millis are required to be >= 0, got {millis}")]
    NegativeTime { millis: i64 },

    /// The async runtime backing the timer could not be created
    #[error("Runtime error: {message}")]
    Runtime { message: String },

    /// A mobile session call arrived before `session_init`
    #[error("Workout session not initialized")]
    SessionNotInitialized,
}

/// Result type alias for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
