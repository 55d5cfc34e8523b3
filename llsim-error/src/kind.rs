//! Error kinds for llsim operations

use std::fmt;

/// The kind of error that occurred.
///
/// This enum categorizes errors to help users write clear error handling logic.
/// Users can match on ErrorKind to decide how to handle specific error cases;
/// the simulation runtime uses it to tally per-tick failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // =========================================================================
    // General errors
    // =========================================================================
    /// Invalid configuration or parameters
    ConfigInvalid,

    /// Invalid argument passed to function
    InvalidArgument,

    // =========================================================================
    // Backend adapter errors
    // =========================================================================
    /// Provider name in a backend selection is not recognized
    UnsupportedBackend,

    /// The backend did not answer in time
    BackendTimeout,

    /// The backend refused the call because of rate limits
    BackendRateLimited,

    /// The backend could not be reached or rejected the call
    BackendUnavailable,

    /// The backend answered, but not with anything usable
    MalformedResponse,

    // =========================================================================
    // Reasoning errors
    // =========================================================================
    /// Model output did not contain the requested reasoning/action segments
    ParseFailure,

    // =========================================================================
    // Executor errors
    // =========================================================================
    /// Action name is not in the agent's capability set
    UnknownAction,

    /// A registered action rejected its arguments or the current state
    ActionFailed,

    // =========================================================================
    // Scheduler errors
    // =========================================================================
    /// The model reached its step budget or was stopped
    SimulationFinished,

    // =========================================================================
    // IO errors
    // =========================================================================
    /// Serialization/deserialization failed
    SerializationFailed,

    /// IO operation failed
    IoFailed,
}

impl ErrorKind {
    /// Returns the error kind as a static string
    pub fn as_str(&self) -> &'static str {
        match self {
            // General
            ErrorKind::ConfigInvalid => "ConfigInvalid",
            ErrorKind::InvalidArgument => "InvalidArgument",

            // Backend
            ErrorKind::UnsupportedBackend => "UnsupportedBackend",
            ErrorKind::BackendTimeout => "BackendTimeout",
            ErrorKind::BackendRateLimited => "BackendRateLimited",
            ErrorKind::BackendUnavailable => "BackendUnavailable",
            ErrorKind::MalformedResponse => "MalformedResponse",

            // Reasoning
            ErrorKind::ParseFailure => "ParseFailure",

            // Executor
            ErrorKind::UnknownAction => "UnknownAction",
            ErrorKind::ActionFailed => "ActionFailed",

            // Scheduler
            ErrorKind::SimulationFinished => "SimulationFinished",

            // IO
            ErrorKind::SerializationFailed => "SerializationFailed",
            ErrorKind::IoFailed => "IoFailed",
        }
    }

    /// Check if this error kind is retryable by default
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::BackendTimeout
                | ErrorKind::BackendRateLimited
                | ErrorKind::BackendUnavailable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
