//! Error status - how the caller should react to an error

use std::fmt;

/// Whether an error is worth retrying.
///
/// Errors start out either `Permanent` or `Temporary` (see
/// [`ErrorKind::is_retryable`](crate::ErrorKind::is_retryable)). A temporary
/// error that survived the whole retry budget becomes `Persistent`, so the
/// next layer up knows retrying again is pointless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorStatus {
    /// Retrying will not help
    Permanent,
    /// Retrying may succeed
    Temporary,
    /// Was temporary, but retries are exhausted
    Persistent,
}

impl ErrorStatus {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorStatus::Temporary)
    }

    /// Transition after a failed retry loop. Only `Temporary` moves.
    pub fn persist(self) -> Self {
        match self {
            ErrorStatus::Temporary => ErrorStatus::Persistent,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStatus::Permanent => "permanent",
            ErrorStatus::Temporary => "temporary",
            ErrorStatus::Persistent => "persistent",
        }
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
