//! The main Error type for llsim

use crate::{ErrorKind, ErrorStatus};
use std::fmt;

/// The unified error type for all llsim operations.
///
/// This error type provides:
/// - `kind`: What type of error occurred
/// - `message`: Human-readable description
/// - `status`: Whether the error is retryable
/// - `operation`: What operation caused the error
/// - `context`: Key-value pairs for debugging
/// - `source`: The underlying error (if any)
///
/// # Example
///
/// ```rust
/// use llsim_error::{Error, ErrorKind, ErrorStatus};
///
/// let err = Error::new(ErrorKind::BackendTimeout, "no answer after 30s")
///     .with_operation("openai::send")
///     .with_context("model", "gpt-4o-mini")
///     .with_context("attempt", "2");
///
/// assert_eq!(err.kind(), ErrorKind::BackendTimeout);
/// assert!(err.status().is_retryable());
/// ```
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: ErrorStatus,
    operation: &'static str,
    context: Vec<(&'static str, String)>,
    source: Option<anyhow::Error>,
}

impl Error {
    /// Create a new error with the given kind and message
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let status = if kind.is_retryable() {
            ErrorStatus::Temporary
        } else {
            ErrorStatus::Permanent
        };

        Self {
            kind,
            message: message.into(),
            status,
            operation: "",
            context: Vec::new(),
            source: None,
        }
    }

    // =========================================================================
    // Getters
    // =========================================================================

    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the error status
    pub fn status(&self) -> ErrorStatus {
        self.status
    }

    /// Get the operation that caused this error
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Get the context key-value pairs
    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    /// Look up a context value by key (first match)
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Get the source error (if any)
    pub fn source_ref(&self) -> Option<&anyhow::Error> {
        self.source.as_ref()
    }

    // =========================================================================
    // Builders (chainable)
    // =========================================================================

    /// Set the error status
    pub fn with_status(mut self, status: ErrorStatus) -> Self {
        self.status = status;
        self
    }

    /// Mark as temporary (retryable)
    pub fn temporary(mut self) -> Self {
        self.status = ErrorStatus::Temporary;
        self
    }

    /// Mark as permanent (not retryable)
    pub fn permanent(mut self) -> Self {
        self.status = ErrorStatus::Permanent;
        self
    }

    /// Set the operation that caused this error.
    ///
    /// If an operation was already set, the previous one is moved to context
    /// as "called" to preserve the call chain.
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        if !self.operation.is_empty() {
            self.context.push(("called", self.operation.to_string()));
        }
        self.operation = operation;
        self
    }

    /// Add context to the error
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Set the source error.
    ///
    /// # Panics (debug only)
    /// Panics in debug mode if source was already set.
    pub fn set_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "source error already set");
        self.source = Some(source.into());
        self
    }

    // =========================================================================
    // Status mutations
    // =========================================================================

    /// Mark as persistent after failed retries
    pub fn persist(mut self) -> Self {
        self.status = self.status.persist();
        self
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        self.status.is_retryable()
    }
}

// =============================================================================
// Display - compact, single-line format for logs
// =============================================================================

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) at {}", self.kind, self.status, self.operation)?;

        if !self.context.is_empty() {
            write!(f, ", context {{ ")?;
            for (i, (key, value)) in self.context.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", key, value)?;
            }
            write!(f, " }}")?;
        }

        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }

        Ok(())
    }
}

// =============================================================================
// Debug - verbose, multi-line format for debugging
// =============================================================================

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({}) at {}", self.kind, self.status, self.operation)?;

        if !self.message.is_empty() {
            writeln!(f)?;
            writeln!(f, "    Message: {}", self.message)?;
        }

        if !self.context.is_empty() {
            writeln!(f)?;
            writeln!(f, "    Context:")?;
            for (key, value) in &self.context {
                writeln!(f, "        {}: {}", key, value)?;
            }
        }

        if let Some(source) = &self.source {
            writeln!(f)?;
            writeln!(f, "    Source: {:?}", source)?;
        }

        Ok(())
    }
}

// =============================================================================
// std::error::Error implementation
// =============================================================================

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// =============================================================================
// Convenient From implementations (be careful not to leak raw errors!)
// =============================================================================

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::IoFailed, err.to_string())
            .with_operation("io")
            .set_source(err)
    }
}

// =============================================================================
// Convenience constructors
// =============================================================================

impl Error {
    /// Create a ConfigInvalid error
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, message)
    }

    /// Create an UnsupportedBackend error
    pub fn unsupported_backend(provider: impl Into<String>) -> Self {
        let provider = provider.into();
        Self::new(
            ErrorKind::UnsupportedBackend,
            format!("provider '{}' is not supported", provider),
        )
        .with_context("provider", provider)
    }

    /// Create a BackendTimeout error
    pub fn backend_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendTimeout, message)
    }

    /// Create a BackendRateLimited error
    pub fn rate_limited(retry_after: Option<u64>) -> Self {
        let err = Self::new(ErrorKind::BackendRateLimited, "rate limit exceeded");
        match retry_after {
            Some(secs) => err.with_context("retry_after_secs", secs.to_string()),
            None => err,
        }
    }

    /// Create a BackendUnavailable error
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendUnavailable, message)
    }

    /// Create a MalformedResponse error
    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedResponse, message)
    }

    /// Create a ParseFailure error
    pub fn parse_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseFailure, message)
    }

    /// Create an UnknownAction error
    pub fn unknown_action(action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(ErrorKind::UnknownAction, format!("action '{}' is not registered", action))
            .with_context("action", action)
    }

    /// Create an ActionFailed error
    pub fn action_failed(action: impl Into<String>, reason: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(ErrorKind::ActionFailed, reason).with_context("action", action)
    }

    /// Create an InvalidArgument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Create a SerializationFailed error
    pub fn serialization_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SerializationFailed, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::new(ErrorKind::ParseFailure, "missing <action> block");
        assert_eq!(err.kind(), ErrorKind::ParseFailure);
        assert_eq!(err.message(), "missing <action> block");
        assert_eq!(err.status(), ErrorStatus::Permanent);
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::new(ErrorKind::BackendTimeout, "timeout")
            .with_operation("openai::send")
            .with_context("model", "gpt-4o")
            .with_context("attempt", "1");

        assert_eq!(err.operation(), "openai::send");
        assert_eq!(err.context().len(), 2);
        assert_eq!(err.context()[0], ("model", "gpt-4o".to_string()));
        assert_eq!(err.context_value("attempt"), Some("1"));
        assert_eq!(err.context_value("missing"), None);
    }

    #[test]
    fn test_operation_chaining() {
        let err = Error::new(ErrorKind::BackendUnavailable, "connection refused")
            .with_operation("openai::send")
            .with_operation("reasoning::plan");

        assert_eq!(err.operation(), "reasoning::plan");
        assert_eq!(err.context().len(), 1);
        assert_eq!(err.context()[0], ("called", "openai::send".to_string()));
    }

    #[test]
    fn test_default_status_follows_kind() {
        let err = Error::new(ErrorKind::BackendRateLimited, "slow down");
        assert!(err.is_retryable());

        let err = Error::new(ErrorKind::UnknownAction, "fly");
        assert!(!err.is_retryable());

        let err = Error::backend_unavailable("401 unauthorized").permanent();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_persist() {
        let err = Error::backend_timeout("no answer");
        assert!(err.is_retryable());

        let err = err.persist();
        assert!(!err.is_retryable());
        assert_eq!(err.status(), ErrorStatus::Persistent);
    }

    #[test]
    fn test_display() {
        let err = Error::new(ErrorKind::BackendUnavailable, "503 from upstream")
            .with_operation("anthropic::send")
            .with_context("model", "claude-3-5-haiku")
            .with_context("attempt", "3");

        let display = format!("{}", err);
        assert!(display.contains("BackendUnavailable"));
        assert!(display.contains("temporary"));
        assert!(display.contains("anthropic::send"));
        assert!(display.contains("model: claude-3-5-haiku"));
    }

    #[test]
    fn test_convenience_constructors() {
        let err = Error::unknown_action("fly");
        assert_eq!(err.kind(), ErrorKind::UnknownAction);
        assert_eq!(err.context_value("action"), Some("fly"));

        let err = Error::unsupported_backend("watsonx");
        assert_eq!(err.kind(), ErrorKind::UnsupportedBackend);
        assert!(err.message().contains("watsonx"));

        let err = Error::rate_limited(Some(12));
        assert_eq!(err.context_value("retry_after_secs"), Some("12"));
    }

    #[test]
    fn test_set_source() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = Error::malformed_response("response body is not JSON").set_source(json_err);

        assert!(err.source_ref().is_some());
        assert!(std::error::Error::source(&err).is_some());
    }
}
