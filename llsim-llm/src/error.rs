//! Backend error helpers
//!
//! Re-exports llsim-error and maps transport failures onto the adapter
//! taxonomy: timeout, rate limit, unavailable, malformed response.

pub use llsim_error::{Error, ErrorKind, ErrorStatus, Result};

/// Map a reqwest transport error.
pub fn from_reqwest(err: reqwest::Error, operation: &'static str) -> Error {
    let base = if err.is_timeout() {
        Error::backend_timeout("request timed out")
    } else if err.is_decode() {
        Error::malformed_response("response body could not be decoded")
    } else if err.is_builder() {
        Error::config_invalid("request could not be built")
    } else {
        Error::backend_unavailable(err.to_string())
    };
    base.with_operation(operation).set_source(err)
}

/// Map a non-success HTTP status.
///
/// 429 and 5xx are worth retrying. Anything else in the 4xx range means the
/// request itself (or its credentials) is wrong, so it is marked permanent.
pub fn from_status(
    status: u16,
    body: impl Into<String>,
    retry_after: Option<u64>,
    operation: &'static str,
) -> Error {
    let body = body.into();
    let err = match status {
        429 => Error::rate_limited(retry_after),
        500..=599 => Error::backend_unavailable(body),
        _ => Error::backend_unavailable(body).permanent(),
    };
    err.with_operation(operation)
        .with_context("status", status.to_string())
}

/// Wrap a body that did not deserialize into the provider's response shape.
pub fn malformed_json(err: serde_json::Error, operation: &'static str) -> Error {
    Error::malformed_response(format!("unexpected response shape: {}", err))
        .with_operation(operation)
        .set_source(err)
}

/// Parse a `retry-after` header given in whole seconds.
pub fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
