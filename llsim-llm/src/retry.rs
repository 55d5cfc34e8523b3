//! Bounded exponential backoff around any backend.
//!
//! Transient failures (timeout, rate limit, temporarily unavailable) are
//! retried inside the adapter. When the budget is spent the last error is
//! marked persistent and handed up, where it becomes a failure of one agent's
//! step and nothing more.

use crate::provider::{Backend, BackendRequest, BackendResponse};
use async_trait::async_trait;
use llsim_error::Result;
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry budget and backoff shape.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one (minimum 1)
    pub max_attempts: usize,
    /// Delay before the first retry
    #[serde(with = "millis", rename = "initial_delay_ms")]
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    #[serde(with = "millis", rename = "max_delay_ms")]
    pub max_delay: Duration,
    pub multiplier: f64,
    /// ±10% jitter on each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay after the given failed attempt (0-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let millis = if self.jitter {
            capped * rand::rng().random_range(0.9..=1.1)
        } else {
            capped
        };
        Duration::from_millis(millis as u64)
    }
}

/// A backend wrapper that applies a [`RetryPolicy`].
pub struct Retrying<B> {
    inner: B,
    policy: RetryPolicy,
}

impl<B: Backend> Retrying<B> {
    pub fn new(inner: B, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B: Backend> Backend for Retrying<B> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    async fn send(&self, request: &BackendRequest) -> Result<BackendResponse> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.inner.send(request).await {
                Ok(response) => {
                    if attempt > 1 {
                        debug!(backend = self.name(), attempt, "backend call succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err.with_context("attempts", attempt.to_string()));
            }
            if attempt >= max_attempts {
                warn!(backend = self.name(), attempts = attempt, error = %err, "retry budget exhausted");
                return Err(err
                    .persist()
                    .with_context("attempts", attempt.to_string()));
            }

            let mut delay = self.policy.delay_for(attempt - 1);
            if let Some(secs) = err
                .context_value("retry_after_secs")
                .and_then(|v| v.parse::<u64>().ok())
            {
                delay = delay.max(Duration::from_secs(secs)).min(self.policy.max_delay);
            }

            warn!(
                backend = self.name(),
                attempt,
                kind = %err.kind(),
                delay_ms = delay.as_millis() as u64,
                "transient backend failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ScriptedBackend;
    use llsim_error::{ErrorKind, ErrorStatus};

    fn fast_policy(attempts: usize) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(attempts)
            .with_initial_delay(Duration::from_millis(1))
            .without_jitter()
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let d = policy.delay_for(0).as_millis();
            assert!((225..=275).contains(&d), "delay {} out of range", d);
        }
    }

    #[tokio::test]
    async fn test_two_timeouts_then_success() {
        let backend = Retrying::new(
            ScriptedBackend::new()
                .fail(ErrorKind::BackendTimeout)
                .fail(ErrorKind::BackendTimeout)
                .reply("finally"),
            fast_policy(3),
        );

        let response = backend.send(&BackendRequest::default()).await.unwrap();
        assert_eq!(response.content, "finally");
        assert_eq!(backend.inner().calls(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_marks_persistent() {
        let backend = Retrying::new(
            ScriptedBackend::new()
                .fail(ErrorKind::BackendRateLimited)
                .fail(ErrorKind::BackendRateLimited)
                .reply("too late"),
            fast_policy(2),
        );

        let err = backend.send(&BackendRequest::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendRateLimited);
        assert_eq!(err.status(), ErrorStatus::Persistent);
        assert_eq!(err.context_value("attempts"), Some("2"));
        assert_eq!(backend.inner().calls(), 2);
    }

    #[tokio::test]
    async fn test_malformed_response_not_retried() {
        let backend = Retrying::new(
            ScriptedBackend::new()
                .fail(ErrorKind::MalformedResponse)
                .reply("unused"),
            fast_policy(5),
        );

        let err = backend.send(&BackendRequest::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
        assert_eq!(backend.inner().calls(), 1);
    }

    #[test]
    fn test_policy_from_toml_fields() {
        let policy: RetryPolicy = serde_json::from_value(serde_json::json!({
            "max_attempts": 5,
            "initial_delay_ms": 50
        }))
        .unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(50));
        assert_eq!(policy.max_delay, Duration::from_secs(8));
    }
}
