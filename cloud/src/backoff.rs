//! Exponential backoff for provider API calls.
//!
//! Every retriable call runs through [`BackoffPolicy::run`] with an
//! independent copy of the schedule, so concurrent calls never share delay
//! state. The companion [`BackoffPolicy::classify_http`] turns a transport
//! result into a retry decision.

use crate::error::CloudError;
use std::{future::Future, time::Duration};

/// Environment variable overriding the initial delay, e.g. `500ms` or `2s`.
pub const BACKOFF_DURATION_ENV: &str = "BACKOFF_DURATION";
/// Environment variable overriding the delay multiplier.
pub const BACKOFF_FACTOR_ENV: &str = "BACKOFF_FACTOR";
/// Environment variable overriding the number of attempts.
pub const BACKOFF_STEPS_ENV: &str = "BACKOFF_STEPS";

const DEFAULT_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_FACTOR: f64 = 2.0;
const DEFAULT_STEPS: u32 = 5;

/// HTTP statuses the provider answers with under throttling or transient
/// internal failure.
const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Outcome of one attempt of a retriable operation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Attempt<T> {
    /// The operation finished with this value.
    Done(T),
    /// The operation should run again after the next delay.
    Retry,
}

/// An exponential backoff schedule.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    initial: Duration,
    factor: f64,
    steps: u32,
    retry_on_errors: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_env()
    }
}

impl BackoffPolicy {
    /// Schedule with the built-in defaults, overridden by the `BACKOFF_*`
    /// environment variables when set.
    pub fn from_env() -> Self {
        Self {
            initial: env_duration(BACKOFF_DURATION_ENV).unwrap_or(DEFAULT_DURATION),
            factor: env_parse(BACKOFF_FACTOR_ENV).unwrap_or(DEFAULT_FACTOR),
            steps: env_parse(BACKOFF_STEPS_ENV).unwrap_or(DEFAULT_STEPS),
            retry_on_errors: false,
        }
    }

    /// Override the attempt count for a single call site.
    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps.max(1);
        self
    }

    /// Also retry when the request fails without a retryable HTTP status.
    pub fn with_retry_on_errors(mut self) -> Self {
        self.retry_on_errors = true;
        self
    }

    /// Repeatedly invokes `op` until it returns [`Attempt::Done`], fails, or
    /// the schedule runs out. The first invocation happens without a prior
    /// delay. Cancellation is drop-based: dropping the returned future stops
    /// the schedule.
    pub async fn run<T, F, Fut>(&self, action: &'static str, mut op: F) -> Result<T, CloudError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Attempt<T>, CloudError>>,
    {
        let mut delay = self.initial;
        for step in 0..self.steps {
            if step > 0 {
                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(self.factor);
            }
            match op().await? {
                Attempt::Done(value) => return Ok(value),
                Attempt::Retry => {
                    tracing::debug!(action, attempt = step + 1, "retrying after backoff");
                }
            }
        }
        Err(CloudError::RetriesExhausted {
            action,
            attempts: self.steps,
        })
    }

    /// Classifies a transport result into a retry decision.
    ///
    /// Throttling and transient server statuses retry; other failures retry
    /// only when the schedule was built with retry-on-errors; everything else
    /// terminates with the parsed API error.
    pub fn classify_http<T>(&self, result: Result<T, CloudError>) -> Result<Attempt<T>, CloudError> {
        match result {
            Ok(value) => Ok(Attempt::Done(value)),
            Err(err) => {
                let status = err.http_status();
                if status.map(|s| RETRYABLE_STATUSES.contains(&s)).unwrap_or(false) {
                    return Ok(Attempt::Retry);
                }
                if self.retry_on_errors {
                    return Ok(Attempt::Retry);
                }
                Err(err)
            }
        }
    }
}

fn env_duration(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    if let Ok(duration) = humantime::parse_duration(&raw) {
        return Some(duration);
    }
    match raw.parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring unparseable duration");
            None
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring unparseable value");
            None
        }
    }
}
