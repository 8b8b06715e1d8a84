//! Retry with exponential backoff around completion calls.
//!
//! Every [`ApiError`] except [`ApiError::Auth`] is treated as transient. An
//! attempt budget of `max_attempts` counts the first try, so the default of 3
//! means up to two retries, sleeping `base_delay * backoff_factor^(n-1)`
//! after failed attempt `n`.
//!
//! Streams cannot be resumed: [`retry_stream`] re-opens and re-reads the
//! whole stream on each attempt, so a fragment callback may see the same
//! prefix more than once.

use crate::TextStream;
use crate::error::ApiError;
use futures::StreamExt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Multiplier applied to the delay for each further attempt.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    /// Sleep after failed attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Run `op` until it succeeds, fails with an auth error, or the attempt
/// budget runs out. Returns the last error on exhaustion.
pub async fn retry<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => match backoff(config, attempt, &e) {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(e),
            },
        }
    }
}

/// Streaming variant of [`retry`].
///
/// Each attempt opens a fresh stream with `open` and drains it, passing every
/// fragment to `on_fragment` as it arrives. An error while opening or
/// mid-stream fails the whole attempt. Returns the concatenated text of the
/// successful attempt.
pub async fn retry_stream<F, Fut, C>(
    config: &RetryConfig,
    mut open: F,
    mut on_fragment: C,
) -> Result<String, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<TextStream, ApiError>>,
    C: FnMut(&str),
{
    let mut attempt = 1;
    loop {
        match drain(open().await, &mut on_fragment).await {
            Ok(text) => return Ok(text),
            Err(e) => match backoff(config, attempt, &e) {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(e),
            },
        }
    }
}

async fn drain<C: FnMut(&str)>(
    opened: Result<TextStream, ApiError>,
    on_fragment: &mut C,
) -> Result<String, ApiError> {
    let mut stream = opened?;
    let mut text = String::new();
    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        on_fragment(&fragment);
        text.push_str(&fragment);
    }
    Ok(text)
}

/// How long to wait before retrying after `error` on `attempt`, or `None`
/// to give up.
fn backoff(config: &RetryConfig, attempt: u32, error: &ApiError) -> Option<Duration> {
    let attempts = config.attempts();
    if !error.is_retryable() {
        debug!("Not retrying: {error}");
        return None;
    }
    if attempt >= attempts {
        warn!("Giving up after {attempt} attempt(s): {error}");
        return None;
    }
    let delay = config.delay_for_attempt(attempt);
    warn!(
        "Attempt {attempt}/{attempts} failed: {error}. Retrying in {:.1}s",
        delay.as_secs_f64()
    );
    Some(delay)
}
