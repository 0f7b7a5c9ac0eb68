//! Retryable external calls.
//!
//! [`RetryPolicy`] retries timeouts, transient failures and rate limits with exponential backoff.
//! Quota exhaustion is never retried inline; it trips a [`QuotaCooldown`] shared by every run so
//! AI-dependent work pauses until the window passes.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use pricebook_utils::RetryConfig;

use crate::ai_client::AiError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base × 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, AiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AiError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < self.max_attempts => {
                    let delay = match &error {
                        AiError::RateLimited {
                            retry_after: Some(after),
                            ..
                        } => (*after).min(self.max_delay),
                        _ => self.backoff(attempt),
                    };
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying AI call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    if error.is_retryable() {
                        tracing::error!(operation, attempts = attempt, error = %error, "AI call failed after retries");
                    }
                    return Err(error);
                }
            }
        }
    }
}

/// Process-wide pause of AI work after quota exhaustion.
#[derive(Debug)]
pub struct QuotaCooldown {
    window: Duration,
    until: Mutex<Option<Instant>>,
}

impl QuotaCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            until: Mutex::new(None),
        }
    }

    pub fn trip(&self) {
        let until = Instant::now() + self.window;
        if let Ok(mut guard) = self.until.lock() {
            *guard = Some(until);
        }
        tracing::warn!(cooldown_seconds = self.window.as_secs(), "AI quota exhausted, pausing AI work");
    }

    /// Time left in the current cooldown, if one is active.
    pub fn remaining(&self) -> Option<Duration> {
        let guard = self.until.lock().ok()?;
        (*guard)
            .and_then(|until| until.checked_duration_since(Instant::now()))
            .filter(|left| !left.is_zero())
    }

    pub fn is_cooling(&self) -> bool {
        self.remaining().is_some()
    }
}
