//! Concurrency gate and retry backoff for rate-limited remote calls

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::RateLimitSettings;
use crate::error::{Error, Result};

/// Exponential backoff with additive jitter and a hard ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Jitter is drawn from `0..max_jitter_ms`
    pub max_jitter_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&RateLimitSettings::default())
    }
}

impl From<&RateLimitSettings> for BackoffPolicy {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            initial_delay_ms: settings.initial_retry_delay_ms,
            max_delay_ms: settings.max_delay_ms,
            max_jitter_ms: settings.max_jitter_ms,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry `attempt` (1-based):
    /// `min(initial * 2^(attempt-1) + jitter, max)`
    pub fn delay(&self, attempt: u32, jitter_ms: u64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let base = self.initial_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(base.saturating_add(jitter_ms).min(self.max_delay_ms))
    }

    /// Draw a jitter value for the next delay
    pub fn jitter(&self) -> u64 {
        if self.max_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..self.max_jitter_ms)
        }
    }
}

/// Progress of a retry loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryState {
    /// Retries performed so far
    pub attempt: u32,
    pub last_error: Option<String>,
    pub next_delay: Duration,
}

impl RetryState {
    /// Record a retryable failure and compute the delay before the next try.
    ///
    /// Returns `None` once `max_retries` retries have been used up.
    pub fn record_failure(
        &mut self,
        error: String,
        policy: &BackoffPolicy,
        max_retries: u32,
        jitter_ms: u64,
    ) -> Option<Duration> {
        self.last_error = Some(error);
        if self.attempt >= max_retries {
            return None;
        }
        self.attempt += 1;
        self.next_delay = policy.delay(self.attempt, jitter_ms);
        Some(self.next_delay)
    }

    /// Error to surface once retries are exhausted
    pub fn exhausted(self) -> Error {
        Error::RateLimitExceeded {
            attempts: self.attempt + 1,
            last_error: self.last_error.unwrap_or_default(),
        }
    }
}

/// Suspends the current task; swapped out in tests to record delays
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Counting semaphore whose permits return only after a cooldown
#[derive(Debug, Clone)]
pub struct RequestGate {
    semaphore: Arc<Semaphore>,
    release_delay: Duration,
}

impl RequestGate {
    pub fn new(max_concurrent: usize, release_delay: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            release_delay,
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(
            settings.max_concurrent_requests,
            Duration::from_millis(settings.release_delay_ms),
        )
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<GatePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::internal(format!("Request gate closed: {}", e)))?;
        Ok(GatePermit {
            permit: Some(permit),
            release_delay: self.release_delay,
        })
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Held slot of a [`RequestGate`]; released `release_delay` after drop
#[derive(Debug)]
pub struct GatePermit {
    permit: Option<OwnedSemaphorePermit>,
    release_delay: Duration,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        if self.release_delay.is_zero() {
            return;
        }
        // Outside a runtime the permit is released immediately.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let delay = self.release_delay;
            handle.spawn(async move {
                tokio::time::sleep(delay).await;
                drop(permit);
            });
        }
    }
}
