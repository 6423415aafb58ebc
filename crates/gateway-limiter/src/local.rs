//! In-memory leaky-bucket + concurrency-cap limiter.
//!
//! The reservoir is `SharedRateLimiter`'s fixed-window state
//! (`tower-resilience-ratelimiter::limiter::FixedWindowState`), generalized
//! to also gate on concurrency (`tower-resilience-bulkhead`'s semaphore)
//! and submission spacing (`minTime`).

use crate::cancellation::CancellationToken;
use crate::error::LimiterError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};

struct Reservoir {
    available: usize,
    period_start: Instant,
}

pub(crate) struct LocalLimiter {
    rps: usize,
    min_time: Duration,
    reservoir: Mutex<Reservoir>,
    semaphore: Arc<Semaphore>,
    last_start: Mutex<Option<Instant>>,
}

impl LocalLimiter {
    pub(crate) fn new(rps: usize) -> Self {
        let rps = rps.max(1);
        Self {
            rps,
            min_time: Duration::from_millis(1000 / rps as u64),
            reservoir: Mutex::new(Reservoir {
                available: rps,
                period_start: Instant::now(),
            }),
            semaphore: Arc::new(Semaphore::new(rps)),
            last_start: Mutex::new(None),
        }
    }

    /// Blocks (subject to `expiration` and `cancel`) until a submission slot
    /// is free, then holds the returned permit for the lifetime of the job.
    pub(crate) async fn acquire(
        &self,
        expiration: Duration,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<tokio::sync::OwnedSemaphorePermit, LimiterError> {
        let deadline = Instant::now() + expiration;

        loop {
            if cancel.is_cancelled() {
                return Err(LimiterError::Cancelled { id: id.to_string() });
            }
            if Instant::now() >= deadline {
                return Err(LimiterError::ScheduleExpired { id: id.to_string() });
            }

            if let Some(wait) = self.min_time_wait().await {
                wait_or_fail(wait, deadline, cancel, id).await?;
                continue;
            }

            if let Some(wait) = self.reservoir_wait().await {
                wait_or_fail(wait, deadline, cancel, id).await?;
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::select! {
                result = tokio::time::timeout(remaining, self.semaphore.clone().acquire_owned()) => {
                    match result {
                        Ok(Ok(permit)) => {
                            *self.last_start.lock().await = Some(Instant::now());
                            return Ok(permit);
                        }
                        _ => return Err(LimiterError::ScheduleExpired { id: id.to_string() }),
                    }
                }
                _ = cancel.cancelled() => return Err(LimiterError::Cancelled { id: id.to_string() }),
            }
        }
    }

    async fn min_time_wait(&self) -> Option<Duration> {
        let last = *self.last_start.lock().await;
        let prev = last?;
        let since = prev.elapsed();
        if since < self.min_time {
            Some(self.min_time - since)
        } else {
            None
        }
    }

    async fn reservoir_wait(&self) -> Option<Duration> {
        let mut bucket = self.reservoir.lock().await;
        let now = Instant::now();
        if now.duration_since(bucket.period_start) >= Duration::from_millis(1000) {
            bucket.available = self.rps;
            bucket.period_start = now;
        }
        if bucket.available > 0 {
            bucket.available -= 1;
            None
        } else {
            Some(Duration::from_millis(1000).saturating_sub(now.duration_since(bucket.period_start)))
        }
    }

    #[cfg(test)]
    pub(crate) async fn available_tokens(&self) -> usize {
        self.reservoir.lock().await.available
    }
}

/// Sleeps `wait`, failing fast with `ScheduleExpired` if `wait` would itself
/// overrun `deadline`, or `Cancelled` if `cancel` fires first.
async fn wait_or_fail(wait: Duration, deadline: Instant, cancel: &CancellationToken, id: &str) -> Result<(), LimiterError> {
    if Instant::now() + wait > deadline {
        return Err(LimiterError::ScheduleExpired { id: id.to_string() });
    }
    tokio::select! {
        _ = tokio::time::sleep(wait) => Ok(()),
        _ = cancel.cancelled() => Err(LimiterError::Cancelled { id: id.to_string() }),
    }
}
