use crate::cancellation::CancellationToken;
use crate::events::{LimiterEventListener, LimiterEventListeners};
use std::time::Duration;

/// Per-schedule-call options (spec §3's `Limiter` job contract).
#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    pub expiration: Duration,
    pub id: String,
    /// Cooperative cancellation signal; a job whose token fires while
    /// queued or waiting on the reservoir fails with
    /// [`crate::error::LimiterError::Cancelled`] rather than being retried.
    pub cancel: CancellationToken,
}

/// Configuration for one endpoint's limiter.
///
/// `minTime = 1000/rps`, `maxConcurrent = rps`, `reservoir = rps` refilled
/// every 1000ms — the fixed relationship spec §3 defines.
pub struct LimiterConfig {
    pub(crate) rps: usize,
    pub(crate) cluster_id: Option<String>,
    pub(crate) listeners: LimiterEventListeners,
}

impl LimiterConfig {
    pub fn min_time(&self) -> Duration {
        Duration::from_millis(1000 / self.rps.max(1) as u64)
    }

    pub fn max_concurrent(&self) -> usize {
        self.rps.max(1)
    }

    pub fn reservoir(&self) -> usize {
        self.rps.max(1)
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            rps: 100,
            cluster_id: None,
            listeners: LimiterEventListeners::default(),
        }
    }
}

/// Builder for [`LimiterConfig`], the teacher's `…ConfigBuilder` idiom.
#[derive(Default)]
pub struct LimiterConfigBuilder {
    config: LimiterConfig,
}

impl LimiterConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests per second; derives `minTime`, `maxConcurrent`, `reservoir`.
    pub fn requests_per_second(mut self, rps: usize) -> Self {
        self.config.rps = rps;
        self
    }

    /// Stable cluster id (spec §6: `{cortexId}-{model}-{endpointIndex}-limiter`).
    /// Presence of a cluster id plus a connected `KvHandle` selects
    /// clustered mode; absence keeps the limiter purely local.
    pub fn cluster_id(mut self, id: impl Into<String>) -> Self {
        self.config.cluster_id = Some(id.into());
        self
    }

    pub fn on_event<L: LimiterEventListener + 'static>(mut self, listener: L) -> Self {
        self.config.listeners.add(listener);
        self
    }

    pub fn build(self) -> LimiterConfig {
        self.config
    }
}
