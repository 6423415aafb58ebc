//! Per-endpoint leaky-bucket + concurrency-cap rate limiter (spec §4.2),
//! generalizing `tower-resilience-ratelimiter`'s enum-dispatched window
//! state and `tower-resilience-bulkhead`'s semaphore-based concurrency cap.
//! Clustered mode replicates token accounting through [`gateway_kv`].

mod cancellation;
mod clustered;
pub mod config;
pub mod error;
pub mod events;
mod local;

pub use cancellation::CancellationToken;
pub use config::{LimiterConfig, LimiterConfigBuilder, ScheduleOptions};
pub use error::LimiterError;
pub use events::{LimiterEvent, LimiterEventListener, LimiterEventListeners};

use clustered::ClusteredLimiter;
use gateway_kv::KvHandle;
use local::LocalLimiter;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A per-endpoint limiter. Local and clustered variants share this public
/// surface so `gateway-executor` never needs to know which it was given.
pub enum Limiter {
    Local(Arc<LocalLimiter>),
    Clustered {
        inner: Arc<RwLock<Arc<ClusteredLimiter>>>,
        rps: usize,
        cluster_id: String,
        kv: KvHandle,
        listeners: LimiterEventListeners,
    },
}

impl Limiter {
    /// Builds a limiter from `config`. Clustered mode is selected when both
    /// a cluster id is configured and `kv` is enabled; otherwise falls back
    /// to local-only, matching C6's "disabled → both C2 and C5 degrade to
    /// local-only mode" rule.
    pub fn new(config: LimiterConfig, kv: KvHandle) -> Self {
        match (&config.cluster_id, kv.is_enabled()) {
            (Some(cluster_id), true) => Limiter::Clustered {
                inner: Arc::new(RwLock::new(Arc::new(ClusteredLimiter::new(
                    config.rps,
                    cluster_id.clone(),
                    kv.clone(),
                )))),
                rps: config.rps,
                cluster_id: cluster_id.clone(),
                kv,
                listeners: config.listeners,
            },
            _ => Limiter::Local(Arc::new(LocalLimiter::new(config.rps))),
        }
    }

    /// Schedules `job` subject to `minTime`, `maxConcurrent`, and the
    /// reservoir (spec §4.2). Fails with `ScheduleExpired` if the job
    /// cannot start within `options.expiration`, or with `Cancelled` if
    /// `options.cancel` fires first.
    ///
    /// On an internal (clustered) limiter error, the limiter disconnects
    /// and recreates itself with the same options before surfacing the
    /// error to this call's caller — matching the "no job submitted after
    /// the error is re-attempted by the limiter itself" rule: the *limiter*
    /// recovers, but this particular `schedule` call is not silently
    /// retried.
    pub async fn schedule<T, F, Fut>(&self, options: ScheduleOptions, job: F) -> Result<T, LimiterError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match self {
            Limiter::Local(local) => {
                let _permit = local.acquire(options.expiration, &options.id, &options.cancel).await?;
                Ok(job().await)
            }
            Limiter::Clustered { inner, rps, cluster_id, kv, listeners } => {
                let current = inner.read().await.clone();
                match current.acquire(options.expiration, &options.id, &options.cancel).await {
                    Ok(lease) => {
                        let result = job().await;
                        drop(lease);
                        Ok(result)
                    }
                    Err(LimiterError::Internal { message }) => {
                        let fresh = Arc::new(ClusteredLimiter::new(*rps, cluster_id.clone(), kv.clone()));
                        *inner.write().await = fresh;
                        listeners.emit(&LimiterEvent::Regenerated { id: cluster_id.clone() });
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            cluster_id = %cluster_id,
                            error = %message,
                            "clustered limiter disconnected and regenerated after an internal error"
                        );
                        Err(LimiterError::Internal { message })
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_schedule_runs_job() {
        let limiter = Limiter::new(LimiterConfigBuilder::new().requests_per_second(10).build(), KvHandle::disabled());
        let result = limiter
            .schedule(
                ScheduleOptions {
                    expiration: std::time::Duration::from_millis(100),
                    id: "job-1".into(),
                    cancel: CancellationToken::new(),
                },
                || async { 42 },
            )
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn schedule_fails_with_cancelled_when_token_already_fired() {
        let limiter = Limiter::new(LimiterConfigBuilder::new().requests_per_second(10).build(), KvHandle::disabled());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = limiter
            .schedule(
                ScheduleOptions {
                    expiration: std::time::Duration::from_secs(5),
                    id: "job-2".into(),
                    cancel,
                },
                || async { 42 },
            )
            .await;
        assert!(matches!(result, Err(LimiterError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn falls_back_to_local_without_cluster_id() {
        let config = LimiterConfigBuilder::new().requests_per_second(5).build();
        let limiter = Limiter::new(config, KvHandle::disabled());
        assert!(matches!(limiter, Limiter::Local(_)));
    }
}
