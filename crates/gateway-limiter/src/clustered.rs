//! Cluster-coordinated limiter: token accounting and in-flight counts are
//! replicated through the shared KV store under a stable cluster id
//! (spec §4.2/§6), instead of the `Arc<Mutex<_>>` used for the local mode.

use crate::cancellation::CancellationToken;
use crate::error::LimiterError;
use gateway_kv::KvHandle;
use std::time::{Duration, Instant};

pub(crate) struct ClusteredLimiter {
    rps: usize,
    cluster_id: String,
    kv: KvHandle,
}

impl ClusteredLimiter {
    pub(crate) fn new(rps: usize, cluster_id: String, kv: KvHandle) -> Self {
        Self {
            rps: rps.max(1),
            cluster_id,
            kv,
        }
    }

    /// Polls the shared reservoir counter and in-flight counter until both
    /// admit this job, `expiration` elapses, or `cancel` fires.
    pub(crate) async fn acquire(
        &self,
        expiration: Duration,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<ClusterLease<'_>, LimiterError> {
        let deadline = Instant::now() + expiration;
        let reservoir_key = format!("{}:reservoir", self.cluster_id);
        let inflight_key = format!("{}:inflight", self.cluster_id);

        loop {
            if cancel.is_cancelled() {
                return Err(LimiterError::Cancelled { id: id.to_string() });
            }
            if Instant::now() >= deadline {
                return Err(LimiterError::ScheduleExpired { id: id.to_string() });
            }

            let count = self
                .kv
                .incr_window(&reservoir_key, Duration::from_millis(1000))
                .await
                .map_err(|e| LimiterError::Internal { message: e.to_string() })?;

            if count as usize > self.rps {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let backoff = Duration::from_millis(20).min(remaining);
                if !backoff_or_cancel(backoff, cancel).await {
                    return Err(LimiterError::Cancelled { id: id.to_string() });
                }
                continue;
            }

            let inflight = self
                .kv
                .incr_window(&inflight_key, Duration::from_secs(3600))
                .await
                .map_err(|e| LimiterError::Internal { message: e.to_string() })?;

            if inflight as usize > self.rps {
                let _ = self.kv.decr(&inflight_key).await;
                let remaining = deadline.saturating_duration_since(Instant::now());
                let backoff = Duration::from_millis(20).min(remaining);
                if !backoff_or_cancel(backoff, cancel).await {
                    return Err(LimiterError::Cancelled { id: id.to_string() });
                }
                continue;
            }

            return Ok(ClusterLease {
                kv: &self.kv,
                inflight_key,
            });
        }
    }
}

/// Sleeps `backoff`, returning `false` early if `cancel` fires first.
async fn backoff_or_cancel(backoff: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(backoff) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Released automatically when dropped, decrementing the shared in-flight
/// counter — the clustered analogue of the local semaphore permit.
pub(crate) struct ClusterLease<'a> {
    kv: &'a KvHandle,
    inflight_key: String,
}

impl Drop for ClusterLease<'_> {
    fn drop(&mut self) {
        let kv = self.kv.clone();
        let key = self.inflight_key.clone();
        tokio::spawn(async move {
            let _ = kv.decr(&key).await;
        });
    }
}
