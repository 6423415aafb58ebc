//! The registration table (spec §3's "registered request entry"): one
//! entry per in-flight request id, holding the local broadcast channel its
//! subscribers listen on, the exactly-once-start flag, and the resolver a
//! pathway registered to begin execution — locally or when picked up from
//! another instance.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

/// One event published to `requestProgress` for a given request.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProgressEvent {
    pub request_id: Uuid,
    pub payload: serde_json::Value,
}

/// Begins execution of a registered request. Type-erased (no dependency on
/// `gateway-core::Pathway`) so the bus stays usable without pulling in the
/// rest of the workspace's request model.
pub type Resolver = Arc<dyn Fn(serde_json::Value, bool) -> BoxFuture<'static, ()> + Send + Sync>;

pub(crate) struct RegisteredRequest {
    pub(crate) started: AtomicBool,
    pub(crate) use_redis: AtomicBool,
    pub(crate) sender: broadcast::Sender<ProgressEvent>,
    pub(crate) resolver: Mutex<Option<Resolver>>,
    pub(crate) args: Mutex<serde_json::Value>,
}

impl RegisteredRequest {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            started: AtomicBool::new(false),
            use_redis: AtomicBool::new(false),
            sender,
            resolver: Mutex::new(None),
            args: Mutex::new(serde_json::Value::Null),
        }
    }

    /// Atomically flips `started` from `false` to `true`, recording
    /// `use_redis` only for the caller that actually made the transition —
    /// the exactly-once-start invariant (spec §4.5 P7), enforced with a
    /// single CAS rather than a second lock.
    pub(crate) fn mark_started(&self, use_redis: bool) -> bool {
        let won = self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.use_redis.store(use_redis, Ordering::Release);
        }
        won
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub(crate) fn use_redis(&self) -> bool {
        self.use_redis.load(Ordering::Acquire)
    }
}
