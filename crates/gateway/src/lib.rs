//! Model-serving request dispatcher: wires the endpoint monitor, rate
//! limiter, selector, hedged executor, progress bus, and KV/envelope layers
//! together into one entry point a pathway calls into.
//!
//! Individual crates stay usable on their own (a caller who only wants the
//! selector, or only the rate limiter, can depend on `gateway-core` or
//! `gateway-limiter` directly); this crate exists for the common case of
//! wanting the whole stack wired up the way a model-serving host would run
//! it, the way the teacher's own `tower-resilience` meta-crate re-exports
//! its patterns behind one dependency.
//!
//! ```toml
//! [dependencies]
//! gateway = { version = "0.1" }
//! ```

pub use gateway_bus::{BusError, ProgressBus, ProgressEvent, Resolver};
pub use gateway_core::{
    spawn_snapshot_task, CallId, CortexRequest, DispatchError, Endpoint, EndpointBuilder, EndpointSelector, Model,
    Monitor, MonitorConfig, Pathway, SelectionOutcome, SelectorConfig, DEFAULT_SNAPSHOT_INTERVAL,
};
pub use gateway_envelope::{Envelope, EnvelopeError};
pub use gateway_executor::{AttemptError, AttemptOutcome, DispatchResponse, Executor, ExecutorConfig, ExecutorConfigBuilder, FailedAttempt, ResponseCache};
pub use gateway_kv::KvHandle;
pub use gateway_limiter::{Limiter, LimiterConfig, LimiterConfigBuilder, LimiterError, ScheduleOptions};

/// The assembled stack: one `Executor` plus the shared `ProgressBus` and
/// `KvHandle` every `Model`'s endpoints were built against. Construct once
/// per process and share across requests; `Model`/`Pathway` values are
/// passed in per call since a host typically serves more than one model.
pub struct Gateway {
    executor: Executor,
    kv: KvHandle,
    bus: Option<ProgressBus>,
}

impl Gateway {
    /// Builds a gateway with no KV store and no progress bus: every
    /// `Model`'s rate limiters run in local-only mode and progress events
    /// only fan out to in-process subscribers. This is the degraded mode
    /// spec §4.6 requires when no connection string is configured.
    pub fn local(config: ExecutorConfig) -> Self {
        Self {
            executor: Executor::new(config, None),
            kv: KvHandle::disabled(),
            bus: None,
        }
    }

    /// Builds a gateway sharing `kv` across its rate limiter and progress
    /// bus, optionally encrypting bus traffic with `envelope`.
    pub fn clustered(config: ExecutorConfig, kv: KvHandle, envelope: Option<Envelope>) -> Self {
        let bus = ProgressBus::new(kv.clone(), envelope);
        Self {
            executor: Executor::new(config, Some(bus.clone())),
            kv,
            bus: Some(bus),
        }
    }

    pub fn kv(&self) -> &KvHandle {
        &self.kv
    }

    pub fn bus(&self) -> Option<&ProgressBus> {
        self.bus.as_ref()
    }

    /// Runs one request through the executor: endpoint selection, rate
    /// limiting, hedged retries, streaming, and caching, per spec §4.4.
    pub async fn dispatch(
        &self,
        request: &mut CortexRequest,
        model: &Model,
        pathway: &dyn Pathway,
        selector: &EndpointSelector,
    ) -> Result<DispatchResponse, DispatchError> {
        self.executor.dispatch(request, model, pathway, selector).await
    }
}
