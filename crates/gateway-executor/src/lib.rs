//! Request Executor (C4): retry loop, hedged duplicate requests, streaming
//! buffering, error classification, and a pluggable response cache for
//! outbound model requests.
//!
//! Composes `tower-resilience-retry`'s attempt/backoff loop and
//! `tower-resilience-hedge`'s race, generalized from an arbitrary
//! `tower::Service` to a concrete [`reqwest`] HTTP client, since the
//! spec's error classification needs real status codes and `Retry-After`
//! headers rather than a generic service error.

pub mod backoff;
pub mod cache;
pub mod classify;
pub mod config;
mod hedge;
pub mod http;
mod retry;

pub use cache::ResponseCache;
pub use config::{ExecutorConfig, ExecutorConfigBuilder};
pub use http::{AttemptError, AttemptOutcome, FailedAttempt};
pub use retry::DispatchResponse;

use gateway_bus::ProgressBus;
use gateway_core::error::DispatchError;
use gateway_core::model::Model;
use gateway_core::pathway::Pathway;
use gateway_core::request::CortexRequest;
use gateway_core::selector::EndpointSelector;

/// Owns the outbound HTTP client, executor tunables, the optional response
/// cache, and a handle to the progress bus streaming chunks are forwarded
/// through. Built once at startup and shared across every dispatch.
pub struct Executor {
    client: reqwest::Client,
    config: ExecutorConfig,
    cache: Option<ResponseCache>,
    bus: Option<ProgressBus>,
}

impl Executor {
    pub fn new(config: ExecutorConfig, bus: Option<ProgressBus>) -> Self {
        let cache = config.enable_cache.then(|| ResponseCache::new(config.cache_ttl));
        Self {
            client: reqwest::Client::new(),
            config,
            cache,
            bus,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Runs one request to completion: retry loop, hedging, streaming, and
    /// caching, exactly as spec §4.4 describes. `request` is mutated in
    /// place by `pathway`'s `init_request`/`select_new_endpoint` hooks as
    /// attempts progress.
    pub async fn dispatch(
        &self,
        request: &mut CortexRequest,
        model: &Model,
        pathway: &dyn Pathway,
        selector: &EndpointSelector,
    ) -> Result<DispatchResponse, DispatchError> {
        retry::dispatch(
            &self.client,
            &self.config,
            self.cache.as_ref(),
            self.bus.as_ref(),
            request,
            model,
            pathway,
            selector,
        )
        .await
    }
}
