//! Endpoint Selector (C3): picks which endpoint of a [`Model`] a request
//! should go to, dispatched over a small set of strategies the way
//! `tower-resilience-healthcheck::selector::SelectionStrategy` dispatches
//! over its own health-aware strategies.

use crate::model::Model;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Outcome of a selection attempt. `NoEndpoints` covers both an empty model
/// and "every endpoint is unhealthy" (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    Endpoint(usize),
    NoEndpoints,
}

/// Threshold controlling when two healthy endpoints are considered
/// "similar enough" in latency to be round-robined between rather than
/// always preferring the faster one (Open Question #3).
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub latency_similarity_threshold: Duration,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            latency_similarity_threshold: Duration::from_millis(10),
        }
    }
}

/// Selects endpoints for one [`Model`]. Holds a single round-robin cursor
/// shared across both the "all unhealthy" and "healthy, similar latency"
/// branches, so repeated calls fan out evenly across whichever endpoint set
/// is in play rather than resetting each time the health picture changes.
pub struct EndpointSelector {
    config: SelectorConfig,
    cursor: AtomicUsize,
}

impl EndpointSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self {
            config,
            cursor: AtomicUsize::new(0),
        }
    }

    fn next_index(&self, len: usize) -> usize {
        self.cursor.fetch_add(1, Ordering::Relaxed) % len
    }

    /// Selects the next endpoint for `model`.
    ///
    /// - If any endpoints are healthy: prefers the lowest average latency;
    ///   when the healthy set's latencies are within
    ///   `latency_similarity_threshold` of the population mean, round-robins
    ///   among them instead of pinning to the single fastest one.
    /// - If none are healthy: round-robins across all endpoints rather than
    ///   refusing the request outright (an unhealthy endpoint still gets a
    ///   chance — spec §4.3's "fail open" rule).
    /// - If the model has no endpoints at all: [`SelectionOutcome::NoEndpoints`].
    pub fn select(&self, model: &Model) -> SelectionOutcome {
        if model.endpoints.is_empty() {
            return SelectionOutcome::NoEndpoints;
        }

        let healthy: Vec<usize> = model
            .endpoints
            .iter()
            .enumerate()
            .filter(|(_, e)| e.monitor.healthy())
            .map(|(i, _)| i)
            .collect();

        if healthy.is_empty() {
            let idx = self.next_index(model.endpoints.len());
            return SelectionOutcome::Endpoint(idx);
        }

        if healthy.len() == 1 {
            return SelectionOutcome::Endpoint(healthy[0]);
        }

        if self.latencies_are_similar(model, &healthy) {
            let pos = self.next_index(healthy.len());
            return SelectionOutcome::Endpoint(healthy[pos]);
        }

        let fastest = healthy
            .into_iter()
            .min_by_key(|&i| model.endpoints[i].monitor.average_call_duration())
            .expect("healthy is non-empty");
        SelectionOutcome::Endpoint(fastest)
    }

    fn latencies_are_similar(&self, model: &Model, healthy: &[usize]) -> bool {
        let durations: Vec<f64> = healthy
            .iter()
            .map(|&i| model.endpoints[i].monitor.average_call_duration().as_secs_f64())
            .collect();
        let mean = durations.iter().sum::<f64>() / durations.len() as f64;
        let variance = durations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / durations.len() as f64;
        let stddev = variance.sqrt();
        Duration::from_secs_f64(stddev) <= self.config.latency_similarity_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use gateway_kv::KvHandle;

    fn model_with(n: usize) -> Model {
        let endpoints = (0..n).map(test_endpoint).collect();
        Model::new("test-model", false, 4096, endpoints)
    }

    fn test_endpoint(i: usize) -> crate::model::Endpoint {
        crate::model::Endpoint::builder(format!("https://endpoint-{i}.example"))
            .requests_per_second(10)
            .build(KvHandle::disabled())
    }

    #[test]
    fn empty_model_has_no_endpoints() {
        let model = model_with(0);
        let selector = EndpointSelector::new(SelectorConfig::default());
        assert_eq!(selector.select(&model), SelectionOutcome::NoEndpoints);
    }

    #[test]
    fn single_endpoint_is_always_selected() {
        let model = model_with(1);
        let selector = EndpointSelector::new(SelectorConfig::default());
        assert_eq!(selector.select(&model), SelectionOutcome::Endpoint(0));
    }

    #[test]
    fn all_unhealthy_still_round_robins_rather_than_refusing() {
        let model = model_with(3);
        for endpoint in &model.endpoints {
            let id = endpoint.monitor.start_call();
            endpoint.monitor.increment_error_count(id, None);
            let id = endpoint.monitor.start_call();
            endpoint.monitor.increment_error_count(id, None);
        }
        let selector = EndpointSelector::new(SelectorConfig::default());
        let first = selector.select(&model);
        assert!(matches!(first, SelectionOutcome::Endpoint(_)));
    }

    #[test]
    fn similar_latency_healthy_endpoints_round_robin() {
        let model = model_with(2);
        let selector = EndpointSelector::new(SelectorConfig::default());
        let first = selector.select(&model);
        let second = selector.select(&model);
        assert_ne!(first, second);
    }
}
