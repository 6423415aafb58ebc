//! Hedged (duplicate) requests (spec §4.4.2): races up to `max_dup`
//! competitors with exponential stagger, mutually cancelling on the first
//! success or definitive (non-retriable) failure.
//!
//! Grounded on `tower-resilience-hedge::lib`'s race logic, reshaped from
//! its spawn-plus-channel style into structured concurrency: every
//! competitor is a future pushed onto a `FuturesUnordered` borrowed from
//! this function's own stack frame, so cancelling the losers is just
//! dropping the `FuturesUnordered` — no `AbortHandle` bookkeeping needed,
//! and `model`/`pathway`/`selector` can stay plain references instead of
//! `Arc`.

use crate::backoff::hedge_launch_delay;
use crate::classify::{self, AttemptFailure, ErrorClass};
use crate::http::{self, AttemptError, AttemptOutcome};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use gateway_bus::ProgressBus;
use gateway_core::model::Model;
use gateway_core::pathway::Pathway;
use gateway_core::request::CortexRequest;
use gateway_core::selector::EndpointSelector;
use std::time::Duration;

pub struct HedgeOutcome {
    pub outcome: Result<AttemptOutcome, AttemptError>,
    pub endpoint_index: usize,
    /// The winning competitor's `k`. Nonzero means this was a duplicate
    /// launch, not the primary attempt — callers must not cache a response
    /// carrying this (spec §4.4.5).
    pub competitor_index: usize,
}

fn is_terminal(outcome: &Result<AttemptOutcome, AttemptError>) -> bool {
    match outcome {
        Ok(_) => true,
        Err(AttemptError::Http(failed)) => classify::classify(failed.failure) == ErrorClass::Permanent,
        Err(AttemptError::ScheduleExpired { .. }) => false,
    }
}

/// Races `max_dup` competitors for one retry attempt. `request` must
/// already carry the endpoint selected for competitor 0; competitors `k>0`
/// reselect against their own clone of `request` before launching (spec
/// §4.4.2 step 2), so no two competitors contend over a shared
/// `selected_endpoint` field.
#[allow(clippy::too_many_arguments)]
pub async fn race(
    client: &reqwest::Client,
    request: &CortexRequest,
    model: &Model,
    pathway: &dyn Pathway,
    selector: &EndpointSelector,
    max_dup: usize,
    dup_after: Duration,
    streaming: bool,
    bus: Option<&ProgressBus>,
) -> HedgeOutcome {
    let mut competitors = FuturesUnordered::new();

    for k in 0..max_dup {
        let mut competitor_request = request.clone();
        let launch_delay = hedge_launch_delay(k, dup_after);

        competitors.push(async move {
            if !launch_delay.is_zero() {
                tokio::time::sleep(launch_delay).await;
            }
            if k > 0 {
                pathway.select_new_endpoint(&mut competitor_request, selector);
            }
            let Some(endpoint_index) = competitor_request.selected_endpoint else {
                return (
                    k,
                    usize::MAX,
                    Err(AttemptError::ScheduleExpired {
                        id: format!("{}-{k}-no-endpoint", request.request_id),
                    }),
                );
            };
            let outcome = http::send(client, &competitor_request, model, endpoint_index, k, streaming, bus).await;
            (k, endpoint_index, outcome)
        });
    }

    let mut fallback: Option<(usize, usize, Result<AttemptOutcome, AttemptError>)> = None;

    while let Some((competitor_index, endpoint_index, outcome)) = competitors.next().await {
        if is_terminal(&outcome) {
            // Dropping `competitors` here (end of scope, via the `return`)
            // cancels every other pending competitor future in place.
            return HedgeOutcome {
                outcome,
                endpoint_index,
                competitor_index,
            };
        }
        if fallback.is_none() {
            fallback = Some((competitor_index, endpoint_index, outcome));
        }
    }

    match fallback {
        Some((competitor_index, endpoint_index, outcome)) => HedgeOutcome {
            outcome,
            endpoint_index,
            competitor_index,
        },
        None => HedgeOutcome {
            outcome: Err(AttemptError::Http(http::FailedAttempt {
                failure: AttemptFailure::Cancelled,
                duration: Duration::ZERO,
                retry_after: None,
                body: None,
            })),
            endpoint_index: request.selected_endpoint.unwrap_or(0),
            competitor_index: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use gateway_core::selector::SelectorConfig;
    use gateway_kv::KvHandle;

    struct FixedPathway;

    impl Pathway for FixedPathway {
        fn init_request(&self, _request: &mut CortexRequest) {}

        fn select_new_endpoint(&self, request: &mut CortexRequest, selector: &EndpointSelector) {
            let model = test_model(2);
            if let gateway_core::selector::SelectionOutcome::Endpoint(idx) = selector.select(&model) {
                request.selected_endpoint = Some(idx);
            }
        }

        fn resolver(&self, _args: serde_json::Value, _use_redis: bool) -> BoxFuture<'static, Result<(), gateway_core::error::DispatchError>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn test_model(n: usize) -> Model {
        let endpoints = (0..n)
            .map(|i| {
                gateway_core::model::Endpoint::builder(format!("https://e{i}.invalid"))
                    .requests_per_second(10)
                    .build(KvHandle::disabled())
            })
            .collect();
        Model::new("m", false, 4096, endpoints)
    }

    #[tokio::test]
    async fn single_competitor_schedule_expires_against_unreachable_host() {
        let model = test_model(1);
        let client = reqwest::Client::new();
        let selector = EndpointSelector::new(SelectorConfig::default());
        let pathway = FixedPathway;

        let mut request = CortexRequest::new("echo", "m", "http://127.0.0.1:0/unreachable");
        request.selected_endpoint = Some(0);
        request.pathway_timeout = Duration::from_millis(50);

        let result = race(&client, &request, &model, &pathway, &selector, 1, Duration::from_secs(10), false, None).await;
        assert!(result.outcome.is_err());
    }
}
