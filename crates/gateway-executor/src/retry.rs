//! Top-level retry loop (spec §4.4.1): determines hedging/streaming for
//! each attempt, races competitors via [`crate::hedge::race`], classifies
//! the result, and decides whether to retry, reselect, or surface the
//! final outcome. Composes `tower-resilience-retry`'s attempt-and-backoff
//! loop with `tower-resilience-hedge`'s race, pointed at a real outbound
//! HTTP client instead of an arbitrary `tower::Service`.

use crate::backoff::retry_delay;
use crate::cache::ResponseCache;
use crate::classify::{self, AttemptFailure, ErrorClass};
use crate::config::ExecutorConfig;
use crate::hedge;
use crate::http::AttemptError;
use gateway_bus::ProgressBus;
use gateway_core::error::DispatchError;
use gateway_core::model::Model;
use gateway_core::pathway::Pathway;
use gateway_core::request::CortexRequest;
use gateway_core::selector::EndpointSelector;
use std::time::Duration;

/// The executor's result for one dispatch (spec's `{response, duration}`
/// success shape, with the `cached` flag pathways use to distinguish
/// replays per §4.4.5).
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub body: serde_json::Value,
    pub status: u16,
    pub duration: Duration,
    pub cached: bool,
}

#[allow(clippy::too_many_arguments)]
pub async fn dispatch(
    client: &reqwest::Client,
    config: &ExecutorConfig,
    cache: Option<&ResponseCache>,
    bus: Option<&ProgressBus>,
    request: &mut CortexRequest,
    model: &Model,
    pathway: &dyn Pathway,
    selector: &EndpointSelector,
) -> Result<DispatchResponse, DispatchError> {
    if model.endpoints.is_empty() {
        return Err(DispatchError::Config {
            message: format!("model {} has no endpoints", model.name),
        });
    }

    if request.selected_endpoint.is_none() {
        pathway.select_new_endpoint(request, selector);
    }
    if request.selected_endpoint.is_none() {
        return Err(DispatchError::Config {
            message: "selector returned no endpoint".to_string(),
        });
    }

    let enable_dup = request.enable_duplicate_requests.unwrap_or(config.enable_duplicate_requests);
    let dup_after = request
        .duplicate_request_after
        .unwrap_or(config.duplicate_request_after);

    let stream_requested = request.stream_requested();
    let streaming = stream_requested && model.supports_streaming;
    if stream_requested && !model.supports_streaming {
        request.clear_stream_flags();
        #[cfg(feature = "tracing")]
        tracing::warn!(model = %model.name, "streaming requested but unsupported by model, falling back");
    }

    let max_dup = if streaming { 1 } else if enable_dup { config.max_duplicate_requests } else { 1 };

    let cache_key = (!streaming && request.cache)
        .then(|| ResponseCache::key(&request.method, &request.url, &request.params, &request.data));

    if let (Some(cache), Some(key)) = (cache, &cache_key) {
        if let Some((body, status)) = cache.get(key).await {
            return Ok(DispatchResponse {
                body,
                status,
                duration: Duration::ZERO,
                cached: true,
            });
        }
    }

    let mut last_error: Option<DispatchError> = None;

    for attempt in 0..config.max_retry {
        if request.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        request.attempt = attempt;

        let hedge::HedgeOutcome {
            outcome,
            endpoint_index,
            competitor_index,
        } = hedge::race(
            client,
            request,
            model,
            pathway,
            selector,
            max_dup,
            dup_after,
            streaming,
            bus,
        )
        .await;

        match outcome {
            Ok(response) => {
                if competitor_index == 0 {
                    if let (Some(cache), Some(key)) = (cache, &cache_key) {
                        cache.put(key.clone(), response.body.clone(), response.status).await;
                    }
                }
                return Ok(DispatchResponse {
                    body: response.body,
                    status: response.status,
                    duration: response.duration,
                    cached: false,
                });
            }
            Err(AttemptError::Http(failed)) => {
                let class = classify::classify(failed.failure);
                match class {
                    ErrorClass::Permanent => {
                        let status = match failed.failure {
                            AttemptFailure::Status(s) => s,
                            _ => 0,
                        };
                        return Err(DispatchError::Permanent {
                            status,
                            message: format!("upstream rejected request with status {status}"),
                            body: failed.body,
                        });
                    }
                    ErrorClass::Cancelled => {
                        return Err(DispatchError::Cancelled);
                    }
                    ErrorClass::Transient => {
                        let rate_limited = classify::is_rate_limited(failed.failure);
                        last_error = Some(DispatchError::Transient {
                            status: match failed.failure {
                                AttemptFailure::Status(s) => Some(s),
                                _ => None,
                            },
                            retry_after: failed.retry_after,
                            message: "transient upstream error".to_string(),
                        });

                        if model.endpoints.len() == 1 {
                            pathway.init_request(request);
                        } else {
                            pathway.select_new_endpoint(request, selector);
                        }

                        if attempt + 1 < config.max_retry {
                            let delay = retry_delay(attempt, rate_limited, failed.retry_after);
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
            Err(AttemptError::ScheduleExpired { id }) => {
                last_error = Some(DispatchError::ScheduleExpired { id });
                if model.endpoints.len() == 1 {
                    pathway.init_request(request);
                } else {
                    pathway.select_new_endpoint(request, selector);
                }
                if attempt + 1 < config.max_retry {
                    let delay = retry_delay(attempt, false, None);
                    tokio::time::sleep(delay).await;
                }
            }
        }
        let _ = (endpoint_index, competitor_index);
    }

    Err(last_error.unwrap_or(DispatchError::Config {
        message: "retries exhausted with no recorded failure".to_string(),
    }))
}
