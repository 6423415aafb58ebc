//! One outbound HTTP attempt against a single endpoint (spec §4.4.1/§4.4.4):
//! schedules through the endpoint's limiter, issues the request, observes
//! it on the endpoint's monitor, and — in streaming mode — forwards chunks
//! to the progress bus as they arrive.

use crate::classify::AttemptFailure;
use gateway_bus::ProgressBus;
use gateway_core::model::Model;
use gateway_core::request::CortexRequest;
use gateway_limiter::{LimiterError, ScheduleOptions};
use std::time::Duration;
use uuid::Uuid;

pub const REQUEST_INDEX_HEADER: &str = "X-Cortex-Request-Index";

pub struct AttemptOutcome {
    pub body: serde_json::Value,
    pub status: u16,
    pub duration: Duration,
}

pub struct FailedAttempt {
    pub failure: AttemptFailure,
    pub duration: Duration,
    pub retry_after: Option<Duration>,
    pub body: Option<serde_json::Value>,
}

pub enum AttemptError {
    Http(FailedAttempt),
    ScheduleExpired { id: String },
}

/// Issues one attempt (competitor `k`) against `model.endpoints[endpoint_index]`.
///
/// `start_call`/`end_call`/`increment_error_count` run inside the scheduled
/// job, so a job that never gets past the limiter's queue before
/// `expiration` elapses never contributes a monitor sample at all — only
/// calls that actually reach the wire do (spec's in-flight invariant).
#[allow(clippy::too_many_arguments)]
pub async fn send(
    client: &reqwest::Client,
    request: &CortexRequest,
    model: &Model,
    endpoint_index: usize,
    competitor_index: usize,
    streaming: bool,
    bus: Option<&ProgressBus>,
) -> Result<AttemptOutcome, AttemptError> {
    let endpoint = &model.endpoints[endpoint_index];
    let expiration = request.pathway_timeout + Duration::from_millis(1000);
    let job_id = format!("{}-{}", request.request_id, request.attempt);

    let outcome = endpoint
        .limiter
        .schedule(
            ScheduleOptions {
                expiration,
                id: job_id.clone(),
                cancel: request.cancel_token.clone(),
            },
            || async {
                let call_id = endpoint.monitor.start_call();
                let result = if streaming {
                    perform_streaming(client, request, competitor_index, request.request_id, bus).await
                } else {
                    perform_buffered(client, request, competitor_index).await
                };

                match result {
                    Ok((body, status)) => {
                        let duration = endpoint.monitor.end_call(call_id);
                        Ok(AttemptOutcome { body, status, duration })
                    }
                    Err((failure, retry_after, body)) => {
                        let status = match failure {
                            AttemptFailure::Status(s) => Some(s),
                            _ => None,
                        };
                        let duration = endpoint.monitor.increment_error_count(call_id, status);
                        Err(FailedAttempt {
                            failure,
                            duration,
                            retry_after,
                            body,
                        })
                    }
                }
            },
        )
        .await;

    match outcome {
        Ok(Ok(attempt)) => Ok(attempt),
        Ok(Err(failed)) => Err(AttemptError::Http(failed)),
        Err(LimiterError::ScheduleExpired { id }) => Err(AttemptError::ScheduleExpired { id }),
        Err(LimiterError::Cancelled { .. }) => Err(AttemptError::Http(FailedAttempt {
            failure: AttemptFailure::Cancelled,
            duration: Duration::ZERO,
            retry_after: None,
            body: None,
        })),
        Err(LimiterError::Internal { .. }) => Err(AttemptError::ScheduleExpired { id: job_id }),
    }
}

fn build_request(
    client: &reqwest::Client,
    request: &CortexRequest,
    competitor_index: usize,
) -> reqwest::RequestBuilder {
    let method = request
        .method
        .parse::<reqwest::Method>()
        .unwrap_or(reqwest::Method::POST);

    let mut builder = client
        .request(method.clone(), &request.url)
        .header(REQUEST_INDEX_HEADER, competitor_index.to_string());

    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }

    if let serde_json::Value::Object(params) = &request.params {
        if !params.is_empty() {
            builder = builder.query(params);
        }
    }

    if method != reqwest::Method::GET && !request.data.is_null() {
        builder = builder.json(&request.data);
    }

    builder
}

type AttemptFailureTuple = (AttemptFailure, Option<Duration>, Option<serde_json::Value>);

async fn perform_buffered(
    client: &reqwest::Client,
    request: &CortexRequest,
    competitor_index: usize,
) -> Result<(serde_json::Value, u16), AttemptFailureTuple> {
    let response = build_request(client, request, competitor_index)
        .send()
        .await
        .map_err(|_| (AttemptFailure::TransportReset, None, None))?;

    let status = response.status();
    let retry_after = retry_after_of(&response);

    if status.is_success() {
        let body = response
            .json::<serde_json::Value>()
            .await
            .unwrap_or(serde_json::Value::Null);
        Ok((body, status.as_u16()))
    } else {
        let status_code = status.as_u16();
        let body = response.json::<serde_json::Value>().await.ok();
        Err((AttemptFailure::Status(status_code), retry_after, body))
    }
}

async fn perform_streaming(
    client: &reqwest::Client,
    request: &CortexRequest,
    competitor_index: usize,
    request_id: Uuid,
    bus: Option<&ProgressBus>,
) -> Result<(serde_json::Value, u16), AttemptFailureTuple> {
    use futures::StreamExt;

    let response = build_request(client, request, competitor_index)
        .send()
        .await
        .map_err(|_| (AttemptFailure::TransportReset, None, None))?;

    let status = response.status();
    let retry_after = retry_after_of(&response);

    if !status.is_success() {
        return Err((AttemptFailure::Status(status.as_u16()), retry_after, None));
    }

    let mut buffer = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|_| (AttemptFailure::TransportReset, None, None))?;
        if let Some(bus) = bus {
            if let Ok(text) = std::str::from_utf8(&chunk) {
                let _ = bus
                    .publish_request_progress(request_id, serde_json::json!({"chunk": text}))
                    .await;
            }
        }
        buffer.extend_from_slice(&chunk);
    }

    let body = serde_json::from_slice(&buffer).unwrap_or(serde_json::Value::Null);
    Ok((body, status.as_u16()))
}

fn retry_after_of(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}
