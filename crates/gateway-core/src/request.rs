//! The request-scoped state threaded through a single dispatch (spec §3's
//! `CortexRequest`). Lives in `gateway-core` rather than `gateway-executor`
//! so both the executor and the pathway surface (C8) can operate on it
//! without a dependency cycle; `gateway-executor` builds `init_request`/
//! `select_new_endpoint` as free functions over this type rather than
//! inherent methods, since only the crate that defines a type may add
//! inherent impls for it.

use gateway_limiter::CancellationToken;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// One in-flight dispatch. Pathways mutate this through [`crate::pathway::Pathway`]
/// before and during execution; the executor owns its lifecycle end to end.
#[derive(Debug, Clone)]
pub struct CortexRequest {
    pub request_id: Uuid,
    pub pathway_name: String,
    pub model_name: String,
    pub selected_endpoint: Option<usize>,

    pub url: String,
    pub method: String,
    pub params: Value,
    pub headers: HashMap<String, String>,
    pub data: Value,

    pub cache: bool,
    pub stream: bool,

    pub pathway_timeout: Duration,
    pub enable_duplicate_requests: Option<bool>,
    pub duplicate_request_after: Option<Duration>,

    pub use_redis: bool,
    pub attempt: u32,
    pub started_at: Instant,
    /// Shared across every hedge competitor cloned from this request
    /// (spec §4.2): cancelling it fails any limiter wait in progress with
    /// `Cancelled` instead of letting it be retried.
    pub cancel_token: CancellationToken,
}

impl CortexRequest {
    pub fn new(pathway_name: impl Into<String>, model_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            pathway_name: pathway_name.into(),
            model_name: model_name.into(),
            selected_endpoint: None,
            url: url.into(),
            method: "POST".to_string(),
            params: Value::Null,
            headers: HashMap::new(),
            data: Value::Null,
            cache: false,
            stream: false,
            pathway_timeout: Duration::from_secs(30),
            enable_duplicate_requests: None,
            duplicate_request_after: None,
            use_redis: false,
            attempt: 0,
            started_at: Instant::now(),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Cancels this request and every hedge competitor cloned from it.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Whether this request's body/params ask for a streamed response.
    pub fn stream_requested(&self) -> bool {
        self.stream
            || self.params.get("stream").and_then(Value::as_bool).unwrap_or(false)
            || self.data.get("stream").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Clears any streaming flags left over from an unsupported-streaming
    /// fallback (spec §4.4.1 step 3).
    pub fn clear_stream_flags(&mut self) {
        self.stream = false;
        if let Value::Object(map) = &mut self.params {
            map.remove("stream");
        }
        if let Value::Object(map) = &mut self.data {
            map.remove("stream");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_has_no_endpoint_assigned() {
        let req = CortexRequest::new("chat", "gpt-mini", "https://example.invalid");
        assert!(req.selected_endpoint.is_none());
        assert_eq!(req.attempt, 0);
    }

    #[test]
    fn stream_requested_checks_flag_and_body_fields() {
        let mut req = CortexRequest::new("chat", "gpt-mini", "https://example.invalid");
        assert!(!req.stream_requested());
        req.data = serde_json::json!({"stream": true});
        assert!(req.stream_requested());
        req.clear_stream_flags();
        assert!(!req.stream_requested());
    }

    #[test]
    fn cancelling_a_request_is_observed_on_its_clones() {
        let req = CortexRequest::new("chat", "gpt-mini", "https://example.invalid");
        let competitor = req.clone();
        assert!(!competitor.is_cancelled());
        req.cancel();
        assert!(competitor.is_cancelled());
    }
}
