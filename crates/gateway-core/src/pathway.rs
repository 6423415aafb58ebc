//! The Pathway Dispatch Surface (C8): the seam through which whatever sits
//! above the gateway (request validation, business routing, whatever a
//! given deployment needs) hooks into dispatch without the gateway knowing
//! anything about it.

use crate::request::CortexRequest;
use crate::selector::EndpointSelector;
use futures::future::BoxFuture;

/// Implemented once per deployment-specific routing concern. The gateway
/// ships no concrete pathway beyond test doubles; callers provide their own.
pub trait Pathway: Send + Sync {
    /// Called once at the start of dispatch, before any endpoint is chosen.
    fn init_request(&self, request: &mut CortexRequest);

    /// Called whenever the executor needs a (re)selection — first attempt,
    /// a retry, or a hedge competitor — so a pathway can veto or steer the
    /// selector's choice.
    fn select_new_endpoint(&self, request: &mut CortexRequest, selector: &EndpointSelector);

    /// Resolves deployment-specific arguments ahead of execution. Returns a
    /// boxed future (not `async fn` in the trait) since `Pathway` is used as
    /// a trait object.
    fn resolver(&self, args: serde_json::Value, use_redis: bool) -> BoxFuture<'static, Result<(), crate::error::DispatchError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use crate::selector::SelectorConfig;
    use gateway_kv::KvHandle;

    struct NoopPathway;

    impl Pathway for NoopPathway {
        fn init_request(&self, request: &mut CortexRequest) {
            request.use_redis = false;
        }

        fn select_new_endpoint(&self, request: &mut CortexRequest, selector: &EndpointSelector) {
            let model = Model::new("m", false, 1024, vec![]);
            if let crate::selector::SelectionOutcome::Endpoint(idx) = selector.select(&model) {
                request.selected_endpoint = Some(idx);
            }
        }

        fn resolver(&self, _args: serde_json::Value, _use_redis: bool) -> BoxFuture<'static, Result<(), crate::error::DispatchError>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn noop_pathway_resolves_immediately() {
        let pathway = NoopPathway;
        let mut request = CortexRequest::new("echo", "m", "https://example.invalid");
        pathway.init_request(&mut request);
        let selector = EndpointSelector::new(SelectorConfig::default());
        pathway.select_new_endpoint(&mut request, &selector);
        assert!(request.selected_endpoint.is_none());
        let result = pathway.resolver(serde_json::json!({}), false).await;
        assert!(result.is_ok());
        let _ = KvHandle::disabled();
    }
}
