//! Progress Bus (C5): publishes and relays request-progress events over
//! `gateway-kv`'s pub/sub under two fixed channel names (spec §6), encrypted
//! through `gateway-envelope` when a key is configured, with a local
//! `DashMap`-backed registration table deciding whether an async request is
//! executed on this instance or forwarded to whichever instance already
//! owns it.

pub mod error;
mod registration;

pub use error::BusError;
pub use registration::{ProgressEvent, Resolver};

use dashmap::DashMap;
use futures::future::BoxFuture;
use gateway_envelope::Envelope;
use gateway_kv::KvHandle;
use registration::RegisteredRequest;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// The channel request-progress events are published on.
pub const REQUEST_PROGRESS_CHANNEL: &str = "requestProgress";
/// The channel a batch of request ids is announced on when the originating
/// instance doesn't own all of them locally (spec §4.5).
pub const REQUEST_PROGRESS_SUBSCRIPTIONS_CHANNEL: &str = "requestProgressSubscriptions";

/// Encrypted request-progress pub/sub plus the local registration table.
/// Cheap to clone: registrations and the KV handle are both already
/// reference-counted.
#[derive(Clone)]
pub struct ProgressBus {
    registrations: Arc<DashMap<Uuid, Arc<RegisteredRequest>>>,
    kv: KvHandle,
    envelope: Option<Envelope>,
}

impl ProgressBus {
    pub fn new(kv: KvHandle, envelope: Option<Envelope>) -> Self {
        let bus = Self {
            registrations: Arc::new(DashMap::new()),
            kv,
            envelope,
        };
        bus.spawn_progress_relay();
        bus.spawn_subscription_relay();
        bus
    }

    /// Registers `request_id` with the resolver a pathway would call to
    /// begin execution (spec §3's registered-request entry), without
    /// starting it. A later [`Self::publish_request_progress_subscription`]
    /// (local or remote) decides when — and with which `use_redis` value —
    /// execution actually begins.
    pub fn register<F>(&self, request_id: Uuid, args: serde_json::Value, resolver: F)
    where
        F: Fn(serde_json::Value, bool) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let entry = self
            .registrations
            .entry(request_id)
            .or_insert_with(|| Arc::new(RegisteredRequest::new()));
        *entry.args.lock().unwrap() = args;
        *entry.resolver.lock().unwrap() = Some(Arc::new(resolver));
    }

    /// Returns a receiver for `request_id`'s local progress events. Safe to
    /// call even if nothing has `register`ed that id yet — the table entry
    /// is created lazily, matching `register`'s own `or_insert_with`.
    pub fn subscribe(&self, request_id: Uuid) -> broadcast::Receiver<ProgressEvent> {
        let entry = self
            .registrations
            .entry(request_id)
            .or_insert_with(|| Arc::new(RegisteredRequest::new()));
        entry.sender.subscribe()
    }

    /// Publishes one progress event for `request_id`. Delivered over the
    /// shared bus only when the request is registered locally with
    /// `use_redis = true` and a KV store is configured; otherwise fanned
    /// out to local subscribers directly (spec §4.5).
    pub async fn publish_request_progress(&self, request_id: Uuid, payload: serde_json::Value) -> Result<(), BusError> {
        let event = ProgressEvent { request_id, payload };
        let route_via_kv = self.kv.is_enabled()
            && self
                .registrations
                .get(&request_id)
                .map(|r| r.use_redis())
                .unwrap_or(false);

        if route_via_kv {
            let body = serde_json::to_string(&event)?;
            let wire = match &self.envelope {
                Some(envelope) => envelope.encrypt(&body).map_err(BusError::Decrypt)?,
                None => body,
            };
            self.kv.publish(REQUEST_PROGRESS_CHANNEL, &wire).await?;
            // The relay subscribed to the same channel delivers this back
            // to local subscribers once it round-trips through the store;
            // we don't also call `deliver_local` here to avoid double
            // delivery on instances where pub/sub loops back synchronously.
        } else {
            self.deliver_local(&event);
        }
        Ok(())
    }

    /// Spec §4.5's `publishRequestProgressSubscription`: for every id this
    /// instance owns (has registered) and has not yet started, begins
    /// local execution with `use_redis = false`. Remaining ids are
    /// published as a JSON list to `requestProgressSubscriptions` so
    /// whichever instance does own them can pick them up.
    pub async fn publish_request_progress_subscription(&self, request_ids: Vec<Uuid>) -> Result<(), BusError> {
        let mut foreign = Vec::new();
        for id in request_ids {
            match self.registrations.get(&id) {
                Some(entry) if !entry.is_started() => {
                    self.start_if_owned(id, &entry, false);
                }
                Some(_) => {}
                None => foreign.push(id),
            }
        }

        if !foreign.is_empty() && self.kv.is_enabled() {
            let body = serde_json::to_string(&foreign)?;
            self.kv.publish(REQUEST_PROGRESS_SUBSCRIPTIONS_CHANNEL, &body).await?;
        }
        Ok(())
    }

    pub fn unregister(&self, request_id: &Uuid) {
        self.registrations.remove(request_id);
    }

    /// Starts execution for `id` if this instance actually won the
    /// exactly-once `mark_started` race, spawning the registered resolver.
    fn start_if_owned(&self, id: Uuid, entry: &Arc<RegisteredRequest>, use_redis: bool) {
        if !entry.mark_started(use_redis) {
            return;
        }
        let Some(resolver) = entry.resolver.lock().unwrap().clone() else {
            return;
        };
        let args = entry.args.lock().unwrap().clone();
        let bus = self.clone();
        tokio::spawn(async move {
            resolver(args, use_redis).await;
            bus.unregister(&id);
        });
    }

    fn deliver_local(&self, event: &ProgressEvent) {
        if let Some(registration) = self.registrations.get(&event.request_id) {
            let _ = registration.sender.send(event.clone());
        }
    }

    /// Background task relaying incoming `requestProgress` messages (our
    /// own publishes and those from other processes sharing the KV store)
    /// into local subscriber channels. A no-op when the KV store is
    /// disabled, since `publish_request_progress` already delivers locally
    /// in that case.
    fn spawn_progress_relay(&self) {
        if !self.kv.is_enabled() {
            return;
        }
        let kv = self.kv.clone();
        let envelope = self.envelope.clone();
        let registrations = self.registrations.clone();
        tokio::spawn(async move {
            let Some(mut rx) = kv.subscribe(REQUEST_PROGRESS_CHANNEL).await else {
                return;
            };
            while let Ok(raw) = rx.recv().await {
                let decrypted = match &envelope {
                    Some(envelope) => match envelope.decrypt_or_passthrough(&raw) {
                        Ok(plaintext) => plaintext,
                        Err(_err) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!("failed to decrypt progress event, dropping");
                            continue;
                        }
                    },
                    None => raw,
                };
                let Ok(event) = serde_json::from_str::<ProgressEvent>(&decrypted) else {
                    continue;
                };
                if let Some(registration) = registrations.get(&event.request_id) {
                    let _ = registration.sender.send(event);
                }
            }
        });
    }

    /// Background task relaying `requestProgressSubscriptions` batches: for
    /// every id in an incoming batch that this instance owns and hasn't
    /// started, begins execution with `use_redis = true` so its progress
    /// is published back through the shared bus for the originator to see
    /// (spec §4.5, scenario 6).
    fn spawn_subscription_relay(&self) {
        if !self.kv.is_enabled() {
            return;
        }
        let kv = self.kv.clone();
        let bus = self.clone();
        tokio::spawn(async move {
            let Some(mut rx) = kv.subscribe(REQUEST_PROGRESS_SUBSCRIPTIONS_CHANNEL).await else {
                return;
            };
            while let Ok(raw) = rx.recv().await {
                let Ok(ids) = serde_json::from_str::<Vec<Uuid>>(&raw) else {
                    continue;
                };
                for id in ids {
                    let entry = bus.registrations.get(&id).map(|r| r.value().clone());
                    if let Some(entry) = entry {
                        if !entry.is_started() {
                            bus.start_if_owned(id, &entry, true);
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_to_local_subscriber_without_kv() {
        let bus = ProgressBus::new(KvHandle::disabled(), None);
        let request_id = Uuid::new_v4();
        let mut rx = bus.subscribe(request_id);

        bus.publish_request_progress(request_id, serde_json::json!({"chunk": "hi"}))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.request_id, request_id);
        assert_eq!(event.payload["chunk"], "hi");
    }

    #[tokio::test]
    async fn subscription_pickup_starts_local_resolver_exactly_once() {
        let bus = ProgressBus::new(KvHandle::disabled(), None);
        let request_id = Uuid::new_v4();
        let (tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();

        bus.register(request_id, serde_json::json!({"n": 1}), move |_args, use_redis| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(use_redis);
            })
        });

        bus.publish_request_progress_subscription(vec![request_id]).await.unwrap();
        bus.publish_request_progress_subscription(vec![request_id]).await.unwrap();

        let use_redis = started_rx.recv().await.unwrap();
        assert!(!use_redis);
        assert!(started_rx.try_recv().is_err(), "resolver must run exactly once");
    }

    #[tokio::test]
    async fn unregistered_id_is_not_started() {
        let bus = ProgressBus::new(KvHandle::disabled(), None);
        let request_id = Uuid::new_v4();
        // No `register` call: nothing should be owned locally, and without
        // a KV store there's nowhere to forward to either.
        bus.publish_request_progress_subscription(vec![request_id]).await.unwrap();
    }
}
