//! Wiring test for the registration/subscription flow a pathway uses to
//! hand off async execution to the progress bus (spec §4.5), exercised
//! through `gateway`'s public re-exports with no KV store configured.

use gateway::{KvHandle, ProgressBus};
use uuid::Uuid;

#[tokio::test]
async fn registered_request_starts_locally_on_subscription_publish() {
    let bus = ProgressBus::new(KvHandle::disabled(), None);
    let request_id = Uuid::new_v4();
    let mut progress_rx = bus.subscribe(request_id);

    bus.register(request_id, serde_json::json!({"prompt": "hi"}), |args, use_redis| {
        Box::pin(async move {
            assert!(!use_redis);
            assert_eq!(args["prompt"], "hi");
        })
    });

    bus.publish_request_progress_subscription(vec![request_id]).await.unwrap();
    bus.publish_request_progress(request_id, serde_json::json!({"chunk": "hello"}))
        .await
        .unwrap();

    let event = progress_rx.recv().await.unwrap();
    assert_eq!(event.request_id, request_id);
}
