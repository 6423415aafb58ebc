//! Abstraction over the shared key-value store used by the rate limiter
//! (cluster token accounting) and the progress bus (pub/sub).
//!
//! Wraps `redis`'s async multiplexed connection. Reconnect policy and
//! lifecycle tracking are carried over from `tower-resilience-reconnect`'s
//! `ReconnectPolicy`/`ReconnectState` pair, fixed to the bounded schedule
//! spec §4.6 names.

pub mod config;
pub mod error;
pub mod events;
mod policy;
pub mod state;

pub use config::{KvConfig, KvConfigBuilder};
pub use error::KvError;
pub use events::{KvEvent, KvEventListener};
pub use state::ConnectionState;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use state::ReconnectState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

/// A handle to the shared KV store. Cheap to clone; all clones share the
/// same underlying connection and reconnect state.
#[derive(Clone)]
pub enum KvHandle {
    Disabled,
    Connected(Arc<Inner>),
}

pub struct Inner {
    client: redis::Client,
    conn: Mutex<Option<ConnectionManager>>,
    state: ReconnectState,
    listeners: Arc<Vec<Box<dyn KvEventListener>>>,
}

impl KvHandle {
    /// Builds a handle per `config`. `connection_string: None` returns
    /// [`KvHandle::Disabled`] immediately — the one branch spec §4.6
    /// requires explicitly, modeled as a variant rather than an `Option` so
    /// callers can't forget to check.
    pub async fn connect(config: KvConfig, listeners: Vec<Box<dyn KvEventListener>>) -> Self {
        let Some(conn_str) = config.connection_string else {
            return KvHandle::Disabled;
        };

        let client = match redis::Client::open(conn_str) {
            Ok(c) => c,
            Err(e) => {
                emit(&listeners, KvEvent::Error { message: e.to_string() });
                return KvHandle::Disabled;
            }
        };

        let inner = Arc::new(Inner {
            client,
            conn: Mutex::new(None),
            state: ReconnectState::new(),
            listeners: Arc::new(listeners),
        });

        let handle = KvHandle::Connected(inner.clone());
        inner.state.mark_reconnecting();
        tokio::spawn(reconnect_loop(inner, config.connect_timeout));
        handle
    }

    /// A disabled handle — local-only mode, never attempts a connection.
    pub fn disabled() -> Self {
        KvHandle::Disabled
    }

    pub fn state(&self) -> ConnectionState {
        match self {
            KvHandle::Disabled => ConnectionState::Disconnected,
            KvHandle::Connected(inner) => inner.state.state(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.state(), ConnectionState::Disabled) && !matches!(self, KvHandle::Disabled)
    }

    /// Publishes `payload` to `channel`. A no-op `Ok(())` when disabled so
    /// callers that already degrade to local fan-out don't need a branch.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), KvError> {
        let KvHandle::Connected(inner) = self else {
            return Ok(());
        };
        let mut guard = inner.conn.lock().await;
        let Some(conn) = guard.as_mut() else {
            return Err(KvError::Disabled);
        };
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    /// Subscribes to `channel`, returning a broadcast receiver fed by a
    /// background task pumping the redis pub/sub stream. Returns `None`
    /// when disabled.
    pub async fn subscribe(&self, channel: &str) -> Option<broadcast::Receiver<String>> {
        let KvHandle::Connected(inner) = self else {
            return None;
        };
        let (tx, rx) = broadcast::channel(256);
        let client = inner.client.clone();
        let channel = channel.to_string();
        tokio::spawn(async move {
            loop {
                match client.get_async_pubsub().await {
                    Ok(mut pubsub) => {
                        if pubsub.subscribe(&channel).await.is_err() {
                            tokio::time::sleep(Duration::from_secs(1)).await;
                            continue;
                        }
                        let mut stream = pubsub.on_message();
                        use futures_util::StreamExt;
                        while let Some(msg) = stream.next().await {
                            if let Ok(payload) = msg.get_payload::<String>() {
                                let _ = tx.send(payload);
                            }
                        }
                    }
                    Err(_) => {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
        Some(rx)
    }

    /// Atomically increments a fixed-window counter keyed by `key`, setting
    /// its expiry to `window` on first increment. Used by the clustered
    /// rate limiter to replicate the reservoir's fixed-window accounting
    /// (the distributed generalization of `FixedWindowState`).
    pub async fn incr_window(&self, key: &str, window: Duration) -> Result<i64, KvError> {
        let KvHandle::Connected(inner) = self else {
            return Err(KvError::Disabled);
        };
        let mut guard = inner.conn.lock().await;
        let conn = guard.as_mut().ok_or(KvError::Disabled)?;
        let count: i64 = conn.incr(key, 1).await?;
        if count == 1 {
            let _: () = conn.expire(key, window.as_secs().max(1) as i64).await?;
        }
        Ok(count)
    }

    /// Decrements an in-flight counter keyed by `key` (clustered
    /// concurrency cap); floors at 0.
    pub async fn decr(&self, key: &str) -> Result<(), KvError> {
        let KvHandle::Connected(inner) = self else {
            return Ok(());
        };
        let mut guard = inner.conn.lock().await;
        let Some(conn) = guard.as_mut() else {
            return Ok(());
        };
        let _: i64 = conn.decr(key, 1).await.unwrap_or(0);
        Ok(())
    }
}

async fn reconnect_loop(inner: Arc<Inner>, connect_timeout: Duration) {
    loop {
        let attempt = inner.state.attempts();
        let connect = async {
            let manager = inner.client.get_connection_manager().await?;
            Ok::<_, redis::RedisError>(manager)
        };

        match tokio::time::timeout(connect_timeout, connect).await {
            Ok(Ok(manager)) => {
                *inner.conn.lock().await = Some(manager);
                inner.state.mark_connected();
                emit(&inner.listeners, KvEvent::Connect);
                emit(&inner.listeners, KvEvent::Ready);
                // Hold "connected" until the caller observes an error via
                // a failed command; this adapter has no independent health
                // ping, mirroring the teacher's reconnect crate which also
                // only reacts to observed failures rather than polling.
                return;
            }
            Ok(Err(e)) => {
                emit(&inner.listeners, KvEvent::Error { message: e.to_string() });
            }
            Err(_) => {
                emit(
                    &inner.listeners,
                    KvEvent::Error {
                        message: format!("connect timed out after {connect_timeout:?}"),
                    },
                );
            }
        }

        let next_attempt = inner.state.increment_attempts();
        if next_attempt >= policy::MAX_ATTEMPTS_BEFORE_DISABLED {
            inner.state.mark_disabled();
            emit(&inner.listeners, KvEvent::Disabled { attempts: next_attempt });
        } else {
            inner.state.mark_reconnecting();
            emit(&inner.listeners, KvEvent::Reconnecting { attempt: next_attempt });
        }

        tokio::time::sleep(policy::delay_for_attempt(next_attempt.saturating_sub(1))).await;
    }
}

fn emit(listeners: &[Box<dyn KvEventListener>], event: KvEvent) {
    for l in listeners {
        l.on_event(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_without_connection_string() {
        let handle = KvHandle::connect(KvConfig::default(), vec![]).await;
        assert!(matches!(handle, KvHandle::Disabled));
        assert!(!handle.is_enabled());
        assert!(handle.publish("requestProgress", "{}").await.is_ok());
        assert!(handle.subscribe("requestProgress").await.is_none());
    }

    #[test]
    fn builder_sets_fields() {
        let config = KvConfigBuilder::new()
            .connection_string("redis://localhost:6379")
            .connect_timeout(Duration::from_secs(5))
            .build();
        assert_eq!(config.connection_string.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }
}
