//! Connection lifecycle state, carried over from
//! `tower-resilience-reconnect`'s `ReconnectState`/`ConnectionState` pair.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Connection lifecycle observed by the rest of the system (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    /// More than `MAX_ATTEMPTS_BEFORE_DISABLED` consecutive reconnect
    /// attempts have failed. Background reconnection keeps running at the
    /// capped delay; callers should degrade to local-only mode.
    Disabled,
}

#[derive(Clone)]
pub struct ReconnectState {
    state: Arc<AtomicU64>,
    attempts: Arc<AtomicU32>,
    last_connected: Arc<AtomicU64>,
    epoch: Instant,
}

impl ReconnectState {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU64::new(Self::encode(ConnectionState::Disconnected))),
            attempts: Arc::new(AtomicU32::new(0)),
            last_connected: Arc::new(AtomicU64::new(0)),
            epoch: Instant::now(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        Self::decode(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(Self::encode(state), Ordering::Release);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    pub fn increment_attempts(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn reset_attempts(&self) {
        self.attempts.store(0, Ordering::Release);
    }

    pub fn mark_connected(&self) {
        self.set_state(ConnectionState::Connected);
        self.reset_attempts();
        let millis = self.epoch.elapsed().as_millis() as u64;
        self.last_connected.store(millis, Ordering::Release);
    }

    pub fn mark_disconnected(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    pub fn mark_reconnecting(&self) {
        self.set_state(ConnectionState::Reconnecting);
    }

    pub fn mark_disabled(&self) {
        self.set_state(ConnectionState::Disabled);
    }

    pub fn time_since_connected(&self) -> Option<Duration> {
        let last = self.last_connected.load(Ordering::Acquire);
        if last == 0 {
            None
        } else {
            let now = self.epoch.elapsed().as_millis() as u64;
            Some(Duration::from_millis(now.saturating_sub(last)))
        }
    }

    fn encode(state: ConnectionState) -> u64 {
        match state {
            ConnectionState::Connecting => 0,
            ConnectionState::Connected => 1,
            ConnectionState::Disconnected => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::Disabled => 4,
        }
    }

    fn decode(encoded: u64) -> ConnectionState {
        match encoded {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Connected,
            2 => ConnectionState::Disconnected,
            3 => ConnectionState::Reconnecting,
            _ => ConnectionState::Disabled,
        }
    }
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReconnectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectState")
            .field("state", &self.state())
            .field("attempts", &self.attempts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        let s = ReconnectState::new();
        assert_eq!(s.state(), ConnectionState::Disconnected);
        assert_eq!(s.attempts(), 0);
    }

    #[test]
    fn connect_resets_attempts() {
        let s = ReconnectState::new();
        s.increment_attempts();
        s.increment_attempts();
        s.mark_connected();
        assert_eq!(s.attempts(), 0);
        assert_eq!(s.state(), ConnectionState::Connected);
        assert!(s.time_since_connected().is_some());
    }

    #[test]
    fn disabled_after_cap() {
        let s = ReconnectState::new();
        for _ in 0..10 {
            s.increment_attempts();
        }
        s.mark_disabled();
        assert_eq!(s.state(), ConnectionState::Disabled);
        assert_eq!(s.attempts(), 10);
    }
}
