//! Endpoint Monitor (C1): per-endpoint call rate, error rate, 429 rate,
//! rolling average latency, and a hysteresis-based health flag.
//!
//! Modeled the way `tower-resilience-circuitbreaker::circuit::Circuit`
//! tracks a sliding window of `CallRecord`s in a `VecDeque`, but windowed
//! by time only and producing continuous rates rather than a three-state
//! machine.

use crate::model::Model;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default period for [`spawn_snapshot_task`] (spec's C1 background task).
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(30);

/// Opaque per-call identifier, monotonic per endpoint (spec §4.1).
pub type CallId = u64;

#[derive(Debug, Clone, Copy)]
struct CallRecord {
    timestamp: Instant,
    duration: Duration,
    is_error: bool,
    is_429: bool,
}

struct InFlight {
    id: CallId,
    started_at: Instant,
}

/// Tunable window sizes and health-flip thresholds (Open Question #1).
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub window: Duration,
    pub error_rate_threshold: f64,
    pub error429_rate_threshold: f64,
    pub recovery_window: Duration,
    pub recovery_error_rate_floor: f64,
    pub recovery_error429_rate_floor: f64,
    /// Ceiling on how long an in-flight call is tracked without completing.
    /// A hedge race's loser is dropped rather than run to completion, so it
    /// never calls `end_call`/`increment_error_count`; past this age its
    /// `in_flight` entry is pruned by `cleanup` instead of leaking forever.
    pub in_flight_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30),
            error_rate_threshold: 0.5,
            error429_rate_threshold: 0.2,
            recovery_window: Duration::from_secs(10),
            recovery_error_rate_floor: 0.1,
            recovery_error429_rate_floor: 0.05,
            in_flight_timeout: Duration::from_secs(120),
        }
    }
}

struct State {
    records: VecDeque<CallRecord>,
    in_flight: Vec<InFlight>,
    healthy: bool,
    unhealthy_since: Option<Instant>,
    clear_since: Option<Instant>,
}

/// Rolling-window call accounting for one endpoint. Reads are effectively
/// lock-free snapshots; writes are serialized per endpoint through an
/// internal mutex (spec §5's shared-resource policy).
pub struct Monitor {
    config: MonitorConfig,
    state: Mutex<State>,
    next_call_id: AtomicU64,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                records: VecDeque::new(),
                in_flight: Vec::new(),
                healthy: true,
                unhealthy_since: None,
                clear_since: None,
            }),
            next_call_id: AtomicU64::new(1),
        }
    }

    /// Records start time, increments in-flight. Does not contribute to
    /// `average_call_duration` until it completes (spec's invariant).
    pub fn start_call(&self) -> CallId {
        let id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().unwrap();
        state.in_flight.push(InFlight {
            id,
            started_at: Instant::now(),
        });
        id
    }

    /// Records completion, updates rolling latency and call rate. Returns
    /// the measured duration.
    pub fn end_call(&self, call_id: CallId) -> Duration {
        let mut state = self.state.lock().unwrap();
        let duration = Self::take_in_flight(&mut state, call_id);
        let now = Instant::now();
        state.records.push_back(CallRecord {
            timestamp: now,
            duration,
            is_error: false,
            is_429: false,
        });
        Self::cleanup(&mut state, self.config.window, self.config.in_flight_timeout);
        self.update_health(&mut state, now);
        duration
    }

    /// Records an error (and, when `status == Some(429)`, a rate-limit
    /// error). Returns the measured duration so the caller can report it.
    pub fn increment_error_count(&self, call_id: CallId, status: Option<u16>) -> Duration {
        let mut state = self.state.lock().unwrap();
        let duration = Self::take_in_flight(&mut state, call_id);
        let now = Instant::now();
        state.records.push_back(CallRecord {
            timestamp: now,
            duration,
            is_error: true,
            is_429: status == Some(429),
        });
        Self::cleanup(&mut state, self.config.window, self.config.in_flight_timeout);
        self.update_health(&mut state, now);
        duration
    }

    fn take_in_flight(state: &mut State, call_id: CallId) -> Duration {
        if let Some(pos) = state.in_flight.iter().position(|c| c.id == call_id) {
            let call = state.in_flight.remove(pos);
            call.started_at.elapsed()
        } else {
            Duration::ZERO
        }
    }

    fn cleanup(state: &mut State, window: Duration, in_flight_timeout: Duration) {
        let now = Instant::now();
        while let Some(front) = state.records.front() {
            if now.duration_since(front.timestamp) > window {
                state.records.pop_front();
            } else {
                break;
            }
        }
        state
            .in_flight
            .retain(|c| now.duration_since(c.started_at) <= in_flight_timeout);
    }

    fn update_health(&self, state: &mut State, now: Instant) {
        let error_rate = Self::rate(state, |r| r.is_error);
        let error429_rate = Self::rate(state, |r| r.is_429);

        if state.healthy {
            if error_rate > self.config.error_rate_threshold
                || error429_rate > self.config.error429_rate_threshold
            {
                state.healthy = false;
                state.unhealthy_since = Some(now);
                state.clear_since = None;
            }
        } else {
            let below_floor = error_rate <= self.config.recovery_error_rate_floor
                && error429_rate <= self.config.recovery_error429_rate_floor;
            if below_floor {
                match state.clear_since {
                    None => state.clear_since = Some(now),
                    Some(since) if now.duration_since(since) >= self.config.recovery_window => {
                        state.healthy = true;
                        state.unhealthy_since = None;
                        state.clear_since = None;
                    }
                    Some(_) => {}
                }
            } else {
                state.clear_since = None;
            }
        }
    }

    fn rate(state: &State, pred: impl Fn(&CallRecord) -> bool) -> f64 {
        if state.records.is_empty() {
            return 0.0;
        }
        let matching = state.records.iter().filter(|r| pred(r)).count();
        matching as f64 / state.records.len() as f64
    }

    pub fn average_call_duration(&self) -> Duration {
        let state = self.state.lock().unwrap();
        if state.records.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = state.records.iter().map(|r| r.duration).sum();
        total / state.records.len() as u32
    }

    pub fn peak_call_rate(&self) -> f64 {
        let state = self.state.lock().unwrap();
        if state.records.is_empty() {
            return 0.0;
        }
        let span = state
            .records
            .back()
            .unwrap()
            .timestamp
            .duration_since(state.records.front().unwrap().timestamp)
            .as_secs_f64()
            .max(1.0);
        state.records.len() as f64 / span
    }

    pub fn call_rate(&self) -> f64 {
        self.peak_call_rate()
    }

    pub fn error_rate(&self) -> f64 {
        let state = self.state.lock().unwrap();
        Self::rate(&state, |r| r.is_error)
    }

    pub fn error429_rate(&self) -> f64 {
        let state = self.state.lock().unwrap();
        Self::rate(&state, |r| r.is_429)
    }

    pub fn healthy(&self) -> bool {
        self.state.lock().unwrap().healthy
    }

    #[cfg(test)]
    fn in_flight_count(&self) -> usize {
        self.state.lock().unwrap().in_flight.len()
    }
}

/// Periodically logs a debug snapshot of every endpoint whose `call_rate`
/// is nonzero (spec §4.1/C1). Spawned by whoever owns `model` — the monitor
/// itself never schedules its own background work — and runs until the
/// returned handle is aborted or dropped.
pub fn spawn_snapshot_task(model: Arc<Model>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for endpoint in &model.endpoints {
                let call_rate = endpoint.monitor.call_rate();
                if call_rate <= 0.0 {
                    continue;
                }
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    model = %model.name,
                    endpoint = endpoint.name.as_deref().unwrap_or(endpoint.url.as_str()),
                    call_rate,
                    error_rate = endpoint.monitor.error_rate(),
                    error429_rate = endpoint.monitor.error429_rate(),
                    avg_duration_ms = endpoint.monitor.average_call_duration().as_millis() as u64,
                    healthy = endpoint.monitor.healthy(),
                    "endpoint monitor snapshot"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = call_rate;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_calls_do_not_affect_average_until_they_end() {
        let monitor = Monitor::new(MonitorConfig::default());
        let _id = monitor.start_call();
        assert_eq!(monitor.average_call_duration(), Duration::ZERO);
    }

    #[test]
    fn end_call_updates_average_and_rate() {
        let monitor = Monitor::new(MonitorConfig::default());
        let id = monitor.start_call();
        std::thread::sleep(Duration::from_millis(5));
        let duration = monitor.end_call(id);
        assert!(duration >= Duration::from_millis(5));
        assert!(monitor.average_call_duration() >= Duration::from_millis(5));
        assert_eq!(monitor.error_rate(), 0.0);
    }

    #[test]
    fn error_429_is_tracked_separately_from_generic_errors() {
        let monitor = Monitor::new(MonitorConfig::default());
        let id = monitor.start_call();
        monitor.increment_error_count(id, Some(429));
        assert_eq!(monitor.error_rate(), 1.0);
        assert_eq!(monitor.error429_rate(), 1.0);
    }

    #[test]
    fn health_flips_false_past_threshold_and_recovers_after_window() {
        let config = MonitorConfig {
            window: Duration::from_millis(80),
            error_rate_threshold: 0.3,
            error429_rate_threshold: 0.9,
            recovery_window: Duration::from_millis(20),
            recovery_error_rate_floor: 0.3,
            recovery_error429_rate_floor: 0.9,
            ..MonitorConfig::default()
        };
        let monitor = Monitor::new(config);
        assert!(monitor.healthy());

        for _ in 0..2 {
            let id = monitor.start_call();
            monitor.increment_error_count(id, None);
        }
        assert!(!monitor.healthy());

        // let the error records age out of the window before the next call,
        // so the success below sees a clean error rate and starts the
        // recovery clock.
        std::thread::sleep(Duration::from_millis(100));
        let id = monitor.start_call();
        monitor.end_call(id);
        assert!(!monitor.healthy(), "recovery window hasn't elapsed yet");

        std::thread::sleep(Duration::from_millis(30));
        let id = monitor.start_call();
        monitor.end_call(id);
        assert!(monitor.healthy(), "recovery window elapsed below the error floor");
    }

    #[test]
    fn stale_in_flight_entries_are_pruned_by_cleanup() {
        let config = MonitorConfig {
            in_flight_timeout: Duration::from_millis(20),
            ..MonitorConfig::default()
        };
        let monitor = Monitor::new(config);

        // simulates a hedge race loser: started but never completed.
        let _abandoned = monitor.start_call();
        assert_eq!(monitor.in_flight_count(), 1);

        std::thread::sleep(Duration::from_millis(30));
        let id = monitor.start_call();
        monitor.end_call(id);

        assert_eq!(monitor.in_flight_count(), 0);
    }

    #[test]
    fn cancelled_calls_are_recorded_via_increment_error_count_caller_choice() {
        // Monitor itself has no notion of "cancelled"; callers that treat a
        // cancellation as not degrading health simply skip calling
        // increment_error_count for losers of a hedged race (spec P10).
        let monitor = Monitor::new(MonitorConfig::default());
        let _id = monitor.start_call();
        assert!(monitor.healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_task_ticks_without_panicking_on_an_active_endpoint() {
        let endpoint = crate::model::Endpoint::builder("https://example.invalid").build(gateway_kv::KvHandle::disabled());
        let id = endpoint.monitor.start_call();
        endpoint.monitor.end_call(id);
        let model = Arc::new(Model::new("m", false, 4096, vec![endpoint]));

        let handle = spawn_snapshot_task(model.clone(), Duration::from_millis(10));
        for _ in 0..3 {
            tokio::time::advance(Duration::from_millis(10)).await;
            tokio::task::yield_now().await;
        }
        assert!(!handle.is_finished());
        handle.abort();
    }
}
