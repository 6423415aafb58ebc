//! Backoff and hedge-stagger timing (spec §4.4.1/§4.4.2).

use std::time::Duration;

/// `base · 2^attempt · (1 + 0.2·U[0,1))`, `base = 1000ms` for rate-limited
/// failures and `200ms` otherwise. `retry_after`, when present, is honored
/// verbatim instead (the upstream's own `Retry-After` header on a 429).
pub fn retry_delay(attempt: u32, rate_limited: bool, retry_after: Option<Duration>) -> Duration {
    if let Some(retry_after) = retry_after {
        return retry_after;
    }
    let base = if rate_limited { 1000.0 } else { 200.0 };
    let jitter = 1.0 + 0.2 * rand::random::<f64>();
    let millis = base * 2f64.powi(attempt as i32) * jitter;
    Duration::from_millis(millis.round() as u64)
}

/// `max(0, dup_after · (2^k − 1) · (1 + 0.2·U[0,1)))` — competitor `k`'s
/// launch delay relative to the start of the attempt (spec §4.4.2 step 1).
pub fn hedge_launch_delay(k: usize, dup_after: Duration) -> Duration {
    if k == 0 {
        return Duration::ZERO;
    }
    let jitter = 1.0 + 0.2 * rand::random::<f64>();
    let multiplier = (2f64.powi(k as i32) - 1.0) * jitter;
    Duration::from_millis((dup_after.as_millis() as f64 * multiplier).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_wins_over_computed_backoff() {
        let delay = retry_delay(5, true, Some(Duration::from_secs(3)));
        assert_eq!(delay, Duration::from_secs(3));
    }

    #[test]
    fn rate_limited_backoff_uses_1s_base() {
        let delay = retry_delay(0, true, None);
        assert!(delay >= Duration::from_millis(1000) && delay <= Duration::from_millis(1200));
    }

    #[test]
    fn non_rate_limited_backoff_uses_200ms_base() {
        let delay = retry_delay(0, false, None);
        assert!(delay >= Duration::from_millis(200) && delay <= Duration::from_millis(240));
    }

    #[test]
    fn hedge_launch_delay_is_zero_for_first_competitor() {
        assert_eq!(hedge_launch_delay(0, Duration::from_secs(1)), Duration::ZERO);
    }

    #[test]
    fn hedge_launch_delay_grows_geometrically() {
        let d1 = hedge_launch_delay(1, Duration::from_secs(1));
        let d2 = hedge_launch_delay(2, Duration::from_secs(1));
        assert!(d1 >= Duration::from_millis(800) && d1 <= Duration::from_millis(1200));
        assert!(d2 >= Duration::from_millis(2400) && d2 <= Duration::from_millis(3600));
    }
}
