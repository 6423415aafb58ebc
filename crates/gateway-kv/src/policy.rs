//! Bounded exponential backoff for reconnect attempts.
//!
//! Carries over `tower-resilience-reconnect`'s `ReconnectPolicy` shape, fixed
//! to the single schedule the spec names: `min(100 * 2^n, 30_000)` ms,
//! giving up (reporting "disabled") after 10 attempts but continuing to
//! retry at the capped delay in the background.

use std::time::Duration;

pub const MAX_ATTEMPTS_BEFORE_DISABLED: u32 = 10;
const BASE_MS: u64 = 100;
const CAP_MS: u64 = 30_000;

/// Delay before reconnect attempt number `attempt` (0-indexed).
pub fn delay_for_attempt(attempt: u32) -> Duration {
    let shifted = BASE_MS.saturating_mul(1u64 << attempt.min(20));
    Duration::from_millis(shifted.min(CAP_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_then_caps() {
        assert_eq!(delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(delay_for_attempt(8), Duration::from_millis(25_600));
        assert_eq!(delay_for_attempt(9), Duration::from_millis(30_000));
        assert_eq!(delay_for_attempt(20), Duration::from_millis(30_000));
    }
}
