//! Unified error taxonomy for the dispatcher.
//!
//! Mirrors the seven error kinds in the specification's error-handling
//! design as a single tagged enum, the way `ResilienceError<E>` unifies
//! per-layer errors in the resilience crates this workspace is built from.

use std::fmt;
use std::time::Duration;

/// The dispatcher's unified error type.
///
/// Every crate in the workspace eventually surfaces one of these variants
/// at the boundary the executor or bus hands back to a pathway.
#[derive(Debug, Clone)]
pub enum DispatchError {
    /// A transient upstream failure: 408/429/5xx or a transport reset.
    Transient {
        status: Option<u16>,
        retry_after: Option<Duration>,
        message: String,
    },

    /// A permanent upstream failure: 400/413 or other non-retriable 4xx.
    /// Carries the upstream's own response body so callers can surface it
    /// as-is rather than a generic message (spec §7.2: "a response object
    /// is returned rather than thrown").
    Permanent {
        status: u16,
        message: String,
        body: Option<serde_json::Value>,
    },

    /// The attempt was cancelled, either as the loser of a hedged race or by
    /// caller abort.
    Cancelled,

    /// The limiter could not schedule the job within its expiration.
    ScheduleExpired { id: String },

    /// No endpoints configured, or an endpoint has no limiter attached.
    Config { message: String },

    /// A bus message failed to decrypt or parse. Never propagates past the
    /// subscriber loop; kept here so callers of lower-level decode helpers
    /// can still observe it.
    Decode { message: String },

    /// The KV/cluster adapter is unavailable; the caller should have
    /// degraded to local-only mode rather than observing this, but it is
    /// surfaced for diagnostics.
    KvUnavailable { message: String },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Transient {
                status, message, ..
            } => match status {
                Some(s) => write!(f, "transient upstream error ({s}): {message}"),
                None => write!(f, "transient upstream error: {message}"),
            },
            DispatchError::Permanent { status, message, .. } => {
                write!(f, "permanent upstream error ({status}): {message}")
            }
            DispatchError::Cancelled => write!(f, "request cancelled"),
            DispatchError::ScheduleExpired { id } => {
                write!(f, "limiter schedule expired for job {id}")
            }
            DispatchError::Config { message } => write!(f, "configuration error: {message}"),
            DispatchError::Decode { message } => write!(f, "decode error: {message}"),
            DispatchError::KvUnavailable { message } => write!(f, "kv store unavailable: {message}"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<gateway_limiter::LimiterError> for DispatchError {
    fn from(err: gateway_limiter::LimiterError) -> Self {
        match err {
            gateway_limiter::LimiterError::ScheduleExpired { id } => DispatchError::ScheduleExpired { id },
            gateway_limiter::LimiterError::Cancelled { .. } => DispatchError::Cancelled,
            gateway_limiter::LimiterError::Internal { message } => DispatchError::KvUnavailable { message },
        }
    }
}

impl DispatchError {
    /// True for the error kinds the retry loop should retry (spec §4.4.3,
    /// §7.4 — a limiter expiration counts as transient for retry purposes).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            DispatchError::Transient { .. } | DispatchError::ScheduleExpired { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DispatchError::Cancelled)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DispatchError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_schedule_expired_are_retriable() {
        assert!(DispatchError::Transient {
            status: Some(503),
            retry_after: None,
            message: "boom".into()
        }
        .is_retriable());
        assert!(DispatchError::ScheduleExpired { id: "x".into() }.is_retriable());
        assert!(!DispatchError::Permanent {
            status: 400,
            message: "bad".into(),
            body: None,
        }
        .is_retriable());
        assert!(!DispatchError::Cancelled.is_retriable());
    }

    #[test]
    fn retry_after_only_on_transient() {
        let err = DispatchError::Transient {
            status: Some(429),
            retry_after: Some(Duration::from_secs(2)),
            message: "rate limited".into(),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(DispatchError::Cancelled.retry_after(), None);
    }
}
