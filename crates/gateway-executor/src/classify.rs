//! Error classification (spec §4.4.3): a pure function from an observed
//! attempt outcome to the retry decision it implies.

/// What happened to one attempt, as far as retry logic is concerned.
#[derive(Debug, Clone, Copy)]
pub enum AttemptFailure {
    Status(u16),
    TransportReset,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Surfaced to the caller immediately; never retried.
    Permanent,
    /// Retried with backoff (and, on multi-endpoint models, reselection).
    Transient,
    /// Silently dropped if a sibling succeeded, otherwise propagated as-is;
    /// never counted as a retry attempt.
    Cancelled,
}

/// Classifies `failure` per spec §4.4.3's status table. `ECONNRESET`-style
/// transport resets are classified the same as a 502.
pub fn classify(failure: AttemptFailure) -> ErrorClass {
    match failure {
        AttemptFailure::Cancelled => ErrorClass::Cancelled,
        AttemptFailure::TransportReset => ErrorClass::Transient,
        AttemptFailure::Status(400) | AttemptFailure::Status(413) => ErrorClass::Permanent,
        AttemptFailure::Status(s) if matches!(s, 408 | 429 | 500 | 502 | 503 | 504) => ErrorClass::Transient,
        AttemptFailure::Status(_) => ErrorClass::Permanent,
    }
}

pub fn is_rate_limited(failure: AttemptFailure) -> bool {
    matches!(failure, AttemptFailure::Status(429))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_statuses_are_transient() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert_eq!(classify(AttemptFailure::Status(status)), ErrorClass::Transient, "status {status}");
        }
        assert_eq!(classify(AttemptFailure::TransportReset), ErrorClass::Transient);
    }

    #[test]
    fn bad_request_and_payload_too_large_are_permanent() {
        assert_eq!(classify(AttemptFailure::Status(400)), ErrorClass::Permanent);
        assert_eq!(classify(AttemptFailure::Status(413)), ErrorClass::Permanent);
    }

    #[test]
    fn other_4xx_are_permanent() {
        assert_eq!(classify(AttemptFailure::Status(401)), ErrorClass::Permanent);
        assert_eq!(classify(AttemptFailure::Status(404)), ErrorClass::Permanent);
        assert_eq!(classify(AttemptFailure::Status(422)), ErrorClass::Permanent);
    }

    #[test]
    fn cancellation_is_its_own_class() {
        assert_eq!(classify(AttemptFailure::Cancelled), ErrorClass::Cancelled);
    }

    #[test]
    fn only_429_is_rate_limited() {
        assert!(is_rate_limited(AttemptFailure::Status(429)));
        assert!(!is_rate_limited(AttemptFailure::Status(500)));
    }
}
