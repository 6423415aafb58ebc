use thiserror::Error;

/// Error taxonomy for the limiter (spec §4.2/§7).
#[derive(Debug, Error, Clone)]
pub enum LimiterError {
    /// The job could not be dispatched before its `expiration` elapsed.
    #[error("schedule expired for job {id}")]
    ScheduleExpired { id: String },

    /// The caller's job was cancelled before or during scheduling; never
    /// retried by the limiter itself.
    #[error("job {id} cancelled")]
    Cancelled { id: String },

    /// An internal limiter failure (e.g. the cluster KV store rejected the
    /// accounting call). The limiter disconnects and recreates itself with
    /// the same options; this variant is what the recreated limiter's
    /// first caller observes if recreation itself fails.
    #[error("limiter error: {message}")]
    Internal { message: String },
}
