//! Error types for the broker pipeline

use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Broker or transport unreachable; retried with a reconnect on the next
    /// operation, not per message
    #[error("Connection error: {0}")]
    Connection(String),

    /// Declaration rejected by the broker (argument mismatch with a
    /// pre-existing object); fatal configuration error
    #[error("Topology error: {0}")]
    Topology(String),

    /// Publish could not be handed to the broker
    #[error("Publish error: {0}")]
    Publish(String),

    /// Malformed message body; terminal per message
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Retry budget spent; the queue TTL/dead-letter binding disposes of the
    /// message
    #[error("Retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// Processing attempts observed
        attempts: u32,
    },

    /// Domain failure (rate fetch or storage write-back)
    #[error(transparent)]
    Core(#[from] delivery_core::Error),
}

impl Error {
    /// Terminal errors are acknowledged and dropped instead of retried: a
    /// malformed body never becomes well-formed, and a missing package never
    /// appears.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Decode(_) | Error::Core(delivery_core::Error::PackageNotFound(_))
        )
    }
}
