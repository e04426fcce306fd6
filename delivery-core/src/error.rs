//! Error types for the domain layer

use thiserror::Error;
use uuid::Uuid;

/// Result type for domain operations
pub type Result<T> = std::result::Result<T, Error>;

/// Domain errors
#[derive(Debug, Error)]
pub enum Error {
    /// Rate source unreachable, timed out, or returned an unreadable body
    #[error("Rate fetch error: {0}")]
    RateFetch(#[from] reqwest::Error),

    /// Rate source answered with a non-success status
    #[error("Rate source returned status {0}")]
    RateStatus(u16),

    /// Rate document is missing the USD rate field
    #[error("Rate document has no USD entry")]
    RateSchema,

    /// Transient storage write failure
    #[error("Storage write error: {0}")]
    Storage(String),

    /// No package row matches the event id
    #[error("Package {0} not found")]
    PackageNotFound(Uuid),
}
