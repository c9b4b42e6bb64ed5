//! Errors shared by everything that reads or writes the site dataset

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file, root folder or API key problem
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Canonical record {0} not found")]
    SiteNotFound(Uuid),

    #[error("Discovery {0} not found")]
    DiscoveryNotFound(Uuid),

    /// Name with nothing left after normalization; cannot be matched or filed
    #[error("Unusable name '{0}'")]
    UnusableName(String),

    /// Status change a Discovery refuses (leaving `promoted`, re-linking)
    #[error("Refused transition: {0}")]
    RefusedTransition(String),

    /// Column value that does not parse back (status, UUID, JSON)
    #[error("Corrupt stored value: {0}")]
    CorruptValue(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stored data contradicting itself rather than the store failing
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Error::SiteNotFound(_) | Error::DiscoveryNotFound(_) | Error::RefusedTransition(_)
        )
    }
}
