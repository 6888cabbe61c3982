//! Error types and result aliases shared across Silo components.

/// The result type used throughout silo-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in foundation operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input was provided (bad env var, malformed option).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),
}
