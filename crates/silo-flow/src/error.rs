//! Error types for the orchestration domain.

/// The result type used throughout silo-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in orchestration operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A metadata-store operation failed.
    ///
    /// Store failures inside the router main loop are treated as fatal
    /// (schema or connectivity breakage that in-process handling cannot
    /// repair); elsewhere they surface as per-request failures.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// No warehouse driver is registered for a destination type.
    #[error("unsupported destination type: {dest_type}")]
    UnsupportedDestination {
        /// The destination type that had no registered driver.
        dest_type: String,
    },

    /// A destination's configuration cannot be turned into a binding.
    #[error("invalid destination config: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// A worker queue rejected a batch because it is at capacity.
    #[error("worker queue full: {identity}")]
    QueueFull {
        /// The worker identity whose queue was full.
        identity: String,
    },

    /// A worker identity has no running worker task.
    #[error("no worker registered for identity: {identity}")]
    UnknownWorker {
        /// The worker identity that was looked up.
        identity: String,
    },

    /// A warehouse driver failed while executing an upload or recovery.
    #[error("driver error: {message}")]
    Driver {
        /// Description of the driver failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new driver error.
    #[must_use]
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
            source: None,
        }
    }

    /// True when the error points at metadata-store breakage that the
    /// router main loop cannot recover from in-process.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}
