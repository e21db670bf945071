//! Error handling for the simulation engine
//!
//! Every engine component returns `SimResult<T>`. The variants follow the
//! failure taxonomy the engine exposes to its callers: backend/transport
//! failures and critical parse failures are retryable, validation and
//! invariant failures are not.

use thiserror::Error;

/// Main error type for the simulation engine
#[derive(Error, Debug)]
pub enum SimError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Generation backend failed: {operation} - {message}")]
    Backend { operation: String, message: String },

    #[error("Network operation failed: {operation}")]
    Network {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Could not extract structured data for {context} after {attempts} strategies")]
    Parse { context: String, attempts: usize },

    #[error("Invariant violated: {message}")]
    Invariant { message: String },

    #[error("Simulation {id} is already complete")]
    SimulationComplete { id: String },

    #[error("Terminal turn failed: {message}")]
    TerminalFailure { message: String },

    #[error("Storage operation failed: {operation} - {source}")]
    Storage {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Resource not found: {resource} - {id}")]
    NotFound { resource: String, id: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Mutex lock failed: {resource}")]
    MutexPoisoned { resource: String },

    #[error("I/O operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Type alias for Result with SimError
pub type SimResult<T> = Result<T, SimError>;

impl SimError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a backend error (non-success status, empty completion)
    pub fn backend(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network(operation: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            operation: operation.into(),
            source,
        }
    }

    /// Create a parse error once the recovery ladder is exhausted
    pub fn parse(context: impl Into<String>, attempts: usize) -> Self {
        Self::Parse {
            context: context.into(),
            attempts,
        }
    }

    /// Create an invariant violation
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    pub fn simulation_complete(id: impl Into<String>) -> Self {
        Self::SimulationComplete { id: id.into() }
    }

    /// Wrap a failure that happened while concluding a run
    pub fn terminal(message: impl Into<String>) -> Self {
        Self::TerminalFailure {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a serialization error
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the caller may re-submit the same turn unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SimError::Backend { .. } | SimError::Network { .. } | SimError::Parse { .. }
        )
    }
}

/// Helper trait for safe mutex operations
///
/// Returns a `SimError` on a poisoned lock instead of panicking.
pub trait SafeLock<T: ?Sized> {
    fn safe_lock(&self) -> SimResult<std::sync::MutexGuard<'_, T>>;
}

impl<T: ?Sized> SafeLock<T> for std::sync::Mutex<T> {
    fn safe_lock(&self) -> SimResult<std::sync::MutexGuard<'_, T>> {
        self.lock().map_err(|_| SimError::MutexPoisoned {
            resource: "generic_mutex".to_string(),
        })
    }
}

/// Convert from sled errors
impl From<sled::Error> for SimError {
    fn from(err: sled::Error) -> Self {
        SimError::storage("sled_operation", err)
    }
}

/// Convert from serde_json errors
impl From<serde_json::Error> for SimError {
    fn from(err: serde_json::Error) -> Self {
        SimError::serialization("json_operation", err)
    }
}

/// Convert from std::io errors
impl From<std::io::Error> for SimError {
    fn from(err: std::io::Error) -> Self {
        SimError::io("io_operation", err)
    }
}

/// Convert from reqwest errors
impl From<reqwest::Error> for SimError {
    fn from(err: reqwest::Error) -> Self {
        SimError::network("http_request", err)
    }
}

impl From<figment::Error> for SimError {
    fn from(err: figment::Error) -> Self {
        SimError::config(err.to_string())
    }
}
