use std::fmt;

use serde::{Deserialize, Serialize};

/// Main error type for orbitpay-core
#[derive(Debug)]
pub enum Error {
    /// The (provider, product_id) pair has no registered descriptor
    UnknownProduct(String),

    /// Attempted to insert an aggregate that already exists
    DuplicateAggregate(String),

    /// Optimistic-concurrency write lost the race after exhausting retries
    Conflict(String),

    /// A transition was attempted against an aggregate already in a terminal state
    ConflictingTerminalTransition(String),

    /// A provider callback could not be applied to the aggregate it names
    CallbackRejected(String),

    /// A provider callback or adapter response carried an event this crate does not model
    UnrecognizedEvent(String),

    /// The provider adapter returned an error or an unexpected response shape
    ProviderFailure(String),

    /// A caller-supplied cancellation signal fired before the operation
    /// finished; in-flight writes already committed, further provider calls
    /// were skipped
    Canceled(String),

    /// No record matches the given identifier
    NotFound(String),

    /// Request validation failed
    Validation(String),

    /// Configuration errors
    Config(String),

    /// The adapter does not advertise support for the requested operation
    UnsupportedOperation(String),

    /// Serialization errors
    Serialization(serde_json::Error),

    /// Generic errors with description
    Other(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownProduct(msg) => write!(f, "Unknown product: {}", msg),
            Error::DuplicateAggregate(msg) => write!(f, "Duplicate aggregate: {}", msg),
            Error::Conflict(msg) => write!(f, "Conflict: {}", msg),
            Error::ConflictingTerminalTransition(msg) => {
                write!(f, "Conflicting terminal transition: {}", msg)
            }
            Error::CallbackRejected(msg) => write!(f, "Callback rejected: {}", msg),
            Error::UnrecognizedEvent(msg) => write!(f, "Unrecognized event: {}", msg),
            Error::ProviderFailure(msg) => write!(f, "Provider failure: {}", msg),
            Error::Canceled(msg) => write!(f, "Canceled: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Validation(msg) => write!(f, "Validation error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::UnsupportedOperation(msg) => write!(f, "Unsupported operation: {}", msg),
            Error::Serialization(e) => write!(f, "Serialization error: {}", e),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization(error)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Config(error.to_string())
    }
}

impl From<TransitionError> for Error {
    fn from(error: TransitionError) -> Self {
        match error {
            TransitionError::TerminalState(msg) => Error::ConflictingTerminalTransition(msg),
            TransitionError::CallbackRejected(msg) => Error::CallbackRejected(msg),
            TransitionError::UnrecognizedEvent(msg) => Error::UnrecognizedEvent(msg),
            TransitionError::UnsupportedOperation(msg) => Error::UnsupportedOperation(msg),
        }
    }
}

impl Error {
    pub fn unknown_product<T: Into<String>>(msg: T) -> Self {
        Error::UnknownProduct(msg.into())
    }

    pub fn conflict<T: Into<String>>(msg: T) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Error::Validation(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    pub fn unsupported_operation<T: Into<String>>(msg: T) -> Self {
        Error::UnsupportedOperation(msg.into())
    }

    pub fn canceled<T: Into<String>>(msg: T) -> Self {
        Error::Canceled(msg.into())
    }

    /// HTTP-adjacent status code for a caller that wants to map this onto a wire response
    pub fn status_code(&self) -> u16 {
        match self {
            Error::UnknownProduct(_) => 404,
            Error::DuplicateAggregate(_) => 409,
            Error::Conflict(_) => 409,
            Error::ConflictingTerminalTransition(_) => 409,
            Error::CallbackRejected(_) => 422,
            Error::UnrecognizedEvent(_) => 422,
            Error::ProviderFailure(_) => 502,
            Error::Canceled(_) => 410,
            Error::NotFound(_) => 404,
            Error::Validation(_) => 400,
            Error::Config(_) => 500,
            Error::UnsupportedOperation(_) => 501,
            Error::Serialization(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Error category for logging/monitoring dimensions
    pub fn category(&self) -> &'static str {
        match self {
            Error::UnknownProduct(_) => "unknown_product",
            Error::DuplicateAggregate(_) => "duplicate_aggregate",
            Error::Conflict(_) => "conflict",
            Error::ConflictingTerminalTransition(_) => "conflicting_terminal_transition",
            Error::CallbackRejected(_) => "callback_rejected",
            Error::UnrecognizedEvent(_) => "unrecognized_event",
            Error::ProviderFailure(_) => "provider_failure",
            Error::Canceled(_) => "canceled",
            Error::NotFound(_) => "not_found",
            Error::Validation(_) => "validation",
            Error::Config(_) => "config",
            Error::UnsupportedOperation(_) => "unsupported_operation",
            Error::Serialization(_) => "serialization",
            Error::Other(_) => "other",
        }
    }
}

/// Narrow, state-machine-local error used by the transaction/subscription transition
/// functions before being folded into [`Error`] at the service boundary.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum TransitionError {
    #[error("aggregate already in a terminal state: {0}")]
    TerminalState(String),

    #[error("callback rejected: {0}")]
    CallbackRejected(String),

    #[error("unrecognized event: {0}")]
    UnrecognizedEvent(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
}

/// One failed item from a reconciliation batch, collected by an [`crate::error_sink::ErrorSink`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemError {
    pub aggregate_id: String,
    pub message: String,
}

impl BatchItemError {
    pub fn new(aggregate_id: impl Into<String>, error: &Error) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            message: error.to_string(),
        }
    }
}
