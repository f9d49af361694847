//! Unified error handling for the tabtrigger crate
//!
//! Domain modules define their own error enums; this module wraps them into a
//! single [`Error`] so they can cross module boundaries, and classifies them
//! with an [`ErrorCategory`] that drives the degrade-or-report policy:
//!
//! - validation failures are reported to the requesting client
//! - storage and delivery failures are logged and degrade gracefully
//! - only startup failures (e.g., the port is already bound) are fatal

use thiserror::Error;

pub use crate::coordinator::protocol::ProtocolError;
pub use crate::coordinator::registry::RegistryError;
pub use crate::coordinator::server::ServerError;
pub use crate::scheduler::error::{SchedulerError, SchedulerResult};
pub use crate::storage::StoreError;

/// Common interface implemented by the crate's error types
pub trait TriggerErrorTrait: std::error::Error {
    /// Whether the operation may succeed if retried
    fn is_recoverable(&self) -> bool;

    /// The error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed schedule requests
    Validation,
    /// File I/O and corrupted content
    Storage,
    /// Undecodable or unexpected inbound messages
    Protocol,
    /// Session lookup and classification
    Session,
    /// Configuration loading and validation
    Config,
    /// Listener and serving failures
    Server,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Storage => "storage",
            Self::Protocol => "protocol",
            Self::Session => "session",
            Self::Config => "config",
            Self::Server => "server",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the tabtrigger crate
#[derive(Error, Debug)]
pub enum Error {
    /// Rejected schedule request
    #[error("Validation error: {0}")]
    Validation(#[from] SchedulerError),

    /// Booking store failure
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Inbound message could not be interpreted
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Session registry failure
    #[error("Session error: {0}")]
    Session(#[from] RegistryError),

    /// Server lifecycle failure
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl TriggerErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Storage(e) => e.is_recoverable(),
            Self::Protocol(_) => true, // the connection stays open
            Self::Session(_) => true,
            Self::Server(e) => !matches!(e, ServerError::Bind(_) | ServerError::Config(_)),
            Self::Other(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Storage(_) => ErrorCategory::Storage,
            Self::Protocol(_) => ErrorCategory::Protocol,
            Self::Session(_) => ErrorCategory::Session,
            Self::Server(ServerError::Config(_)) => ErrorCategory::Config,
            Self::Server(_) => ErrorCategory::Server,
            Self::Other(_) => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other(context.into())
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
