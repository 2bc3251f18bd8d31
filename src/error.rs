//! Error handling for the BulkIO runtime
//!
//! This module defines the crate-wide error type and a Result alias.
//! Only precondition violations and port bookkeeping failures surface as
//! errors. Transport failures are absorbed per connection by the output
//! port, queue exhaustion is reported as a flag on the next packet, and
//! end-of-stream is a [`ReadResult`](crate::datablock::ReadResult) variant.

use crate::output::transport::TransportError;
use thiserror::Error;

/// Main error type for BulkIO operations
#[derive(Error, Debug)]
pub enum BulkioError {
    /// A caller violated an API precondition (programmer error)
    #[error("Usage error: {0}")]
    Usage(String),

    /// A connection with the same ID already exists on the port
    #[error("Connection '{0}' is already in use")]
    OccupiedPort(String),

    /// The named connection does not exist on the port
    #[error("No connection '{0}'")]
    InvalidPort(String),

    /// The named stream is not active on the port
    #[error("Unknown stream '{0}'")]
    UnknownStream(String),

    /// Errors surfaced from a transport outside of the fan-out path
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<BulkioError>,
    },
}

impl BulkioError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        BulkioError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Shorthand for a usage error
    pub fn usage(message: impl Into<String>) -> Self {
        BulkioError::Usage(message.into())
    }

    /// Whether this error (or the error it wraps) is a usage error
    pub fn is_usage(&self) -> bool {
        match self {
            BulkioError::Usage(_) => true,
            BulkioError::WithContext { source, .. } => source.is_usage(),
            _ => false,
        }
    }
}

/// Result type alias for BulkIO operations
pub type Result<T> = std::result::Result<T, BulkioError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, TransportError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| BulkioError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| BulkioError::from(e).with_context(f()))
    }
}
