//! Error types for Polystore
//!
//! Three kinds of failure reach callers: invalid arguments detected before any
//! backend call, capability gaps of a particular backend, and faults reported
//! by the backend itself. Backend faults carry the backend's native message.

use thiserror::Error;

/// Result type alias using Polystore's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Polystore
#[derive(Error, Debug)]
pub enum Error {
    /// Missing mandatory option, conflicting query modes, unsupported filter
    /// shape, missing collection or unknown connection scheme.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not supported by this backend.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO Errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Faults raised by a backend or its transport
#[derive(Error, Debug)]
pub enum BackendError {
    /// Non-success HTTP status returned by a REST backend
    #[error("{service} returned HTTP {status}{}: {message}", code_suffix(.code))]
    Http {
        service: &'static str,
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Connection, TLS or timeout failure before a response was received
    #[error("{service} transport failure: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },

    /// A command was rejected by the server (e.g. MongoDB `ok: 0`)
    #[error("{service} command failed [{code}]: {message}")]
    Command {
        service: &'static str,
        code: i32,
        message: String,
    },

    /// The response could not be understood
    #[error("{service} protocol error: {message}")]
    Protocol {
        service: &'static str,
        message: String,
    },

    /// A batch write left items unprocessed
    #[error("{service} left {unprocessed} batch item(s) unprocessed")]
    Incomplete {
        service: &'static str,
        unprocessed: usize,
    },
}

impl Error {
    /// Shorthand for [`Error::InvalidArgument`]
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Shorthand for [`Error::NotImplemented`]
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Error::NotImplemented(message.into())
    }

    /// True for failures raised before any backend call was attempted
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }

    #[must_use]
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Error::NotImplemented(_))
    }
}

impl BackendError {
    pub fn protocol(service: &'static str, message: impl Into<String>) -> Self {
        BackendError::Protocol {
            service,
            message: message.into(),
        }
    }

    pub fn transport(service: &'static str, message: impl Into<String>) -> Self {
        BackendError::Transport {
            service,
            message: message.into(),
        }
    }

    /// HTTP status of the failure, if the backend answered at all
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default()
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
