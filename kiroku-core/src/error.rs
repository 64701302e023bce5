//! # Error Handling
//!
//! Error types for Kiroku operations.
//!
//! ## Design Principles
//!
//! 1. **Contextual**: Errors include relevant context (paths, messages)
//! 2. **Traceable**: Underlying causes are kept as sources where available
//! 3. **Classified**: Callers can match on the failure class (bad input,
//!    shard open, I/O, engine, codec, cancellation)

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for Kiroku operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for Kiroku
#[derive(Error, Debug)]
pub enum Error {
    #[error("bad request: {message}")]
    BadRequest { message: String },

    #[error("cannot open index shard at {path}: {message}")]
    OpenFailed { path: PathBuf, message: String },

    #[error("io error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine error: {message}")]
    Engine {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("codec error: {message}")]
    Codec { message: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest {
            message: message.into(),
        }
    }

    pub fn codec(message: impl Into<String>) -> Self {
        Error::Codec {
            message: message.into(),
        }
    }

    /// Engine failure with the underlying cause attached.
    pub fn engine(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Engine {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source,
        }
    }

    /// Check if the error was caused by invalid caller input.
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Error::BadRequest { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_bad_request() {
        let err = Error::bad_request("rotation size too small");
        assert!(err.is_bad_request());
        assert!(!Error::Cancelled.is_bad_request());
    }

    #[test]
    fn io_errors_keep_their_source() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = Error::io("listing shards", inner);
        assert!(std::error::Error::source(&err).is_some());
    }
}
