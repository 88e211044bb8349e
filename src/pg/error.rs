//! Error types for the PostgreSQL protocol implementation.

use std::collections::HashMap;
use std::io;

use thiserror::Error;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// An error reported by the server through an `ErrorResponse` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub severity: String,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl ServerError {
    /// Build from the byte-keyed field map of an `ErrorResponse` payload.
    pub fn from_fields(fields: &HashMap<u8, String>) -> Self {
        Self {
            severity: fields.get(&b'S').cloned().unwrap_or_default(),
            code: fields.get(&b'C').cloned().unwrap_or_default(),
            message: fields.get(&b'M').cloned().unwrap_or_default(),
            detail: fields.get(&b'D').cloned(),
            hint: fields.get(&b'H').cloned(),
        }
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.severity, self.message, self.code)?;
        if let Some(d) = &self.detail {
            write!(f, "\nDetail: {}", d)?;
        }
        if let Some(h) = &self.hint {
            write!(f, "\nHint: {}", h)?;
        }
        Ok(())
    }
}

/// Errors that can occur during PostgreSQL operations.
#[derive(Debug, Error)]
pub enum PgError {
    /// I/O error during communication. The connection is unusable afterwards.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read or write exceeded the configured bound. Treated as a transport
    /// error: the byte stream position is no longer trustworthy.
    #[error("operation timed out")]
    Timeout,

    /// Unexpected message tag or malformed payload. Fatal: the stream is
    /// desynchronized and every subsequent read would be unreliable.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authentication failed before or during the password exchange.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Server returned an error response.
    #[error("server error: {0}")]
    Server(ServerError),

    /// Type conversion error between wire text and a native value.
    #[error("type conversion error: {0}")]
    Type(String),

    /// Connection is closed or was never established.
    #[error("connection is closed")]
    ConnectionClosed,

    /// A command completed while the server reported a failed transaction
    /// block and the statement was not a ROLLBACK. Earlier statements in the
    /// block must be treated as not durably applied.
    #[error("command completed inside a failed transaction block: {stmt}")]
    TransactionIntegrity { stmt: String },
}
