//! Crate-level error type for the service layer.

use thiserror::Error;

use crate::pg::{PgError, ServerError};

#[derive(Debug, Error)]
pub enum Error {
    /// Transport, protocol, authentication or conversion failure in the
    /// database client.
    #[error("database error: {0}")]
    Db(#[from] PgError),

    /// The server rejected a statement with an error response.
    #[error("query failed: {0}")]
    Query(ServerError),
}

pub type Result<T> = std::result::Result<T, Error>;
