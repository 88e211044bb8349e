//! From-scratch PostgreSQL v3 wire protocol client.
//!
//! No external database driver: the TCP handshake, authentication
//! negotiation (trust, cleartext, MD5-salted), simple and extended query
//! sub-protocols, message framing and text-format type conversion all live
//! here.
//!
//! Architecture:
//! - `protocol`: wire framing and message encoding/decoding
//! - `types`: OID-keyed decoding and variant-keyed encoding of values
//! - `auth`: authentication-request negotiation
//! - `context`: per-statement result accumulator
//! - `connection`: connection lifecycle and query orchestration

pub mod auth;
pub mod connection;
pub mod context;
pub mod error;
pub mod protocol;
pub mod types;


pub use connection::{Config, Connection, DEFAULT_IO_TIMEOUT};
pub use context::QueryContext;
pub use error::{PgError, PgResult, ServerError};
pub use protocol::{FieldDescription, TransactionStatus};
pub use types::{Oid, Value};
