//! Core of a link-shortening service: a from-scratch PostgreSQL wire client
//! plus the storage service built on it.
//!
//! The `pg` module speaks the v3 frontend/backend protocol directly over
//! TCP. [`DbSource`] owns a lazily-established connection, and
//! [`LinkService`] templates and runs the SQL for the `links` and `stats`
//! tables, shaping raw query contexts into name-keyed rows.

pub mod error;
pub mod pg;
pub mod service;
pub mod source;

pub use error::{Error, Result};
pub use service::{DbResponse, LinkLookup, LinkService};
pub use source::{DbConfig, DbSource};
