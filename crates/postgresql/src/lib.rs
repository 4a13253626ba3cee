//! Shared PostgreSQL utilities for snapshot-sync
//!
//! The snapshot store, the audit log and the table-backed queue all talk to
//! the same database. This crate owns the connection handling and the
//! validation of the table names that get spliced into their SQL.

mod client;
mod ident;

pub use client::{new_postgresql_client, PostgresConnection};
pub use ident::{IdentifierError, TableName};
