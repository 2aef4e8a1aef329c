//! PostgreSQL driver for hop.
//!
//! Every interaction with the target database is a short-lived `psql` or
//! `pg_dump` subprocess; connection parameters travel as `PG*` environment
//! variables and never appear on command lines.

pub mod driver;
pub mod error;

pub use driver::{DbParams, PgDriver};
pub use error::{DbError, Result};
