//! Amazon Redshift.
//!
//! Redshift speaks the PostgreSQL wire protocol, so sessions are
//! [`PostgresBackend`](crate::drivers::postgres::PostgresBackend)s; only the
//! dialect differs.

mod dialect;

pub use dialect::RedshiftDialect;
