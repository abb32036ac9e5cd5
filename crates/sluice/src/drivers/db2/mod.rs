//! IBM DB2 over ODBC.
//!
//! Requires the IBM Data Server ODBC driver at runtime. Unlike the
//! PostgreSQL-protocol backends this one runs with autocommit off, so
//! [`Backend::commit`](crate::core::Backend::commit) is a real commit.

mod backend;
mod dialect;

pub use backend::Db2Backend;
pub use dialect::Db2Dialect;
