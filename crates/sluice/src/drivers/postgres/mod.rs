//! PostgreSQL driver.
//!
//! - [`PostgresBackend`]: pooled session, also used for Redshift
//! - [`PostgresDialect`]: `INSERT ... ON CONFLICT` merges

mod backend;
mod dialect;

pub use backend::PostgresBackend;
pub use dialect::PostgresDialect;
