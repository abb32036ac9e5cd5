//! Backend drivers.
//!
//! - [`postgres`]: PostgreSQL and Redshift sessions over `tokio-postgres`
//! - [`redshift`]: Redshift dialect (staged merge)
//! - `db2`: IBM DB2 over ODBC (feature `db2`)
//! - [`common`]: TLS setup shared by wire-protocol drivers

pub mod common;
#[cfg(feature = "db2")]
pub mod db2;
pub mod postgres;
pub mod redshift;
