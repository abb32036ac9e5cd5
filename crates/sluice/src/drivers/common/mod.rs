//! Utilities shared across drivers.

pub mod tls;

pub use tls::{SslMode, TlsBuilder};
