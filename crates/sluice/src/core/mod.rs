//! Core abstractions shared by sources, loaders and drivers.
//!
//! - [`value`]: SQL cell values and NULL type hints
//! - [`table`]: in-memory chunks, JSON decoding and chunk streams
//! - [`traits`]: the [`Backend`] session and [`Dialect`] syntax traits
//! - [`merge`]: generic merge/insert statement builders
//! - [`registry`]: backend kind tags and the constructor registry
//!
//! Driver modules (`drivers/postgres`, `drivers/redshift`, `drivers/db2`)
//! implement these traits; nothing in here speaks a wire protocol.

pub mod merge;
pub mod registry;
pub mod table;
pub mod traits;
pub mod value;

pub use merge::{MergePlan, MergeRequest};
pub use registry::{BackendKind, BackendRegistry};
pub use table::{ChunkObserver, ChunkStream, DecodeOptions, JsonOrient, Table};
pub use traits::{Backend, ColumnInfo, Dialect};
pub use value::{SqlNullType, SqlValue};
