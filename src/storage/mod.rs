//! Storage traits and backends for stockroll.
//!
//! The traits define the I/O boundaries of a run; the in-memory backend is
//! the reference implementation.

mod memory;
mod traits;

pub use memory::{InMemoryInventorySource, InMemoryRecordSink};
pub use traits::{InventorySource, RecordSink, StorageError};
