//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the orchestration core and the outside
//! world. They live here (in `app`) so both the core and the adapters can
//! depend on them without creating circular dependencies.

pub mod kv_store;
pub mod snapshot;

pub use kv_store::{KeyValueStore, Namespace};
pub use snapshot::SnapshotSource;
