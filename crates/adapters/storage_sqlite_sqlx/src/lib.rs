//! # hearth-adapter-storage-sqlite-sqlx
//!
//! `SQLite` persistence adapter using [sqlx](https://docs.rs/sqlx).
//!
//! ## Responsibilities
//! - Implement the [`KeyValueStore`](hearth_app::ports::KeyValueStore) port
//! - Manage `SQLite` connection pool lifecycle
//! - Run database migrations (using sqlx embedded migrations)
//!
//! ## Dependency rule
//! Depends on `hearth-app` (for port traits) and `hearth-domain` (for the
//! error type). The `app` and `domain` crates must never reference this
//! adapter.

mod error;
mod kv_store;
mod pool;

pub use error::StorageError;
pub use kv_store::SqliteKeyValueStore;
pub use pool::{Config, Database};
