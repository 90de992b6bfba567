//! # terrapin-db-backends
//!
//! Concrete [`DbClient`](terrapin_db::DbClient) implementations for terrapin.
//! The [`BackendFactory`] maps a configured engine identifier onto a client
//! and plugs into [`ConnectionHandler`](terrapin_db::ConnectionHandler).
//!
//! Available clients:
//! - `SQLite` (feature `sqlite`, enabled by default)

pub mod factory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use factory::BackendFactory;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteClient;
