//! Persistence layer: libSQL-backed history of re-published posts.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{HistoryRecord, HistoryStore};
