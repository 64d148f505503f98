//! Persistence layer: processed-message records, run window, and history.

mod libsql_backend;
mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{MessageStore, RunStore};
