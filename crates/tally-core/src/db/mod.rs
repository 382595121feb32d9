//! Database layer for Tally

mod connection;
mod migrations;
mod repository;
mod settings_repository;

pub use connection::Database;
pub use repository::{RecordRepository, RecordRow, SqliteRecordRepository};
pub use settings_repository::{SqliteSyncStateRepository, SyncStateRepository};
