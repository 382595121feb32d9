//! tally-core - Core library for Tally
//!
//! This crate contains the offline-first sync engine of the Tally finance
//! tracker: the versioned entity model, local and remote store adapters, the
//! three-way merge, conflict tracking, and the orchestrator that drives
//! pull, merge, push cycles under realtime notifications.

pub mod auth;
pub mod config;
pub mod conflicts;
pub mod db;
pub mod error;
pub mod merge;
pub mod models;
pub mod state;
pub mod store;
pub mod sync;
pub mod util;
pub mod wire;

pub use auth::{AuthError, AuthProvider, AuthSession, AuthUser, StaticTokenAuth};
pub use config::SyncSettings;
pub use conflicts::{ConflictTracker, Resolutions};
pub use error::{Error, Result};
pub use merge::{merge_records, MergeError, MergeOutcome, MergeSource, MergedRecord};
pub use models::{
    Book, Category, Conflict, ConflictField, ConflictKey, EntityKind, Entry, EntryType,
    Resolution, SyncMeta, Syncable,
};
pub use state::{SyncEvent, SyncPhase, SyncResult, SyncStatus};
pub use store::{
    CloudDocument, HttpRemoteStore, LocalStore, MemoryLocalStore, MemoryRemoteStore,
    RemoteStore, SqliteLocalStore,
};
pub use sync::SyncEngine;
