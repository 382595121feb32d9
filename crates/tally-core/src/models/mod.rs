//! Data models for Tally

mod book;
mod category;
mod conflict;
mod entry;
mod record;

pub use book::Book;
pub use category::Category;
pub use conflict::{
    BookField, CategoryField, Conflict, ConflictField, ConflictKey, EntryField, Resolution,
};
pub use entry::Entry;
pub use record::{new_record_id, EntityKind, EntryType, SyncMeta, Syncable};
