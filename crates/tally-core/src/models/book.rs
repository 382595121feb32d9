//! Book model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{new_record_id, BookField, ConflictField, EntityKind, SyncMeta, Syncable};
use crate::{Error, Result};

/// A ledger that groups entries under one currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    /// Unique identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// ISO-4217 currency code
    pub currency: String,
    /// Hidden from the active list but still synchronized
    #[serde(default)]
    pub archived: bool,
    #[serde(default, with = "crate::wire::timestamp_option")]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub meta: SyncMeta,
}

impl Book {
    /// Create a new book authored by `device`
    #[must_use]
    pub fn new(name: impl Into<String>, currency: impl Into<String>, device: &str) -> Self {
        Self {
            id: new_record_id(),
            name: name.into(),
            currency: currency.into().trim().to_ascii_uppercase(),
            archived: false,
            archived_at: None,
            meta: SyncMeta::new(device),
        }
    }

    /// Rename the book as a local mutation
    pub fn rename(&mut self, name: impl Into<String>, device: &str) {
        self.name = name.into();
        self.touch(device);
    }

    /// Archive or unarchive the book as a local mutation
    pub fn set_archived(&mut self, archived: bool, device: &str) {
        if self.archived == archived {
            return;
        }
        self.archived = archived;
        self.touch(device);
        self.archived_at = if archived { self.meta.updated_at } else { None };
    }
}

const FIELDS: [ConflictField; 3] = [
    ConflictField::Book(BookField::Name),
    ConflictField::Book(BookField::Currency),
    ConflictField::Book(BookField::Archived),
];

impl Syncable for Book {
    const KIND: EntityKind = EntityKind::Book;

    fn id(&self) -> &str {
        &self.id
    }

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn conflict_fields() -> &'static [ConflictField] {
        &FIELDS
    }

    fn field_value(&self, field: ConflictField) -> Result<Value> {
        match field {
            ConflictField::Book(BookField::Name) => Ok(Value::from(self.name.clone())),
            ConflictField::Book(BookField::Currency) => Ok(Value::from(self.currency.clone())),
            ConflictField::Book(BookField::Archived) => Ok(Value::from(self.archived)),
            other => Err(Error::InvalidInput(format!("{other} is not a book field"))),
        }
    }

    fn set_field_value(&mut self, field: ConflictField, value: Value) -> Result<()> {
        match field {
            ConflictField::Book(BookField::Name) => self.name = serde_json::from_value(value)?,
            ConflictField::Book(BookField::Currency) => {
                self.currency = serde_json::from_value(value)?;
            }
            ConflictField::Book(BookField::Archived) => {
                self.archived = serde_json::from_value(value)?;
                if !self.archived {
                    self.archived_at = None;
                } else if self.archived_at.is_none() {
                    self.archived_at = self.meta.updated_at;
                }
            }
            other => return Err(Error::InvalidInput(format!("{other} is not a book field"))),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_book_normalizes_currency() {
        let book = Book::new("Trip", " eur ", "device-a");
        assert_eq!(book.currency, "EUR");
        assert_eq!(book.meta.version, 1);
        assert!(!book.is_deleted());
    }

    #[test]
    fn rename_bumps_version() {
        let mut book = Book::new("Trip", "EUR", "device-a");
        book.rename("Holiday", "device-b");
        assert_eq!(book.name, "Holiday");
        assert_eq!(book.meta.version, 2);
        assert_eq!(book.meta.last_modified_by.as_deref(), Some("device-b"));
    }

    #[test]
    fn archiving_sets_and_clears_archived_at() {
        let mut book = Book::new("Trip", "EUR", "device-a");
        book.set_archived(true, "device-a");
        assert!(book.archived_at.is_some());

        book.set_archived(true, "device-a");
        assert_eq!(book.meta.version, 2);

        book.set_archived(false, "device-a");
        assert_eq!(book.archived_at, None);
        assert_eq!(book.meta.version, 3);
    }

    #[test]
    fn field_values_round_trip() {
        let mut book = Book::new("Trip", "EUR", "device-a");
        let field = ConflictField::Book(BookField::Name);
        book.set_field_value(field, json!("Holiday")).unwrap();
        assert_eq!(book.field_value(field).unwrap(), json!("Holiday"));

        let archived = ConflictField::Book(BookField::Archived);
        book.set_field_value(archived, json!(true)).unwrap();
        assert!(book.archived);
        assert!(book.set_field_value(archived, json!("yes")).is_err());
    }

    #[test]
    fn wire_shape_is_camel_case_and_flat() {
        let book = Book::new("Trip", "EUR", "device-a");
        let value = serde_json::to_value(&book).unwrap();
        let object = value.as_object().unwrap();
        assert!(object.contains_key("archivedAt"));
        assert!(object.contains_key("lastSyncedVersion"));
        assert!(object.contains_key("updatedAt"));
        assert!(!object.contains_key("meta"));

        let decoded: Book = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, book);
    }
}
