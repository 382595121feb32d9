//! Entry model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{
    new_record_id, ConflictField, EntityKind, EntryField, EntryType, SyncMeta, Syncable,
};
use crate::wire::{format_timestamp, parse_timestamp};
use crate::util::truncate_millis;
use crate::{Error, Result};

/// A single income or expense line in a book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Unique identifier
    pub id: String,
    /// Owning book
    pub book_id: String,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub entry_type: EntryType,
    /// Amount in minor currency units (cents)
    pub amount: i64,
    #[serde(default)]
    pub note: Option<String>,
    /// When the money moved
    #[serde(with = "crate::wire::timestamp")]
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub meta: SyncMeta,
}

impl Entry {
    /// Create a new entry authored by `device`
    #[must_use]
    pub fn new(
        book_id: impl Into<String>,
        entry_type: EntryType,
        amount: i64,
        occurred_at: DateTime<Utc>,
        device: &str,
    ) -> Self {
        Self {
            id: new_record_id(),
            book_id: book_id.into(),
            category_id: None,
            entry_type,
            amount,
            note: None,
            occurred_at: truncate_millis(occurred_at),
            meta: SyncMeta::new(device),
        }
    }

    #[must_use]
    pub fn with_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Signed amount: income positive, expense negative
    #[must_use]
    pub const fn signed_amount(&self) -> i64 {
        match self.entry_type {
            EntryType::Income => self.amount,
            EntryType::Expense => -self.amount,
        }
    }
}

const FIELDS: [ConflictField; 6] = [
    ConflictField::Entry(EntryField::BookId),
    ConflictField::Entry(EntryField::CategoryId),
    ConflictField::Entry(EntryField::EntryType),
    ConflictField::Entry(EntryField::Amount),
    ConflictField::Entry(EntryField::Note),
    ConflictField::Entry(EntryField::OccurredAt),
];

impl Syncable for Entry {
    const KIND: EntityKind = EntityKind::Entry;

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
        let ConflictField::Entry(field) = field else {
            return Err(Error::InvalidInput(format!("{field} is not an entry field")));
        };
        let value = match field {
            EntryField::BookId => Value::from(self.book_id.clone()),
            EntryField::CategoryId => serde_json::to_value(&self.category_id)?,
            EntryField::EntryType => serde_json::to_value(self.entry_type)?,
            EntryField::Amount => Value::from(self.amount),
            EntryField::Note => serde_json::to_value(&self.note)?,
            EntryField::OccurredAt => Value::from(format_timestamp(&self.occurred_at)),
        };
        Ok(value)
    }

    fn set_field_value(&mut self, field: ConflictField, value: Value) -> Result<()> {
        let ConflictField::Entry(field) = field else {
            return Err(Error::InvalidInput(format!("{field} is not an entry field")));
        };
        match field {
            EntryField::BookId => self.book_id = serde_json::from_value(value)?,
            EntryField::CategoryId => self.category_id = serde_json::from_value(value)?,
            EntryField::EntryType => self.entry_type = serde_json::from_value(value)?,
            EntryField::Amount => self.amount = serde_json::from_value(value)?,
            EntryField::Note => self.note = serde_json::from_value(value)?,
            EntryField::OccurredAt => self.occurred_at = parse_timestamp(&value)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::now_millis;
    use serde_json::json;

    #[test]
    fn signed_amount_follows_entry_type() {
        let now = now_millis();
        let income = Entry::new("b1", EntryType::Income, 1500, now, "device-a");
        let expense = Entry::new("b1", EntryType::Expense, 1500, now, "device-a");
        assert_eq!(income.signed_amount(), 1500);
        assert_eq!(expense.signed_amount(), -1500);
    }

    #[test]
    fn field_values_cover_optional_fields() {
        let mut entry = Entry::new("b1", EntryType::Expense, 990, now_millis(), "device-a")
            .with_note("coffee");
        let note = ConflictField::Entry(EntryField::Note);
        assert_eq!(entry.field_value(note).unwrap(), json!("coffee"));

        entry.set_field_value(note, Value::Null).unwrap();
        assert_eq!(entry.note, None);
        assert_eq!(entry.field_value(note).unwrap(), Value::Null);
    }

    #[test]
    fn occurred_at_accepts_wire_timestamps() {
        let mut entry = Entry::new("b1", EntryType::Expense, 990, now_millis(), "device-a");
        let field = ConflictField::Entry(EntryField::OccurredAt);
        entry
            .set_field_value(field, json!("2024-05-01T08:30:00.000Z"))
            .unwrap();
        assert_eq!(
            entry.field_value(field).unwrap(),
            json!("2024-05-01T08:30:00.000Z")
        );
    }

    #[test]
    fn rejects_fields_of_other_kinds() {
        let entry = Entry::new("b1", EntryType::Expense, 990, now_millis(), "device-a");
        let field = ConflictField::Book(crate::models::BookField::Name);
        assert!(entry.field_value(field).is_err());
    }
}
