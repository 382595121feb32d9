//! Sync conflict model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::EntityKind;
use crate::Error;

/// Conflict-tracked fields of a book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BookField {
    Name,
    Currency,
    Archived,
}

/// Conflict-tracked fields of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryField {
    BookId,
    CategoryId,
    EntryType,
    Amount,
    Note,
    OccurredAt,
}

/// Conflict-tracked fields of a category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CategoryField {
    Name,
    EntryType,
    Color,
    Icon,
}

/// A field that can diverge between replicas, scoped to its entity kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "entityType", content = "field", rename_all = "lowercase")]
pub enum ConflictField {
    Book(BookField),
    Entry(EntryField),
    Category(CategoryField),
}

impl ConflictField {
    #[must_use]
    pub const fn kind(self) -> EntityKind {
        match self {
            Self::Book(_) => EntityKind::Book,
            Self::Entry(_) => EntityKind::Entry,
            Self::Category(_) => EntityKind::Category,
        }
    }

    /// Wire name of the field (camelCase, as in the remote document).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Book(BookField::Name) | Self::Category(CategoryField::Name) => "name",
            Self::Book(BookField::Currency) => "currency",
            Self::Book(BookField::Archived) => "archived",
            Self::Entry(EntryField::BookId) => "bookId",
            Self::Entry(EntryField::CategoryId) => "categoryId",
            Self::Entry(EntryField::EntryType) | Self::Category(CategoryField::EntryType) => {
                "entryType"
            }
            Self::Entry(EntryField::Amount) => "amount",
            Self::Entry(EntryField::Note) => "note",
            Self::Entry(EntryField::OccurredAt) => "occurredAt",
            Self::Category(CategoryField::Color) => "color",
            Self::Category(CategoryField::Icon) => "icon",
        }
    }

    /// Look up a field by entity kind and wire name.
    pub fn parse(kind: EntityKind, name: &str) -> Result<Self, Error> {
        let field = match (kind, name) {
            (EntityKind::Book, "name") => Self::Book(BookField::Name),
            (EntityKind::Book, "currency") => Self::Book(BookField::Currency),
            (EntityKind::Book, "archived") => Self::Book(BookField::Archived),
            (EntityKind::Entry, "bookId") => Self::Entry(EntryField::BookId),
            (EntityKind::Entry, "categoryId") => Self::Entry(EntryField::CategoryId),
            (EntityKind::Entry, "entryType") => Self::Entry(EntryField::EntryType),
            (EntityKind::Entry, "amount") => Self::Entry(EntryField::Amount),
            (EntityKind::Entry, "note") => Self::Entry(EntryField::Note),
            (EntityKind::Entry, "occurredAt") => Self::Entry(EntryField::OccurredAt),
            (EntityKind::Category, "name") => Self::Category(CategoryField::Name),
            (EntityKind::Category, "entryType") => Self::Category(CategoryField::EntryType),
            (EntityKind::Category, "color") => Self::Category(CategoryField::Color),
            (EntityKind::Category, "icon") => Self::Category(CategoryField::Icon),
            _ => {
                return Err(Error::InvalidInput(format!(
                    "unknown {kind} field '{name}'"
                )))
            }
        };
        Ok(field)
    }
}

impl fmt::Display for ConflictField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind(), self.name())
    }
}

impl FromStr for ConflictField {
    type Err = Error;

    /// Parse the `kind.field` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once('.')
            .ok_or_else(|| Error::InvalidInput(format!("expected kind.field, got '{s}'")))?;
        let kind = match kind {
            "book" => EntityKind::Book,
            "entry" => EntityKind::Entry,
            "category" => EntityKind::Category,
            other => return Err(Error::InvalidInput(format!("unknown entity kind '{other}'"))),
        };
        Self::parse(kind, name)
    }
}

/// Field-level divergence that needs a human decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub field: ConflictField,
    pub local_value: Value,
    pub cloud_value: Value,
}

impl Conflict {
    #[must_use]
    pub fn key(&self) -> ConflictKey {
        ConflictKey::new(self.entity_id.clone(), self.field)
    }
}

/// Identifies one conflict: a record id plus one of its fields
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictKey {
    pub entity_id: String,
    pub field: ConflictField,
}

impl ConflictKey {
    pub fn new(entity_id: impl Into<String>, field: ConflictField) -> Self {
        Self {
            entity_id: entity_id.into(),
            field,
        }
    }
}

/// User decision for a single conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "choice", content = "value", rename_all = "kebab-case")]
pub enum Resolution {
    UseLocal,
    UseCloud,
    Explicit(Value),
}

impl Resolution {
    /// The value this resolution writes for `conflict`.
    #[must_use]
    pub fn value_for(&self, conflict: &Conflict) -> Value {
        match self {
            Self::UseLocal => conflict.local_value.clone(),
            Self::UseCloud => conflict.cloud_value.clone(),
            Self::Explicit(value) => value.clone(),
        }
    }
}
