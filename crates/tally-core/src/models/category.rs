//! Category model

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{
    new_record_id, CategoryField, ConflictField, EntityKind, EntryType, SyncMeta, Syncable,
};
use crate::{Error, Result};

/// A label entries can be filed under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    /// Unique identifier
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub entry_type: EntryType,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(flatten)]
    pub meta: SyncMeta,
}

impl Category {
    #[must_use]
    pub fn new(name: impl Into<String>, entry_type: EntryType, device: &str) -> Self {
        Self {
            id: new_record_id(),
            name: name.into(),
            entry_type,
            color: None,
            icon: None,
            meta: SyncMeta::new(device),
        }
    }
}

const FIELDS: [ConflictField; 4] = [
    ConflictField::Category(CategoryField::Name),
    ConflictField::Category(CategoryField::EntryType),
    ConflictField::Category(CategoryField::Color),
    ConflictField::Category(CategoryField::Icon),
];

impl Syncable for Category {
    const KIND: EntityKind = EntityKind::Category;

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
        let ConflictField::Category(field) = field else {
            return Err(Error::InvalidInput(format!("{field} is not a category field")));
        };
        let value = match field {
            CategoryField::Name => Value::from(self.name.clone()),
            CategoryField::EntryType => serde_json::to_value(self.entry_type)?,
            CategoryField::Color => serde_json::to_value(&self.color)?,
            CategoryField::Icon => serde_json::to_value(&self.icon)?,
        };
        Ok(value)
    }

    fn set_field_value(&mut self, field: ConflictField, value: Value) -> Result<()> {
        let ConflictField::Category(field) = field else {
            return Err(Error::InvalidInput(format!("{field} is not a category field")));
        };
        match field {
            CategoryField::Name => self.name = serde_json::from_value(value)?,
            CategoryField::EntryType => self.entry_type = serde_json::from_value(value)?,
            CategoryField::Color => self.color = serde_json::from_value(value)?,
            CategoryField::Icon => self.icon = serde_json::from_value(value)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_type_serializes_lowercase() {
        let category = Category::new("Salary", EntryType::Income, "device-a");
        let value = serde_json::to_value(&category).unwrap();
        assert_eq!(value["entryType"], json!("income"));
        assert_eq!(value["color"], Value::Null);
    }

    #[test]
    fn set_field_value_updates_color() {
        let mut category = Category::new("Food", EntryType::Expense, "device-a");
        let field = ConflictField::Category(CategoryField::Color);
        category.set_field_value(field, json!("#ff8800")).unwrap();
        assert_eq!(category.color.as_deref(), Some("#ff8800"));
    }
}
