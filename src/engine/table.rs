//! Per-entity row tables.

use crate::types::{FieldValue, RowKey, StoredRow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Rows of one entity, keyed by engine row key, with an id index on top.
///
/// The id index is not persisted; it is rebuilt from the rows on load.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Table {
    /// Identity column name for this entity.
    id_field: String,

    rows: BTreeMap<RowKey, HashMap<String, FieldValue>>,

    /// Record id -> row key.
    #[serde(skip)]
    by_id: HashMap<String, RowKey>,
}

impl Table {
    pub fn new(id_field: &str) -> Self {
        Self {
            id_field: id_field.to_string(),
            rows: BTreeMap::new(),
            by_id: HashMap::new(),
        }
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// Allocate an empty row pending field assignment.
    pub fn insert_new(&mut self, key: RowKey) {
        self.rows.insert(key, HashMap::new());
    }

    /// Replace the fields of a row, keeping the id index current.
    pub fn write_fields(&mut self, key: RowKey, fields: HashMap<String, FieldValue>) {
        if let Some(previous) = self.rows.get(&key) {
            if let Some(FieldValue::String(old_id)) = previous.get(&self.id_field) {
                self.by_id.remove(old_id);
            }
        }
        if let Some(FieldValue::String(id)) = fields.get(&self.id_field) {
            self.by_id.insert(id.clone(), key);
        }
        self.rows.insert(key, fields);
    }

    pub fn lookup(&self, id: &str) -> Option<StoredRow> {
        let key = *self.by_id.get(id)?;
        self.get(key)
    }

    pub fn get(&self, key: RowKey) -> Option<StoredRow> {
        self.rows.get(&key).map(|fields| StoredRow {
            key,
            fields: fields.clone(),
        })
    }

    pub fn delete(&mut self, id: &str) -> bool {
        match self.by_id.remove(id) {
            Some(key) => self.rows.remove(&key).is_some(),
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.by_id.clear();
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All rows, in row key order.
    pub fn scan(&self) -> impl Iterator<Item = StoredRow> + '_ {
        self.rows.iter().map(|(key, fields)| StoredRow {
            key: *key,
            fields: fields.clone(),
        })
    }

    /// Mutable access to raw field maps, for migration transforms.
    pub(crate) fn rows_mut(
        &mut self,
    ) -> impl Iterator<Item = &mut HashMap<String, FieldValue>> {
        self.rows.values_mut()
    }

    /// Rebuild the id index from the rows, after load or migration.
    pub(crate) fn rebuild_index(&mut self) {
        self.by_id.clear();
        for (key, fields) in &self.rows {
            if let Some(FieldValue::String(id)) = fields.get(&self.id_field) {
                self.by_id.insert(id.clone(), *key);
            }
        }
    }
}
