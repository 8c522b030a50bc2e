//! Versioned schema descriptors and progressive migration.
//!
//! Disk-backed stores carry the last successfully applied schema version
//! in their manifest. On open, migration steps between the stored
//! version and the descriptor's version run in ascending order, and the
//! manifest is rewritten after every step, so an interrupted migration
//! resumes mid-sequence instead of re-running from scratch.

use super::table::Table;
use crate::error::Result;
use crate::types::FieldValue;
use std::collections::HashMap;
use std::fmt;

/// Declared schema for a store: its version, the entities it serves and
/// the migration steps that carry old stores forward.
#[derive(Clone, Debug)]
pub struct SchemaDescriptor {
    /// Current schema version. Fresh stores are stamped with this.
    pub version: u32,

    /// Declared entity names. When non-empty, operations naming an
    /// undeclared entity fail with `MissingAdapter`; when empty, tables
    /// are created on demand.
    pub entities: Vec<&'static str>,

    /// Stepwise transformations between successive versions.
    pub migrations: Vec<MigrationStep>,
}

impl Default for SchemaDescriptor {
    fn default() -> Self {
        Self {
            version: 1,
            entities: Vec::new(),
            migrations: Vec::new(),
        }
    }
}

impl SchemaDescriptor {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn with_entities(mut self, entities: Vec<&'static str>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_migration(mut self, step: MigrationStep) -> Self {
        self.migrations.push(step);
        self
    }
}

/// One migration step, bringing a store up to `to_version`.
#[derive(Clone, Copy)]
pub struct MigrationStep {
    pub to_version: u32,
    pub name: &'static str,
    pub apply: fn(&mut MigrationContext<'_>) -> Result<()>,
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("to_version", &self.to_version)
            .field("name", &self.name)
            .finish()
    }
}

/// Mutable view over the store's tables handed to a migration step.
pub struct MigrationContext<'a> {
    pub(crate) tables: &'a mut HashMap<String, Table>,
}

impl MigrationContext<'_> {
    /// Rename a field on every row of an entity.
    pub fn rename_field(&mut self, entity: &str, from: &str, to: &str) {
        if let Some(table) = self.tables.get_mut(entity) {
            for fields in table.rows_mut() {
                if let Some(value) = fields.remove(from) {
                    fields.insert(to.to_string(), value);
                }
            }
        }
    }

    /// Set a field on every row of an entity where it is missing.
    pub fn fill_default(&mut self, entity: &str, field: &str, value: FieldValue) {
        if let Some(table) = self.tables.get_mut(entity) {
            for fields in table.rows_mut() {
                fields.entry(field.to_string()).or_insert_with(|| value.clone());
            }
        }
    }

    /// Remove a field from every row of an entity.
    pub fn drop_field(&mut self, entity: &str, field: &str) {
        if let Some(table) = self.tables.get_mut(entity) {
            for fields in table.rows_mut() {
                fields.remove(field);
            }
        }
    }

    /// Drop an entity and all of its rows.
    pub fn drop_entity(&mut self, entity: &str) {
        self.tables.remove(entity);
    }
}

/// The steps that still need to run to bring `stored_version` up to the
/// descriptor's version, in application order.
pub(crate) fn pending_steps(
    schema: &SchemaDescriptor,
    stored_version: u32,
) -> Vec<MigrationStep> {
    let mut steps: Vec<MigrationStep> = schema
        .migrations
        .iter()
        .filter(|step| step.to_version > stored_version && step.to_version <= schema.version)
        .copied()
        .collect();
    steps.sort_by_key(|step| step.to_version);
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RowKey;

    fn schema_with_steps(version: u32, steps: Vec<u32>) -> SchemaDescriptor {
        let mut schema = SchemaDescriptor::new(version);
        for to_version in steps {
            schema = schema.with_migration(MigrationStep {
                to_version,
                name: "step",
                apply: |_| Ok(()),
            });
        }
        schema
    }

    #[test]
    fn test_pending_steps_resume_mid_sequence() {
        let schema = schema_with_steps(4, vec![4, 2, 3]);

        let pending: Vec<u32> = pending_steps(&schema, 2)
            .iter()
            .map(|s| s.to_version)
            .collect();
        assert_eq!(pending, vec![3, 4]);

        assert!(pending_steps(&schema, 4).is_empty());
    }

    #[test]
    fn test_pending_steps_capped_at_schema_version() {
        let schema = schema_with_steps(2, vec![2, 3]);
        let pending: Vec<u32> = pending_steps(&schema, 1)
            .iter()
            .map(|s| s.to_version)
            .collect();
        assert_eq!(pending, vec![2]);
    }

    #[test]
    fn test_context_rename_and_fill() {
        let mut tables = HashMap::new();
        let mut table = Table::new("id");
        table.insert_new(RowKey(1));
        table.write_fields(
            RowKey(1),
            HashMap::from([
                ("id".to_string(), FieldValue::from("a")),
                ("old_name".to_string(), FieldValue::from("x")),
            ]),
        );
        tables.insert("item".to_string(), table);

        let mut ctx = MigrationContext { tables: &mut tables };
        ctx.rename_field("item", "old_name", "name");
        ctx.fill_default("item", "plays", FieldValue::Int(0));
        ctx.drop_field("item", "never_there");

        let row = tables["item"].get(RowKey(1)).unwrap();
        assert_eq!(row.get("name"), Some(&FieldValue::from("x")));
        assert_eq!(row.get("old_name"), None);
        assert_eq!(row.get("plays"), Some(&FieldValue::Int(0)));
    }
}
