//! The underlying store engine: raw row storage with snapshot persistence.
//!
//! Disk-backed stores live in a directory holding a MANIFEST (magic,
//! format version, last applied schema version), an advisory LOCK file
//! and a data snapshot. The snapshot is a checksummed rmp-serde payload,
//! written to a temp file and renamed into place so a crashed save never
//! leaves a torn file behind.

use super::migration::{pending_steps, MigrationContext, SchemaDescriptor};
use super::table::Table;
use crate::error::{Result, StoreError};
use crate::query::{compare_rows, Predicate, SortDescriptor};
use crate::types::{FieldValue, RowKey, StoredRow};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Where a store keeps its rows.
#[derive(Clone, Debug)]
pub enum StoreLocation {
    /// Directory holding the manifest, lock and data snapshot.
    Disk(PathBuf),
    /// Volatile, process-local.
    Memory,
}

/// Magic bytes for store files.
const STORE_MAGIC: &[u8; 4] = b"LVS\0";

/// Current on-disk format version.
const STORE_FORMAT_VERSION: u8 = 1;

const MANIFEST_FILE: &str = "MANIFEST";
const LOCK_FILE: &str = "LOCK";
const DATA_FILE: &str = "data.bin";

#[derive(Serialize)]
struct PersistedStateRef<'a> {
    next_key: u64,
    tables: &'a HashMap<String, Table>,
}

#[derive(Deserialize, Default)]
struct PersistedState {
    next_key: u64,
    tables: HashMap<String, Table>,
}

/// Snapshot of the engine's in-memory state, used by the gate to roll a
/// failed write back to its pre-operation state.
pub(crate) struct EngineCheckpoint {
    tables: HashMap<String, Table>,
    next_key: RowKey,
    dirty: bool,
}

/// Owns the physical store handle and translates entity-name + predicate
/// + sort + pagination into raw row operations.
pub struct StoreEngine {
    location: StoreLocation,

    /// Held for the engine's lifetime when disk-backed.
    lock_file: Option<File>,

    schema: SchemaDescriptor,
    tables: HashMap<String, Table>,
    next_key: RowKey,

    /// Whether any mutation happened since the last save. `save_if_dirty`
    /// is a no-op while clean, so no-op writes never touch the file.
    dirty: bool,
}

impl StoreEngine {
    /// Open or create a store at the given location and bring it up to
    /// the descriptor's schema version.
    pub fn open(location: StoreLocation, schema: SchemaDescriptor) -> Result<Self> {
        match location {
            StoreLocation::Memory => Ok(Self {
                location: StoreLocation::Memory,
                lock_file: None,
                schema,
                tables: HashMap::new(),
                next_key: RowKey::FIRST,
                dirty: false,
            }),
            StoreLocation::Disk(dir) => {
                fs::create_dir_all(&dir)?;
                if !dir.join(MANIFEST_FILE).exists() {
                    Self::write_manifest(&dir, schema.version)?;
                }
                let stored_version = Self::read_manifest(&dir)?;
                if stored_version > schema.version {
                    return Err(StoreError::SchemaVersion {
                        stored: stored_version,
                        supported: schema.version,
                    });
                }

                let lock_file = Self::acquire_lock(&dir)?;
                let (tables, next_key) = Self::load_data(&dir)?;

                let mut engine = Self {
                    location: StoreLocation::Disk(dir),
                    lock_file: Some(lock_file),
                    schema,
                    tables,
                    next_key,
                    dirty: false,
                };
                engine.run_migrations(stored_version)?;
                Ok(engine)
            }
        }
    }

    // --- Raw Operations ---

    /// Matching rows, sorted, paginated.
    pub fn fetch(
        &self,
        entity: &str,
        predicate: &Predicate,
        sort: &[SortDescriptor],
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<StoredRow>> {
        self.check_entity(entity)?;
        let Some(table) = self.tables.get(entity) else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<StoredRow> = table.scan().filter(|row| predicate.matches(row)).collect();
        if !sort.is_empty() {
            rows.sort_by(|a, b| compare_rows(a, b, sort));
        }

        let rows = rows.into_iter().skip(offset);
        Ok(match limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        })
    }

    pub fn count(&self, entity: &str, predicate: &Predicate) -> Result<usize> {
        self.check_entity(entity)?;
        let Some(table) = self.tables.get(entity) else {
            return Ok(0);
        };
        if matches!(predicate, Predicate::All) {
            return Ok(table.len());
        }
        Ok(table.scan().filter(|row| predicate.matches(row)).count())
    }

    /// Allocate a fresh, uninitialized row pending field assignment.
    pub fn insert_new(&mut self, entity: &str, id_field: &str) -> Result<RowKey> {
        self.check_entity(entity)?;
        let key = self.next_key;
        self.next_key = key.next();
        self.table_entry(entity, id_field).insert_new(key);
        self.dirty = true;
        Ok(key)
    }

    pub fn write_fields(
        &mut self,
        entity: &str,
        id_field: &str,
        key: RowKey,
        fields: HashMap<String, FieldValue>,
    ) -> Result<()> {
        self.check_entity(entity)?;
        self.table_entry(entity, id_field).write_fields(key, fields);
        self.dirty = true;
        Ok(())
    }

    pub fn lookup(&self, entity: &str, id: &str) -> Result<Option<StoredRow>> {
        self.check_entity(entity)?;
        Ok(self.tables.get(entity).and_then(|table| table.lookup(id)))
    }

    pub fn delete(&mut self, entity: &str, id: &str) -> Result<bool> {
        self.check_entity(entity)?;
        let deleted = self
            .tables
            .get_mut(entity)
            .is_some_and(|table| table.delete(id));
        if deleted {
            self.dirty = true;
        }
        Ok(deleted)
    }

    pub fn delete_all(&mut self, entity: &str) -> Result<()> {
        self.check_entity(entity)?;
        if let Some(table) = self.tables.get_mut(entity) {
            if !table.is_empty() {
                table.clear();
                self.dirty = true;
            }
        }
        Ok(())
    }

    /// Flush pending changes, only if any exist.
    pub fn save_if_dirty(&mut self) -> Result<()> {
        if self.dirty {
            self.save()?;
        }
        Ok(())
    }

    /// Wipe all rows and persist the empty state, leaving the store
    /// usable (reset semantics).
    pub fn wipe(&mut self) -> Result<()> {
        self.tables.clear();
        self.next_key = RowKey::FIRST;
        self.dirty = true;
        self.save()
    }

    /// Delete the physical backing files (destroy semantics).
    pub fn remove_backing_files(&mut self) -> Result<()> {
        if let StoreLocation::Disk(dir) = &self.location {
            let dir = dir.clone();
            // Release the advisory lock before removing the directory.
            self.lock_file = None;
            fs::remove_dir_all(&dir)?;
            tracing::debug!(path = %dir.display(), "removed store directory");
        }
        Ok(())
    }

    pub(crate) fn checkpoint(&self) -> EngineCheckpoint {
        EngineCheckpoint {
            tables: self.tables.clone(),
            next_key: self.next_key,
            dirty: self.dirty,
        }
    }

    pub(crate) fn restore(&mut self, checkpoint: EngineCheckpoint) {
        self.tables = checkpoint.tables;
        self.next_key = checkpoint.next_key;
        self.dirty = checkpoint.dirty;
    }

    // --- Private Helpers ---

    fn check_entity(&self, entity: &str) -> Result<()> {
        if self.schema.entities.is_empty() || self.schema.entities.iter().any(|e| *e == entity) {
            Ok(())
        } else {
            Err(StoreError::MissingAdapter(entity.to_string()))
        }
    }

    fn table_entry(&mut self, entity: &str, id_field: &str) -> &mut Table {
        self.tables
            .entry(entity.to_string())
            .or_insert_with(|| Table::new(id_field))
    }

    fn run_migrations(&mut self, stored_version: u32) -> Result<()> {
        for step in pending_steps(&self.schema, stored_version) {
            let mut ctx = MigrationContext {
                tables: &mut self.tables,
            };
            (step.apply)(&mut ctx)?;
            for table in self.tables.values_mut() {
                table.rebuild_index();
            }
            self.dirty = true;
            self.save()?;
            self.record_schema_version(step.to_version)?;
            tracing::info!(
                step = step.name,
                to_version = step.to_version,
                "applied migration step"
            );
        }
        if stored_version < self.schema.version {
            self.record_schema_version(self.schema.version)?;
        }
        Ok(())
    }

    fn record_schema_version(&self, version: u32) -> Result<()> {
        if let StoreLocation::Disk(dir) = &self.location {
            Self::write_manifest(dir, version)?;
        }
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        if let StoreLocation::Disk(dir) = &self.location {
            let payload = rmp_serde::to_vec(&PersistedStateRef {
                next_key: self.next_key.0,
                tables: &self.tables,
            })?;
            let checksum = crc32fast::hash(&payload);

            let tmp_path = dir.join(format!("{}.tmp", DATA_FILE));
            let mut file = File::create(&tmp_path)?;
            file.write_all(STORE_MAGIC)?;
            file.write_all(&[STORE_FORMAT_VERSION])?;
            file.write_all(&checksum.to_le_bytes())?;
            file.write_all(&payload)?;
            file.sync_all()?;
            fs::rename(&tmp_path, dir.join(DATA_FILE))?;

            tracing::debug!(bytes = payload.len(), "persisted store snapshot");
        }
        self.dirty = false;
        Ok(())
    }

    fn load_data(dir: &Path) -> Result<(HashMap<String, Table>, RowKey)> {
        let path = dir.join(DATA_FILE);
        if !path.exists() {
            return Ok((HashMap::new(), RowKey::FIRST));
        }

        let bytes = fs::read(&path)?;
        if bytes.len() < 9 {
            return Err(StoreError::InvalidFormat("Truncated data snapshot".into()));
        }
        if &bytes[0..4] != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid data magic".into()));
        }
        if bytes[4] != STORE_FORMAT_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported data format version: {}",
                bytes[4]
            )));
        }

        let stored_checksum = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        let payload = &bytes[9..];
        let computed_checksum = crc32fast::hash(payload);
        if stored_checksum != computed_checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        let mut persisted: PersistedState = rmp_serde::from_slice(payload)?;
        for table in persisted.tables.values_mut() {
            table.rebuild_index();
        }
        Ok((persisted.tables, RowKey(persisted.next_key)))
    }

    fn write_manifest(dir: &Path, schema_version: u32) -> Result<()> {
        let mut file = File::create(dir.join(MANIFEST_FILE))?;
        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_FORMAT_VERSION])?;
        file.write_all(&schema_version.to_le_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn read_manifest(dir: &Path) -> Result<u32> {
        let bytes = fs::read(dir.join(MANIFEST_FILE))?;
        if bytes.len() < 9 {
            return Err(StoreError::InvalidFormat("Truncated manifest".into()));
        }
        if &bytes[0..4] != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }
        if bytes[4] != STORE_FORMAT_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                bytes[4]
            )));
        }
        Ok(u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]))
    }

    fn acquire_lock(dir: &Path) -> Result<File> {
        let lock_file = File::create(dir.join(LOCK_FILE))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;
        Ok(lock_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::migration::MigrationStep;
    use tempfile::TempDir;

    fn fields(id: &str, code: &str) -> HashMap<String, FieldValue> {
        HashMap::from([
            ("id".to_string(), FieldValue::from(id)),
            ("code".to_string(), FieldValue::from(code)),
        ])
    }

    fn insert(engine: &mut StoreEngine, entity: &str, id: &str, code: &str) {
        let key = engine.insert_new(entity, "id").unwrap();
        engine.write_fields(entity, "id", key, fields(id, code)).unwrap();
    }

    #[test]
    fn test_memory_crud() {
        let mut engine =
            StoreEngine::open(StoreLocation::Memory, SchemaDescriptor::default()).unwrap();

        insert(&mut engine, "track", "a", "ATC");
        insert(&mut engine, "track", "b", "HTC");

        assert_eq!(engine.count("track", &Predicate::All).unwrap(), 2);
        assert!(engine.lookup("track", "a").unwrap().is_some());
        assert!(engine.delete("track", "a").unwrap());
        assert!(!engine.delete("track", "a").unwrap());
        assert_eq!(engine.count("track", &Predicate::All).unwrap(), 1);

        engine.delete_all("track").unwrap();
        assert_eq!(engine.count("track", &Predicate::All).unwrap(), 0);
    }

    #[test]
    fn test_fetch_sort_and_pagination() {
        let mut engine =
            StoreEngine::open(StoreLocation::Memory, SchemaDescriptor::default()).unwrap();
        insert(&mut engine, "track", "c", "JTC");
        insert(&mut engine, "track", "a", "ATC");
        insert(&mut engine, "track", "b", "HTC");

        let sort = vec![SortDescriptor::asc("code")];
        let rows = engine.fetch("track", &Predicate::All, &sort, 1, Some(1)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("code"), Some(&FieldValue::from("HTC")));
    }

    #[test]
    fn test_missing_adapter_for_undeclared_entity() {
        let schema = SchemaDescriptor::default().with_entities(vec!["track"]);
        let mut engine = StoreEngine::open(StoreLocation::Memory, schema).unwrap();

        assert!(engine.insert_new("track", "id").is_ok());
        let err = engine.insert_new("playlist", "id").unwrap_err();
        assert!(matches!(err, StoreError::MissingAdapter(entity) if entity == "playlist"));
    }

    #[test]
    fn test_dirty_tracking() {
        let mut engine =
            StoreEngine::open(StoreLocation::Memory, SchemaDescriptor::default()).unwrap();
        assert!(!engine.dirty);
        insert(&mut engine, "track", "a", "ATC");
        assert!(engine.dirty);
        engine.save_if_dirty().unwrap();
        assert!(!engine.dirty);
        // Deleting a missing row does not dirty the store.
        assert!(!engine.delete("track", "zzz").unwrap());
        assert!(!engine.dirty);
    }

    #[test]
    fn test_disk_persistence_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");

        {
            let mut engine = StoreEngine::open(
                StoreLocation::Disk(path.clone()),
                SchemaDescriptor::default(),
            )
            .unwrap();
            insert(&mut engine, "track", "a", "ATC");
            engine.save_if_dirty().unwrap();
        }

        let engine =
            StoreEngine::open(StoreLocation::Disk(path), SchemaDescriptor::default()).unwrap();
        let row = engine.lookup("track", "a").unwrap().unwrap();
        assert_eq!(row.get("code"), Some(&FieldValue::from("ATC")));
    }

    #[test]
    fn test_row_keys_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");

        let first_key;
        {
            let mut engine = StoreEngine::open(
                StoreLocation::Disk(path.clone()),
                SchemaDescriptor::default(),
            )
            .unwrap();
            first_key = engine.insert_new("track", "id").unwrap();
            engine
                .write_fields("track", "id", first_key, fields("a", "ATC"))
                .unwrap();
            engine.save_if_dirty().unwrap();
        }

        let mut engine =
            StoreEngine::open(StoreLocation::Disk(path), SchemaDescriptor::default()).unwrap();
        let next = engine.insert_new("track", "id").unwrap();
        assert!(next > first_key);
    }

    #[test]
    fn test_store_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");

        let _engine = StoreEngine::open(
            StoreLocation::Disk(path.clone()),
            SchemaDescriptor::default(),
        )
        .unwrap();

        let result = StoreEngine::open(StoreLocation::Disk(path), SchemaDescriptor::default());
        assert!(matches!(result, Err(StoreError::Locked)));
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");

        {
            let mut engine = StoreEngine::open(
                StoreLocation::Disk(path.clone()),
                SchemaDescriptor::default(),
            )
            .unwrap();
            insert(&mut engine, "track", "a", "ATC");
            engine.save_if_dirty().unwrap();
        }

        // Flip a payload byte.
        let data_path = path.join(DATA_FILE);
        let mut bytes = fs::read(&data_path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&data_path, bytes).unwrap();

        let result = StoreEngine::open(StoreLocation::Disk(path), SchemaDescriptor::default());
        assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_newer_stored_schema_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");

        {
            let _engine = StoreEngine::open(
                StoreLocation::Disk(path.clone()),
                SchemaDescriptor::new(5),
            )
            .unwrap();
        }

        let result = StoreEngine::open(StoreLocation::Disk(path), SchemaDescriptor::new(2));
        assert!(matches!(
            result,
            Err(StoreError::SchemaVersion {
                stored: 5,
                supported: 2
            })
        ));
    }

    #[test]
    fn test_progressive_migration_applies_pending_steps() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");

        {
            let mut engine = StoreEngine::open(
                StoreLocation::Disk(path.clone()),
                SchemaDescriptor::new(1),
            )
            .unwrap();
            let key = engine.insert_new("track", "id").unwrap();
            engine
                .write_fields(
                    "track",
                    "id",
                    key,
                    HashMap::from([
                        ("id".to_string(), FieldValue::from("a")),
                        ("label".to_string(), FieldValue::from("ATC")),
                    ]),
                )
                .unwrap();
            engine.save_if_dirty().unwrap();
        }

        let schema = SchemaDescriptor::new(3)
            .with_migration(MigrationStep {
                to_version: 2,
                name: "rename label to code",
                apply: |ctx| {
                    ctx.rename_field("track", "label", "code");
                    Ok(())
                },
            })
            .with_migration(MigrationStep {
                to_version: 3,
                name: "add plays",
                apply: |ctx| {
                    ctx.fill_default("track", "plays", FieldValue::Int(0));
                    Ok(())
                },
            });

        {
            let engine = StoreEngine::open(StoreLocation::Disk(path.clone()), schema).unwrap();
            let row = engine.lookup("track", "a").unwrap().unwrap();
            assert_eq!(row.get("code"), Some(&FieldValue::from("ATC")));
            assert_eq!(row.get("label"), None);
            assert_eq!(row.get("plays"), Some(&FieldValue::Int(0)));
        }

        // Manifest now records version 3; reopening with the same schema
        // runs no steps and leaves the data untouched.
        let engine = StoreEngine::open(
            StoreLocation::Disk(path),
            SchemaDescriptor::new(3).with_migration(MigrationStep {
                to_version: 2,
                name: "rename label to code",
                apply: |_| panic!("step must not re-run"),
            }),
        )
        .unwrap();
        let row = engine.lookup("track", "a").unwrap().unwrap();
        assert_eq!(row.get("code"), Some(&FieldValue::from("ATC")));
    }

    #[test]
    fn test_migration_resumes_mid_sequence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");

        {
            let _engine = StoreEngine::open(
                StoreLocation::Disk(path.clone()),
                SchemaDescriptor::new(1),
            )
            .unwrap();
        }

        // First upgrade stops at version 2.
        {
            let _engine = StoreEngine::open(
                StoreLocation::Disk(path.clone()),
                SchemaDescriptor::new(2).with_migration(MigrationStep {
                    to_version: 2,
                    name: "step two",
                    apply: |_| Ok(()),
                }),
            )
            .unwrap();
        }

        // Later upgrade to version 3 must only run the remaining step.
        let schema = SchemaDescriptor::new(3)
            .with_migration(MigrationStep {
                to_version: 2,
                name: "step two",
                apply: |_| panic!("already applied"),
            })
            .with_migration(MigrationStep {
                to_version: 3,
                name: "step three",
                apply: |_| Ok(()),
            });
        let _engine = StoreEngine::open(StoreLocation::Disk(path), schema).unwrap();
    }

    #[test]
    fn test_wipe_persists_empty_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");

        {
            let mut engine = StoreEngine::open(
                StoreLocation::Disk(path.clone()),
                SchemaDescriptor::default(),
            )
            .unwrap();
            insert(&mut engine, "track", "a", "ATC");
            engine.save_if_dirty().unwrap();
            engine.wipe().unwrap();
            assert_eq!(engine.count("track", &Predicate::All).unwrap(), 0);
        }

        let engine =
            StoreEngine::open(StoreLocation::Disk(path), SchemaDescriptor::default()).unwrap();
        assert_eq!(engine.count("track", &Predicate::All).unwrap(), 0);
    }
}
