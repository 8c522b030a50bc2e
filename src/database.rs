//! Public database facade.
//!
//! Every data operation is queued on a shared worker pool and returns a
//! [`Deferred`] resolved exactly once; callers block only when they
//! consume the result. Write operations diff against the stored rows
//! through the bridge, so a save that changes nothing writes nothing and
//! fires no notification.

use crate::bridge::{encode_record, has_changed, hydrate};
use crate::engine::{SchemaDescriptor, StoreEngine, StoreLocation};
use crate::error::{Result, StoreError};
use crate::events::{ChangeBus, ChangeSet, Observer};
use crate::exec::{deferred, Deferred, WorkerPool};
use crate::gate::AccessGate;
use crate::query::{Predicate, SortDescriptor};
use crate::record::Record;
use crate::transform::{FieldTransformer, TransformerRegistry};
use crate::types::{FieldValue, StoredRow};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Database configuration.
#[derive(Debug)]
pub struct DatabaseConfig {
    pub location: StoreLocation,
    pub schema: SchemaDescriptor,
    pub worker_threads: usize,
    pub transformers: TransformerRegistry,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            location: StoreLocation::Memory,
            schema: SchemaDescriptor::default(),
            worker_threads: 4,
            transformers: TransformerRegistry::new(),
        }
    }
}

impl DatabaseConfig {
    /// In-memory store, default schema.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Disk-backed store in the given directory.
    pub fn disk(path: impl Into<PathBuf>) -> Self {
        Self {
            location: StoreLocation::Disk(path.into()),
            ..Default::default()
        }
    }

    pub fn with_schema(mut self, schema: SchemaDescriptor) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_transformer(mut self, transformer: FieldTransformer) -> Self {
        self.transformers.register(transformer);
        self
    }
}

struct Inner {
    gate: AccessGate,
    bus: ChangeBus,
    transformers: RwLock<TransformerRegistry>,
    pool: WorkerPool,
}

/// Handle to one store. Cheap to clone; all clones share the same gate,
/// bus and worker pool.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Database {
    /// Open or create a store, running any pending schema migration.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        let engine = StoreEngine::open(config.location, config.schema)?;
        tracing::info!(workers = config.worker_threads, "database opened");
        Ok(Self {
            inner: Arc::new(Inner {
                gate: AccessGate::new(engine),
                bus: ChangeBus::new(),
                transformers: RwLock::new(config.transformers),
                pool: WorkerPool::new(config.worker_threads),
            }),
        })
    }

    // --- Writes ---

    /// Insert every record as a fresh row, no diffing against existing
    /// ids. All-or-nothing for the whole batch.
    pub fn add<R: Record>(&self, records: Vec<R>) -> Deferred<Result<Option<Vec<R>>>> {
        self.run(move |inner| {
            let outcome = inner.gate.write_with_commit(
                |engine| {
                    for record in &records {
                        let key = engine.insert_new(R::entity_name(), R::id_field())?;
                        engine.write_fields(
                            R::entity_name(),
                            R::id_field(),
                            key,
                            encode_record(record),
                        )?;
                    }
                    Ok(records)
                },
                |records| inner.bus.publish(ChangeSet::inserted(records.clone())),
            );
            collapse(outcome)
        })
    }

    /// Insert records whose id has no row yet, update the rest in place.
    ///
    /// One batched id lookup serves the whole call. Rows whose stored
    /// fields already equal the candidate are not rewritten and do not
    /// appear in the published change set.
    pub fn add_or_update<R: Record>(&self, records: Vec<R>) -> Deferred<Result<Option<Vec<R>>>> {
        self.run(move |inner| {
            let transformers = inner.transformers.read();
            let outcome = inner.gate.write_with_commit(
                |engine| {
                    let ids: Vec<FieldValue> = records
                        .iter()
                        .map(|record| FieldValue::String(record.record_id()))
                        .collect();
                    let existing = engine.fetch(
                        R::entity_name(),
                        &Predicate::is_in(R::id_field(), ids),
                        &[],
                        0,
                        None,
                    )?;
                    let mut by_id: HashMap<String, StoredRow> =
                        HashMap::with_capacity(existing.len());
                    for row in existing {
                        if let Some(FieldValue::String(id)) = row.get(R::id_field()) {
                            by_id.insert(id.clone(), row);
                        }
                    }

                    let mut set = ChangeSet::default();
                    for record in &records {
                        let fields = encode_record(record);
                        match by_id.get(&record.record_id()) {
                            Some(row) => {
                                if has_changed(&fields, row, &transformers) {
                                    engine.write_fields(
                                        R::entity_name(),
                                        R::id_field(),
                                        row.key,
                                        fields,
                                    )?;
                                    set.updated.push(record.clone());
                                }
                            }
                            None => {
                                let key = engine.insert_new(R::entity_name(), R::id_field())?;
                                engine.write_fields(
                                    R::entity_name(),
                                    R::id_field(),
                                    key,
                                    fields,
                                )?;
                                set.inserted.push(record.clone());
                            }
                        }
                    }
                    Ok((records, set))
                },
                |(_, set)| inner.bus.publish(set.clone()),
            );
            collapse(outcome.map(|(records, _)| records))
        })
    }

    /// Update existing rows only. Records whose id has no row are
    /// dropped from the returned list and never created.
    pub fn update<R: Record>(&self, records: Vec<R>) -> Deferred<Result<Option<Vec<R>>>> {
        self.run(move |inner| {
            let transformers = inner.transformers.read();
            let outcome = inner.gate.write_with_commit(
                |engine| {
                    let mut matched = Vec::with_capacity(records.len());
                    let mut set = ChangeSet::default();
                    for record in records {
                        let id = record.record_id();
                        let Some(row) = engine.lookup(R::entity_name(), &id)? else {
                            tracing::debug!(
                                entity = R::entity_name(),
                                id = %id,
                                "update skipped missing record"
                            );
                            continue;
                        };
                        let fields = encode_record(&record);
                        if has_changed(&fields, &row, &transformers) {
                            engine.write_fields(R::entity_name(), R::id_field(), row.key, fields)?;
                            set.updated.push(record.clone());
                        }
                        matched.push(record);
                    }
                    Ok((matched, set))
                },
                |(_, set)| inner.bus.publish(set.clone()),
            );
            collapse(outcome.map(|(matched, _)| matched))
        })
    }

    /// Delete one record by id. `false` when no row has the id.
    pub fn delete<R: Record>(&self, id: impl Into<String>) -> Deferred<Result<bool>> {
        let id = id.into();
        self.run(move |inner| {
            let outcome = inner.gate.write_with_commit(
                |engine| {
                    let Some(row) = engine.lookup(R::entity_name(), &id)? else {
                        return Ok((false, None));
                    };
                    let removed = engine.delete(R::entity_name(), &id)?;
                    // A row that fails to hydrate is still deleted, just
                    // absent from the event.
                    let record = if removed { hydrate::<R>(&row).ok() } else { None };
                    Ok((removed, record))
                },
                |(_, record)| {
                    if let Some(record) = record {
                        inner.bus.publish(ChangeSet::deleted(vec![record.clone()]));
                    }
                },
            );
            Ok(collapse(outcome)?.map(|(removed, _)| removed).unwrap_or(false))
        })
    }

    /// Delete every row of the entity, publishing the removed records.
    pub fn delete_all<R: Record>(&self) -> Deferred<Result<()>> {
        self.run(move |inner| {
            inner
                .gate
                .write_with_commit(
                    |engine| {
                        let rows = engine.fetch(R::entity_name(), &Predicate::All, &[], 0, None)?;
                        engine.delete_all(R::entity_name())?;
                        Ok(ChangeSet::deleted(
                            rows.iter().filter_map(|row| hydrate::<R>(row).ok()).collect(),
                        ))
                    },
                    |set| inner.bus.publish(set.clone()),
                )
                .map(|_| ())
        })
    }

    // --- Reads ---

    /// Matching records, sorted and paginated. An empty result is valid.
    pub fn fetch<R: Record>(
        &self,
        predicate: Predicate,
        sort: Vec<SortDescriptor>,
        offset: usize,
        limit: Option<usize>,
    ) -> Deferred<Result<Vec<R>>> {
        self.run(move |inner| {
            let rows = inner
                .gate
                .read(|engine| engine.fetch(R::entity_name(), &predicate, &sort, offset, limit))?;
            rows.iter().map(hydrate::<R>).collect()
        })
    }

    /// The first matching record under the given order.
    pub fn fetch_one<R: Record>(
        &self,
        predicate: Predicate,
        sort: Vec<SortDescriptor>,
    ) -> Deferred<Result<Option<R>>> {
        self.run(move |inner| {
            let rows = inner
                .gate
                .read(|engine| engine.fetch(R::entity_name(), &predicate, &sort, 0, Some(1)))?;
            rows.first().map(hydrate::<R>).transpose()
        })
    }

    pub fn count<R: Record>(&self, predicate: Predicate) -> Deferred<Result<usize>> {
        self.run(move |inner| {
            inner
                .gate
                .read(|engine| engine.count(R::entity_name(), &predicate))
        })
    }

    // --- Observation ---

    /// Subscribe to every committed change of the entity.
    pub fn observe<R: Record>(&self) -> Observer<R> {
        self.inner.bus.observe(None)
    }

    /// Subscribe to committed changes touching one record id.
    pub fn observe_id<R: Record>(&self, id: impl Into<String>) -> Observer<R> {
        self.inner.bus.observe(Some(id.into()))
    }

    // --- Lifecycle ---

    /// Tear the store down, delete its backing files and deliver the
    /// terminal error to every observer. Idempotent; every later data
    /// operation fails with `StoreDestroyed`.
    pub fn destroy(&self) -> Deferred<Result<()>> {
        self.run(|inner| {
            inner.gate.destroy()?;
            inner.bus.close();
            Ok(())
        })
    }

    /// Wipe all rows, keeping the store usable.
    pub fn reset(&self) -> Deferred<Result<()>> {
        self.run(|inner| inner.gate.reset())
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.gate.is_destroyed()
    }

    /// Register an equality transformer for a custom field type.
    ///
    /// Panics if the type key is already registered.
    pub fn register_transformer(&self, transformer: FieldTransformer) {
        self.inner.transformers.write().register(transformer);
    }

    fn run<T, F>(&self, job: F) -> Deferred<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> T + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let (resolver, result) = deferred();
        self.inner.pool.execute(move || {
            let value = job(&inner);
            // Release the job's handle before waking the caller, so a
            // caller that drops its last handle right after `wait` tears
            // the store (and its file lock) down synchronously.
            drop(inner);
            resolver.resolve(value);
        });
        result
    }
}

/// Collapse non-lifecycle write failures to `Ok(None)`.
///
/// Callers of the batched write operations get no per-record diagnostics
/// by design; only structural errors surface as `Err`.
fn collapse<T>(outcome: Result<T>) -> Result<Option<T>> {
    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(err @ (StoreError::StoreDestroyed | StoreError::MissingAdapter(_))) => Err(err),
        Err(err) => {
            tracing::warn!(error = %err, "write dropped");
            Ok(None)
        }
    }
}
