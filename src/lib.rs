//! livestore: a concurrent, reactive, struct-oriented object store.
//!
//! Plain data records go in and out through a [`Database`] handle:
//! CRUD with predicates, sorting and pagination; change notification
//! streams per entity; a single-writer/multi-reader gate so readers
//! never observe a half-applied write; disk-backed stores with a
//! checksummed snapshot and stepwise schema migration.
//!
//! # Example
//!
//! ```ignore
//! use livestore::{Database, DatabaseConfig, Predicate, SortDescriptor};
//!
//! let db = Database::open(DatabaseConfig::disk("/var/lib/app/store"))?;
//! db.add(vec![track_a, track_b]).wait()?;
//! let first: Option<Track> = db
//!     .fetch_one(Predicate::All, vec![SortDescriptor::asc("code")])
//!     .wait()?;
//! ```

pub mod engine;

mod bridge;
mod database;
mod error;
mod events;
mod exec;
mod gate;
mod query;
mod record;
mod transform;
mod types;

pub use database::{Database, DatabaseConfig};
pub use engine::{MigrationContext, MigrationStep, SchemaDescriptor, StoreLocation};
pub use error::{Result, StoreError};
pub use events::{ChangeSet, Observer};
pub use exec::Deferred;
pub use query::{Predicate, SortDescriptor};
pub use record::{
    take_bool, take_bytes, take_custom, take_float, take_int, take_string, FieldDescriptor, Record,
};
pub use transform::{FieldTransformer, TransformerRegistry};
pub use types::{FieldKind, FieldValue, OperationKind, RowKey, StoredRow};
