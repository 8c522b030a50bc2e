//! Underlying store engine: row tables, snapshot persistence and
//! versioned schema migration.

mod migration;
mod store;
mod table;

pub use migration::{MigrationContext, MigrationStep, SchemaDescriptor};
pub use store::{StoreEngine, StoreLocation};
