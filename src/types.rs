//! Core value types for the store.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Engine-assigned identity of a stored row.
///
/// Distinct from the record's own id field: the row key identifies the
/// physical row and is what distinguishes an insert (fresh key) from an
/// update (existing key).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey(pub u64);

impl RowKey {
    /// First key handed out by a fresh engine.
    pub const FIRST: RowKey = RowKey(1);

    pub fn next(self) -> Self {
        RowKey(self.0 + 1)
    }
}

impl fmt::Debug for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowKey({})", self.0)
    }
}

/// Locking discipline for a store operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    /// Shared lock; many may proceed concurrently.
    Read,
    /// Exclusive lock; excludes all other reads and writes.
    Write,
}

/// Declared shape of a record field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    String,
    Bytes,
    /// Custom type carried as a serialized textual representation.
    /// The tag must match a registered transformer's type key.
    Custom(&'static str),
    /// Nested collection shapes can be declared but not decoded.
    List,
    /// Nested map shapes can be declared but not decoded.
    Map,
}

/// A single stored field value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Wrapper for types the store cannot represent natively (e.g.
    /// arbitrary-precision numbers). Carries a serializable textual
    /// representation; the owning field's setter reconstructs the typed
    /// value fresh on each read.
    Custom { type_name: String, repr: String },
}

impl FieldValue {
    /// Short name of the value's shape, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::String(_) => "string",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::Custom { .. } => "custom",
        }
    }

    /// Ordering between two values, where one exists.
    ///
    /// Values of different shapes do not compare, except int/float which
    /// compare numerically.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::Null, FieldValue::Null) => Some(Ordering::Equal),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => Some(a.cmp(b)),
            (FieldValue::Int(a), FieldValue::Int(b)) => Some(a.cmp(b)),
            (FieldValue::Float(a), FieldValue::Float(b)) => a.partial_cmp(b),
            (FieldValue::Int(a), FieldValue::Float(b)) => (*a as f64).partial_cmp(b),
            (FieldValue::Float(a), FieldValue::Int(b)) => a.partial_cmp(&(*b as f64)),
            (FieldValue::String(a), FieldValue::String(b)) => Some(a.cmp(b)),
            (FieldValue::Bytes(a), FieldValue::Bytes(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}

/// The underlying store's native representation of one record: a set of
/// named fields plus the engine's own row identity.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredRow {
    pub key: RowKey,
    pub fields: HashMap<String, FieldValue>,
}

impl StoredRow {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}
