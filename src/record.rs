//! The `Record` trait and per-type field descriptor tables.

use crate::error::{Result, StoreError};
use crate::types::{FieldKind, FieldValue};
use std::fmt;

/// Descriptor for one declared field of a record type.
///
/// Descriptor tables are built once per type, hand-written or generated,
/// and fully describe how a field crosses the storage boundary: name,
/// type tag, getter and setter. There is no runtime introspection.
pub struct FieldDescriptor<R> {
    /// Column name in the stored row.
    pub name: &'static str,
    /// Declared shape.
    pub kind: FieldKind,
    /// Reads the field out of a record as a stored value.
    pub get: fn(&R) -> FieldValue,
    /// Writes a stored value back into a record.
    pub set: fn(&mut R, FieldValue) -> Result<()>,
}

impl<R> fmt::Debug for FieldDescriptor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// A plain struct that can be persisted by the store.
///
/// Records are value objects: created, compared and discarded per call,
/// with no lifecycle of their own. Within one entity the id is unique.
///
/// ```ignore
/// #[derive(Clone, Debug, Default)]
/// struct Track {
///     id: String,
///     code: String,
/// }
///
/// impl Record for Track {
///     fn entity_name() -> &'static str {
///         "track"
///     }
///
///     fn fields() -> &'static [FieldDescriptor<Self>] {
///         static FIELDS: OnceLock<Vec<FieldDescriptor<Track>>> = OnceLock::new();
///         FIELDS.get_or_init(|| {
///             vec![
///                 FieldDescriptor {
///                     name: "id",
///                     kind: FieldKind::String,
///                     get: |r| FieldValue::String(r.id.clone()),
///                     set: |r, v| {
///                         r.id = take_string("id", v)?;
///                         Ok(())
///                     },
///                 },
///                 FieldDescriptor {
///                     name: "code",
///                     kind: FieldKind::String,
///                     get: |r| FieldValue::String(r.code.clone()),
///                     set: |r, v| {
///                         r.code = take_string("code", v)?;
///                         Ok(())
///                     },
///                 },
///             ]
///         })
///     }
/// }
/// ```
pub trait Record: Clone + Default + Send + Sync + 'static {
    /// Entity (table) name this type is stored under.
    fn entity_name() -> &'static str;

    /// Name of the identity column. Unique within the entity.
    fn id_field() -> &'static str {
        "id"
    }

    /// The declared field table, in stable order. Must include the id field.
    fn fields() -> &'static [FieldDescriptor<Self>];

    /// The record's identity value.
    ///
    /// Panics if the descriptor table declares no string-valued id field;
    /// that is a malformed `Record` implementation, not a runtime state.
    fn record_id(&self) -> String {
        let id_field = Self::id_field();
        let descriptor = Self::fields()
            .iter()
            .find(|d| d.name == id_field)
            .unwrap_or_else(|| {
                panic!(
                    "record type '{}' declares no '{}' field",
                    Self::entity_name(),
                    id_field
                )
            });
        match (descriptor.get)(self) {
            FieldValue::String(id) => id,
            other => panic!(
                "id field '{}' of '{}' must be a string, got {}",
                id_field,
                Self::entity_name(),
                other.kind_name()
            ),
        }
    }
}

/// Unwrap a string value, or report a decode mismatch for `field`.
pub fn take_string(field: &'static str, value: FieldValue) -> Result<String> {
    match value {
        FieldValue::String(s) => Ok(s),
        other => Err(mismatch(field, "string", &other)),
    }
}

/// Unwrap an integer value.
pub fn take_int(field: &'static str, value: FieldValue) -> Result<i64> {
    match value {
        FieldValue::Int(i) => Ok(i),
        other => Err(mismatch(field, "int", &other)),
    }
}

/// Unwrap a float value.
pub fn take_float(field: &'static str, value: FieldValue) -> Result<f64> {
    match value {
        FieldValue::Float(f) => Ok(f),
        other => Err(mismatch(field, "float", &other)),
    }
}

/// Unwrap a bool value.
pub fn take_bool(field: &'static str, value: FieldValue) -> Result<bool> {
    match value {
        FieldValue::Bool(b) => Ok(b),
        other => Err(mismatch(field, "bool", &other)),
    }
}

/// Unwrap a bytes value.
pub fn take_bytes(field: &'static str, value: FieldValue) -> Result<Vec<u8>> {
    match value {
        FieldValue::Bytes(b) => Ok(b),
        other => Err(mismatch(field, "bytes", &other)),
    }
}

/// Unwrap the textual representation of a custom value, checking the
/// type tag. The caller reconstructs the typed value from the repr.
pub fn take_custom(field: &'static str, expected: &str, value: FieldValue) -> Result<String> {
    match value {
        FieldValue::Custom { type_name, repr } if type_name == expected => Ok(repr),
        FieldValue::Custom { type_name, .. } => Err(StoreError::Decode {
            field: field.to_string(),
            reason: format!("expected custom type '{}', got '{}'", expected, type_name),
        }),
        other => Err(mismatch(field, "custom", &other)),
    }
}

fn mismatch(field: &'static str, expected: &str, got: &FieldValue) -> StoreError {
    StoreError::Decode {
        field: field.to_string(),
        reason: format!("expected {}, got {}", expected, got.kind_name()),
    }
}
