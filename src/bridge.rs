//! Decoder/equality bridge between typed records and stored rows.
//!
//! Hydration maps a stored row's field map back into a typed record via
//! the type's descriptor table; change detection compares a candidate
//! record field-by-field against the persisted row so no-op saves can be
//! skipped without firing spurious notifications.

use crate::error::{Result, StoreError};
use crate::record::Record;
use crate::transform::TransformerRegistry;
use crate::types::{FieldKind, FieldValue, StoredRow};
use std::collections::HashMap;

/// Serialize a record into its stored field map.
pub(crate) fn encode_record<R: Record>(record: &R) -> HashMap<String, FieldValue> {
    R::fields()
        .iter()
        .map(|descriptor| (descriptor.name.to_string(), (descriptor.get)(record)))
        .collect()
}

/// Hydrate a stored row into a typed record.
///
/// Every declared field must be present with a compatible value. List
/// and map shapes are declared but explicitly not decodable.
pub(crate) fn hydrate<R: Record>(row: &StoredRow) -> Result<R> {
    let mut record = R::default();
    for descriptor in R::fields() {
        if matches!(descriptor.kind, FieldKind::List | FieldKind::Map) {
            return Err(StoreError::UnsupportedShape {
                field: descriptor.name.to_string(),
                kind: format!("{:?}", descriptor.kind),
            });
        }
        let value = row.get(descriptor.name).cloned().ok_or_else(|| StoreError::Decode {
            field: descriptor.name.to_string(),
            reason: "missing in stored row".to_string(),
        })?;
        (descriptor.set)(&mut record, value)?;
    }
    Ok(record)
}

/// Whether a candidate field map differs from the persisted row.
///
/// Primitives compare natively. `Custom` values compare through the
/// registered transformer; an unregistered custom type panics — unknown
/// types must never be silently treated as changed or unchanged.
pub(crate) fn has_changed(
    candidate: &HashMap<String, FieldValue>,
    row: &StoredRow,
    registry: &TransformerRegistry,
) -> bool {
    for (name, value) in candidate {
        if !field_matches(name, value, row.get(name), registry) {
            return true;
        }
    }
    false
}

fn field_matches(
    name: &str,
    candidate: &FieldValue,
    stored: Option<&FieldValue>,
    registry: &TransformerRegistry,
) -> bool {
    if let FieldValue::Custom { type_name, repr } = candidate {
        let transformer = registry.get(type_name).unwrap_or_else(|| {
            panic!(
                "no transformer registered for custom type '{}' (field '{}')",
                type_name, name
            )
        });
        return match stored {
            Some(FieldValue::Custom {
                type_name: stored_type,
                repr: stored_repr,
            }) => type_name == stored_type && (transformer.equals)(repr, stored_repr),
            _ => false,
        };
    }
    stored == Some(candidate)
}
