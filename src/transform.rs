//! Custom field type transformers.

use std::collections::HashMap;
use std::fmt;

/// Equality for one custom field type.
///
/// Custom values cross the storage boundary as serialized textual
/// representations (`FieldValue::Custom`); the transformer decides
/// whether two representations denote the same value, e.g. "1.50" and
/// "1.5" for a decimal type.
#[derive(Clone, Copy)]
pub struct FieldTransformer {
    /// Type key. Must match the `FieldKind::Custom` tag on the field.
    pub type_name: &'static str,
    /// Compares two serialized representations.
    pub equals: fn(&str, &str) -> bool,
}

impl fmt::Debug for FieldTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldTransformer")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Per-database registry of custom type transformers.
///
/// Owned by the `Database` instance it was configured into; there is no
/// process-global registry.
#[derive(Clone, Debug, Default)]
pub struct TransformerRegistry {
    entries: HashMap<&'static str, FieldTransformer>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transformer.
    ///
    /// Panics if the type key is already registered; double registration
    /// is a programmer error, not a recoverable condition.
    pub fn register(&mut self, transformer: FieldTransformer) {
        if self
            .entries
            .insert(transformer.type_name, transformer)
            .is_some()
        {
            panic!(
                "transformer already registered for custom type '{}'",
                transformer.type_name
            );
        }
    }

    pub fn get(&self, type_name: &str) -> Option<&FieldTransformer> {
        self.entries.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }
}
