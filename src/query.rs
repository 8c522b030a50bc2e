//! Predicates, sorting and pagination over stored rows.

use crate::types::{FieldValue, StoredRow};
use std::cmp::Ordering;

/// A filter evaluated against stored rows.
///
/// Missing fields never match a positive condition; they only match
/// through `Ne` and `Not`.
#[derive(Clone, Debug)]
pub enum Predicate {
    /// Matches every row.
    All,
    Eq(String, FieldValue),
    Ne(String, FieldValue),
    Lt(String, FieldValue),
    Le(String, FieldValue),
    Gt(String, FieldValue),
    Ge(String, FieldValue),
    /// Field value is one of the given values.
    In(String, Vec<FieldValue>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::Eq(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::Ne(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::Lt(field.into(), value.into())
    }

    pub fn le(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::Le(field.into(), value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::Gt(field.into(), value.into())
    }

    pub fn ge(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::Ge(field.into(), value.into())
    }

    pub fn is_in(field: impl Into<String>, values: Vec<FieldValue>) -> Self {
        Predicate::In(field.into(), values)
    }

    pub fn not(inner: Predicate) -> Self {
        Predicate::Not(Box::new(inner))
    }

    /// Whether a row satisfies this predicate.
    pub fn matches(&self, row: &StoredRow) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Eq(field, value) => row.get(field).is_some_and(|v| v == value),
            Predicate::Ne(field, value) => row.get(field).is_none_or(|v| v != value),
            Predicate::Lt(field, value) => {
                compare_field(row, field, value) == Some(Ordering::Less)
            }
            Predicate::Le(field, value) => matches!(
                compare_field(row, field, value),
                Some(Ordering::Less) | Some(Ordering::Equal)
            ),
            Predicate::Gt(field, value) => {
                compare_field(row, field, value) == Some(Ordering::Greater)
            }
            Predicate::Ge(field, value) => matches!(
                compare_field(row, field, value),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            ),
            Predicate::In(field, values) => row.get(field).is_some_and(|v| values.contains(v)),
            Predicate::And(inner) => inner.iter().all(|p| p.matches(row)),
            Predicate::Or(inner) => inner.iter().any(|p| p.matches(row)),
            Predicate::Not(inner) => !inner.matches(row),
        }
    }
}

fn compare_field(row: &StoredRow, field: &str, value: &FieldValue) -> Option<Ordering> {
    row.get(field).and_then(|v| v.compare(value))
}

/// One sort key. Rows with the field missing order after rows that have it.
#[derive(Clone, Debug)]
pub struct SortDescriptor {
    pub field: String,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }
}

/// Compare two rows under a sort key sequence, tie-breaking on row key
/// so the overall order is total and stable.
pub(crate) fn compare_rows(a: &StoredRow, b: &StoredRow, sort: &[SortDescriptor]) -> Ordering {
    for key in sort {
        let ordering = match (a.get(&key.field), b.get(&key.field)) {
            (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ordering = if key.ascending {
            ordering
        } else {
            ordering.reverse()
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.key.cmp(&b.key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RowKey;
    use std::collections::HashMap;

    fn row(key: u64, fields: Vec<(&str, FieldValue)>) -> StoredRow {
        StoredRow {
            key: RowKey(key),
            fields: fields
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }

    #[test]
    fn test_eq_and_missing_field() {
        let r = row(1, vec![("code", FieldValue::from("ATC"))]);
        assert!(Predicate::eq("code", "ATC").matches(&r));
        assert!(!Predicate::eq("code", "HTC").matches(&r));
        // Missing field: Eq never matches, Ne does.
        assert!(!Predicate::eq("label", "x").matches(&r));
        assert!(Predicate::ne("label", "x").matches(&r));
    }

    #[test]
    fn test_ordering_predicates() {
        let r = row(1, vec![("plays", FieldValue::Int(10))]);
        assert!(Predicate::gt("plays", 5).matches(&r));
        assert!(Predicate::ge("plays", 10).matches(&r));
        assert!(Predicate::lt("plays", 11).matches(&r));
        assert!(!Predicate::lt("plays", 10).matches(&r));
        assert!(Predicate::le("plays", 10).matches(&r));
    }

    #[test]
    fn test_in_predicate() {
        let r = row(1, vec![("id", FieldValue::from("b"))]);
        let p = Predicate::is_in("id", vec![FieldValue::from("a"), FieldValue::from("b")]);
        assert!(p.matches(&r));
        let p = Predicate::is_in("id", vec![FieldValue::from("c")]);
        assert!(!p.matches(&r));
    }

    #[test]
    fn test_composite_predicates() {
        let r = row(
            1,
            vec![("code", FieldValue::from("ATC")), ("plays", FieldValue::Int(3))],
        );
        let p = Predicate::And(vec![
            Predicate::eq("code", "ATC"),
            Predicate::gt("plays", 1),
        ]);
        assert!(p.matches(&r));

        let p = Predicate::Or(vec![
            Predicate::eq("code", "XXX"),
            Predicate::eq("plays", 3i64),
        ]);
        assert!(p.matches(&r));

        assert!(!Predicate::not(Predicate::All).matches(&r));
    }

    #[test]
    fn test_sort_order_with_missing_fields() {
        let a = row(1, vec![("code", FieldValue::from("HTC"))]);
        let b = row(2, vec![("code", FieldValue::from("ATC"))]);
        let c = row(3, vec![]);

        let sort = vec![SortDescriptor::asc("code")];
        assert_eq!(compare_rows(&a, &b, &sort), Ordering::Greater);
        assert_eq!(compare_rows(&b, &a, &sort), Ordering::Less);
        // Missing field sorts last.
        assert_eq!(compare_rows(&a, &c, &sort), Ordering::Less);

        let sort = vec![SortDescriptor::desc("code")];
        assert_eq!(compare_rows(&a, &b, &sort), Ordering::Less);
    }

    #[test]
    fn test_sort_ties_break_on_row_key() {
        let a = row(1, vec![("code", FieldValue::from("ATC"))]);
        let b = row(2, vec![("code", FieldValue::from("ATC"))]);
        let sort = vec![SortDescriptor::asc("code")];
        assert_eq!(compare_rows(&a, &b, &sort), Ordering::Less);
        assert_eq!(compare_rows(&b, &a, &sort), Ordering::Greater);
    }
}
