//! Column → value sets exchanged between mappers and the store

use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value;
use std::collections::BTreeMap;

const FLOAT_EPSILON: f64 = 1e-9;

/// Field values of one record, keyed by column name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldValues(BTreeMap<&'static str, Value>);

impl FieldValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, column: &'static str, value: impl Into<Value>) -> &mut Self {
        self.0.insert(column, value.into());
        self
    }

    /// Builder form of [`set`](Self::set)
    pub fn with(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.0.insert(column, value.into());
        self
    }

    pub fn set_opt<V: Into<Value>>(&mut self, column: &'static str, value: Option<V>) -> &mut Self {
        self.0
            .insert(column, value.map(Into::into).unwrap_or(Value::Null));
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.0.get(column).and_then(Value::as_i64)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.0.get(column).and_then(Value::as_str)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.0.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Values that differ from `current` once both sides are resolved the
    /// way the store would persist them
    pub fn changed_from(&self, current: &FieldValues) -> FieldValues {
        let changed = self
            .0
            .iter()
            .filter(|(column, value)| match current.0.get(*column) {
                Some(existing) => !same_resolved(value, existing),
                None => true,
            })
            .map(|(column, value)| (*column, value.clone()))
            .collect();
        FieldValues(changed)
    }

    /// Merge another set into this one, later values win
    pub fn extend(&mut self, other: FieldValues) {
        self.0.extend(other.0);
    }
}

impl FromIterator<(&'static str, Value)> for FieldValues {
    fn from_iter<I: IntoIterator<Item = (&'static str, Value)>>(iter: I) -> Self {
        FieldValues(iter.into_iter().collect())
    }
}

#[derive(Debug, PartialEq)]
enum Resolved {
    Null,
    Number(f64),
    Text(String),
}

fn resolve(value: &Value) -> Resolved {
    match value {
        Value::Null => Resolved::Null,
        Value::Bool(b) => Resolved::Number(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => Resolved::Number(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => Resolved::Text(s.clone()),
        other => Resolved::Text(other.to_string()),
    }
}

/// Compare two values as the store resolves them
///
/// `true` and `1` are the same column value, so are `2` and `2.0`.
pub fn same_resolved(a: &Value, b: &Value) -> bool {
    match (resolve(a), resolve(b)) {
        (Resolved::Number(x), Resolved::Number(y)) => (x - y).abs() < FLOAT_EPSILON,
        (x, y) => x == y,
    }
}

/// Convert a JSON value into an SQLite parameter
pub fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Convert an SQLite column value into JSON
pub fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_changed_from_ignores_representation() {
        let current = FieldValues::new()
            .with("active", 1)
            .with("unit_amount", 2.0)
            .with("name", "Write docs")
            .with("user_id", Value::Null);

        let incoming = FieldValues::new()
            .with("active", true)
            .with("unit_amount", 2)
            .with("name", "Write docs")
            .with("user_id", Value::Null);

        assert!(incoming.changed_from(&current).is_empty());
    }

    #[test]
    fn test_changed_from_reports_real_changes() {
        let current = FieldValues::new().with("name", "Old").with("unit_amount", 0.5);
        let incoming = FieldValues::new()
            .with("name", "New")
            .with("unit_amount", 0.5)
            .with("stage", "Done");

        let changed = incoming.changed_from(&current);
        assert_eq!(changed.len(), 2);
        assert_eq!(changed.get_str("name"), Some("New"));
        assert_eq!(changed.get_str("stage"), Some("Done"));
    }

    #[test]
    fn test_null_differs_from_zero() {
        assert!(!same_resolved(&json!(null), &json!(0)));
        assert!(!same_resolved(&json!("1"), &json!(1)));
    }

    #[test]
    fn test_sql_conversion() {
        assert_eq!(to_sql(&json!(true)), SqlValue::Integer(1));
        assert_eq!(to_sql(&json!(1.5)), SqlValue::Real(1.5));
        assert_eq!(from_sql(ValueRef::Integer(7)), json!(7));
        assert_eq!(from_sql(ValueRef::Text(b"abc")), json!("abc"));
    }
}
