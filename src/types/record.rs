//! Typed-field records returned by resolvers.
//!
//! Records are field maps keyed by property name. A `BTreeMap` keeps
//! iteration deterministic, which the tests and audit summaries rely on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::schema::PropertyType;

/// A single data record: property name -> value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record(
    /// The underlying field map.
    pub BTreeMap<String, serde_json::Value>,
);

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, returning self for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Get a field value.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Get a field as a string, coercing scalars via their display form.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            v => Some(v.to_string()),
        }
    }

    /// Whether the record carries the field.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Field names in deterministic order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Restrict the record to the given projection.
    ///
    /// Fields not present in the record are silently skipped; an empty
    /// projection returns the record unchanged.
    pub fn project(&self, properties: &[String]) -> Record {
        if properties.is_empty() {
            return self.clone();
        }
        let mut out = BTreeMap::new();
        for prop in properties {
            if let Some(v) = self.0.get(prop) {
                out.insert(prop.clone(), v.clone());
            }
        }
        Record(out)
    }
}

impl FromIterator<(String, serde_json::Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, serde_json::Value)>>(iter: T) -> Self {
        Record(iter.into_iter().collect())
    }
}

/// Coerce a raw value toward the declared property type.
///
/// Best-effort at the resolver boundary: values that cannot be coerced are
/// returned unchanged rather than dropped, so callers never lose data to a
/// schema mismatch.
pub fn coerce_value(value: serde_json::Value, property_type: PropertyType) -> serde_json::Value {
    use serde_json::Value;

    match (property_type, &value) {
        (PropertyType::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(value),
        (PropertyType::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or(value),
        (PropertyType::Boolean, Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Value::Bool(true),
            "false" | "0" | "no" => Value::Bool(false),
            _ => value,
        },
        (PropertyType::String | PropertyType::Text, Value::Number(n)) => {
            Value::String(n.to_string())
        }
        _ => value,
    }
}

/// Coerce every field of a record toward its declared property type.
///
/// Fields without a declaration pass through untouched.
pub fn coerce_record(record: &Record, properties: &[super::schema::PropertyDef]) -> Record {
    if properties.is_empty() {
        return record.clone();
    }
    let mut out = BTreeMap::new();
    for (key, value) in &record.0 {
        let coerced = match properties.iter().find(|p| &p.name == key) {
            Some(prop) => coerce_value(value.clone(), prop.property_type),
            None => value.clone(),
        };
        out.insert(key.clone(), coerced);
    }
    Record(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_projection_skips_missing_fields() {
        let rec = Record::new().with("playerId", "P1").with("name", "A");
        let projected = rec.project(&["playerId".into(), "salary".into()]);
        assert_eq!(projected.len(), 1);
        assert!(projected.contains("playerId"));
    }

    #[test]
    fn test_empty_projection_is_identity() {
        let rec = Record::new().with("a", 1).with("b", 2);
        assert_eq!(rec.project(&[]), rec);
    }

    #[test]
    fn test_get_str_coerces_numbers() {
        let rec = Record::new().with("playerId", 8478463_i64);
        assert_eq!(rec.get_str("playerId").as_deref(), Some("8478463"));
    }

    #[test]
    fn test_coerce_integer_from_string() {
        assert_eq!(
            coerce_value(json!("42"), PropertyType::Integer),
            json!(42)
        );
        // Uncoercible values survive unchanged.
        assert_eq!(
            coerce_value(json!("not-a-number"), PropertyType::Integer),
            json!("not-a-number")
        );
    }

    #[test]
    fn test_coerce_boolean() {
        assert_eq!(coerce_value(json!("true"), PropertyType::Boolean), json!(true));
        assert_eq!(coerce_value(json!("0"), PropertyType::Boolean), json!(false));
    }

    #[test]
    fn test_coerce_record_by_declared_types() {
        use crate::types::schema::PropertyDef;

        let record = Record::new()
            .with("goals", "33")
            .with("active", "true")
            .with("undeclared", "7");
        let properties = vec![
            PropertyDef::new("goals", PropertyType::Integer),
            PropertyDef::new("active", PropertyType::Boolean),
        ];

        let coerced = coerce_record(&record, &properties);
        assert_eq!(coerced.get("goals"), Some(&json!(33)));
        assert_eq!(coerced.get("active"), Some(&json!(true)));
        assert_eq!(coerced.get("undeclared"), Some(&json!("7")));
    }
}
