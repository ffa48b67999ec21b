//! Query request/result types shared by the executor, the tool layer,
//! and the public query endpoint.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// A bindable parameter value: string, number, boolean, or null.
///
/// Objects and arrays are rejected at deserialization time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        use serde_json::Value;
        Ok(match value {
            Value::Null => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Scalar::Int(i),
                // u64 beyond i64::MAX, or a fractional number.
                None => Scalar::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Scalar::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => {
                return Err(Error::Validation(format!(
                    "parameter values must be scalar (string, number, boolean, null), got {value}"
                )))
            }
        })
    }

    /// Short type label used in log lines and error messages.
    pub fn type_label(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Bool(_) => "boolean",
            Scalar::Int(_) => "integer",
            Scalar::Float(_) => "number",
            Scalar::Text(_) => "string",
        }
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Scalar::from_json(&value).map_err(serde::de::Error::custom)
    }
}

/// Parameters for one statement.
///
/// `Named` goes with `:identifier` placeholders and is resolved by name
/// at bind time. `Positional` goes with `$n` markers and is bound as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParams {
    Positional(Vec<Scalar>),
    Named(BTreeMap<String, Scalar>),
}

impl Default for QueryParams {
    fn default() -> Self {
        QueryParams::Named(BTreeMap::new())
    }
}

impl QueryParams {
    pub fn len(&self) -> usize {
        match self {
            QueryParams::Positional(v) => v.len(),
            QueryParams::Named(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A statement plus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub statement: String,
    #[serde(default)]
    pub params: QueryParams,
}

impl QueryRequest {
    pub fn named(statement: impl Into<String>, params: BTreeMap<String, Scalar>) -> Self {
        Self {
            statement: statement.into(),
            params: QueryParams::Named(params),
        }
    }

    pub fn positional(statement: impl Into<String>, values: Vec<Scalar>) -> Self {
        Self {
            statement: statement.into(),
            params: QueryParams::Positional(values),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    /// Database type name, e.g. `uuid`, `timestamptz`, `varchar`.
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Rows produced by one statement. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    /// Rows the statement produced, before any truncation.
    pub row_count: usize,
    /// `rows` was cut short of `row_count`.
    #[serde(default)]
    pub truncated: bool,
}

impl QueryResult {
    /// Keep at most `max_rows` rows, marking the result truncated if any
    /// were dropped. `row_count` is left untouched.
    pub fn cap_rows(mut self, max_rows: usize) -> Self {
        if self.rows.len() > max_rows {
            self.rows.truncate(max_rows);
            self.truncated = true;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_rejects_objects_and_arrays() {
        assert!(Scalar::from_json(&json!({"a": 1})).is_err());
        assert!(Scalar::from_json(&json!([1, 2])).is_err());
        assert_eq!(Scalar::from_json(&json!(7)).unwrap(), Scalar::Int(7));
        assert_eq!(Scalar::from_json(&json!(1.5)).unwrap(), Scalar::Float(1.5));
        assert_eq!(Scalar::from_json(&json!(null)).unwrap(), Scalar::Null);
    }

    #[test]
    fn params_deserialize_named_or_positional() {
        let named: QueryParams = serde_json::from_value(json!({"status": "pending"})).unwrap();
        assert!(matches!(named, QueryParams::Named(ref m) if m["status"] == Scalar::Text("pending".into())));

        let positional: QueryParams = serde_json::from_value(json!(["pending", 3])).unwrap();
        assert_eq!(
            positional,
            QueryParams::Positional(vec![Scalar::Text("pending".into()), Scalar::Int(3)])
        );
    }

    #[test]
    fn params_with_nested_value_fail() {
        let res: std::result::Result<QueryParams, _> =
            serde_json::from_value(json!({"status": ["a", "b"]}));
        assert!(res.is_err());
    }

    #[test]
    fn cap_rows_marks_truncated() {
        let mut result = QueryResult::default();
        for i in 0..5 {
            let mut row = serde_json::Map::new();
            row.insert("n".into(), json!(i));
            result.rows.push(row);
        }
        result.row_count = 5;

        let capped = result.clone().cap_rows(3);
        assert_eq!(capped.rows.len(), 3);
        assert_eq!(capped.row_count, 5);
        assert!(capped.truncated);

        let untouched = result.cap_rows(10);
        assert!(!untouched.truncated);
    }
}
