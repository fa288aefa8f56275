//! Query data handed to shard executors.
//!
//! Queries are plain values: no parsing, no scoring. Each shard executor
//! decides how to evaluate them against its own storage; `matches` is the
//! reference evaluation over JSON sources used by the in-memory engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A scalar value compared against a document field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    /// Compare against a JSON value. Integers and floats compare numerically.
    pub fn matches_json(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldValue::Null, Value::Null) => true,
            (FieldValue::Bool(b), Value::Bool(v)) => b == v,
            (FieldValue::Integer(i), Value::Number(n)) => n.as_f64() == Some(*i as f64),
            (FieldValue::Float(f), Value::Number(n)) => n.as_f64() == Some(*f),
            (FieldValue::Text(s), Value::String(v)) => s == v,
            _ => false,
        }
    }
}

/// A query against one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    /// Every document matches.
    MatchAll,
    /// Field equals the given value.
    Term { field: String, value: FieldValue },
    /// Numeric field within `[gte, lt)`; open bounds are `None`.
    Range {
        field: String,
        gte: Option<f64>,
        lt: Option<f64>,
    },
}

impl Query {
    pub fn match_all() -> Self {
        Query::MatchAll
    }

    pub fn term(field: impl Into<String>, value: FieldValue) -> Self {
        Query::Term {
            field: field.into(),
            value,
        }
    }

    pub fn range(field: impl Into<String>, gte: Option<f64>, lt: Option<f64>) -> Self {
        Query::Range {
            field: field.into(),
            gte,
            lt,
        }
    }

    /// Evaluate against a JSON source. Field names may be dotted paths.
    pub fn matches(&self, source: &Value) -> bool {
        match self {
            Query::MatchAll => true,
            Query::Term { field, value } => {
                lookup(source, field).is_some_and(|v| value.matches_json(v))
            }
            Query::Range { field, gte, lt } => {
                let Some(n) = lookup(source, field).and_then(Value::as_f64) else {
                    return false;
                };
                gte.map_or(true, |lo| n >= lo) && lt.map_or(true, |hi| n < hi)
            }
        }
    }
}

impl Default for Query {
    fn default() -> Self {
        Query::MatchAll
    }
}

fn lookup<'a>(source: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(source, |v, key| v.get(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_match_all() {
        assert!(Query::match_all().matches(&json!({})));
        assert!(Query::default().matches(&json!({ "field": 1 })));
    }

    #[test]
    fn test_term_query() {
        let q = Query::term("color", FieldValue::text("red"));
        assert!(q.matches(&json!({ "color": "red" })));
        assert!(!q.matches(&json!({ "color": "blue" })));
        assert!(!q.matches(&json!({ "shape": "red" })));
    }

    #[test]
    fn test_term_numeric_compares_by_value() {
        let q = Query::term("field", FieldValue::Integer(3));
        assert!(q.matches(&json!({ "field": 3 })));
        assert!(q.matches(&json!({ "field": 3.0 })));
        assert!(!q.matches(&json!({ "field": "3" })));
    }

    #[test]
    fn test_range_query_bounds() {
        let q = Query::range("field", Some(10.0), Some(20.0));
        assert!(q.matches(&json!({ "field": 10 })));
        assert!(q.matches(&json!({ "field": 19.5 })));
        assert!(!q.matches(&json!({ "field": 20 })));
        assert!(!q.matches(&json!({ "field": 9 })));

        let open = Query::range("field", None, Some(5.0));
        assert!(open.matches(&json!({ "field": -100 })));
    }

    #[test]
    fn test_dotted_path() {
        let q = Query::term("user.name", FieldValue::text("ann"));
        assert!(q.matches(&json!({ "user": { "name": "ann" } })));
        assert!(!q.matches(&json!({ "user": "ann" })));
    }

    #[test]
    fn test_query_json_shape() {
        let q = Query::term("field", FieldValue::Integer(1));
        let json = serde_json::to_value(&q).unwrap();
        assert_eq!(
            json,
            json!({ "term": { "field": "field", "value": { "integer": 1 } } })
        );
        assert_eq!(serde_json::to_value(Query::MatchAll).unwrap(), json!("match_all"));
    }
}
