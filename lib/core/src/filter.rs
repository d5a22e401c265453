//! Metadata filter expressions.
//!
//! Filters arrive as JSON text, are parsed once per query or delete call,
//! and are evaluated against each record's metadata. The syntax follows
//! the familiar document-query shape:
//!
//! ```json
//! {"category": "books"}
//! {"price": {"$gte": 10, "$lt": 50}}
//! {"$or": [{"tag": {"$in": ["a", "b"]}}, {"archived": {"$exists": false}}]}
//! ```
//!
//! Multiple top-level fields conjoin. [`FilterExpr::to_json`] serializes an
//! expression back into the same syntax.

use serde_json::{json, Value};
use tracing::warn;

use crate::error::{Error, Result};

/// A parsed, reusable filter predicate over record metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    Gt { field: String, value: f64 },
    Gte { field: String, value: f64 },
    Lt { field: String, value: f64 },
    Lte { field: String, value: f64 },
    In { field: String, values: Vec<Value> },
    Nin { field: String, values: Vec<Value> },
    Exists { field: String, expected: bool },
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
}

impl FilterExpr {
    /// Parse a filter from JSON text.
    pub fn parse(json_filter: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(json_filter)
            .map_err(|e| Error::InvalidFilter(format!("malformed JSON: {e}")))?;
        Self::from_value(&root)
    }

    /// Parse a filter from an already-decoded JSON value.
    pub fn from_value(root: &Value) -> Result<Self> {
        let obj = root
            .as_object()
            .ok_or_else(|| Error::InvalidFilter("filter must be a JSON object".to_string()))?;

        let mut clauses = Vec::with_capacity(obj.len());
        for (key, value) in obj {
            clauses.push(Self::parse_clause(key, value)?);
        }

        Ok(match clauses.len() {
            // An empty filter matches every record.
            0 => FilterExpr::And(Vec::new()),
            1 => clauses.pop().expect("len checked"),
            _ => FilterExpr::And(clauses),
        })
    }

    fn parse_clause(key: &str, value: &Value) -> Result<Self> {
        match key {
            "$and" | "$or" => {
                let items = value.as_array().ok_or_else(|| {
                    Error::InvalidFilter(format!("{key} expects an array of filter objects"))
                })?;
                let mut parsed = Vec::with_capacity(items.len());
                for item in items {
                    parsed.push(Self::from_value(item)?);
                }
                Ok(if key == "$and" {
                    FilterExpr::And(parsed)
                } else {
                    FilterExpr::Or(parsed)
                })
            }
            "$not" => Ok(FilterExpr::Not(Box::new(Self::from_value(value)?))),
            op if op.starts_with('$') => {
                Err(Error::InvalidFilter(format!("unsupported operator: {op}")))
            }
            field => Self::parse_field(field, value),
        }
    }

    fn parse_field(field: &str, value: &Value) -> Result<Self> {
        let ops = match value.as_object() {
            Some(obj) if obj.keys().any(|k| k.starts_with('$')) => obj,
            // Plain value (object included): shorthand equality.
            _ => {
                return Ok(FilterExpr::Eq {
                    field: field.to_string(),
                    value: value.clone(),
                })
            }
        };

        let mut clauses = Vec::with_capacity(ops.len());
        for (op, operand) in ops {
            clauses.push(Self::parse_operator(field, op, operand)?);
        }

        Ok(match clauses.len() {
            0 => unreachable!("operator object has at least one key"),
            1 => clauses.pop().expect("len checked"),
            _ => FilterExpr::And(clauses),
        })
    }

    fn numeric_operand(op: &str, operand: &Value) -> Result<f64> {
        operand
            .as_f64()
            .ok_or_else(|| Error::InvalidFilter(format!("{op} expects a number")))
    }

    fn parse_operator(field: &str, op: &str, operand: &Value) -> Result<Self> {
        let field = field.to_string();
        match op {
            "$eq" => Ok(FilterExpr::Eq {
                field,
                value: operand.clone(),
            }),
            "$ne" => Ok(FilterExpr::Ne {
                field,
                value: operand.clone(),
            }),
            "$gt" => Ok(FilterExpr::Gt {
                field,
                value: Self::numeric_operand(op, operand)?,
            }),
            "$gte" => Ok(FilterExpr::Gte {
                field,
                value: Self::numeric_operand(op, operand)?,
            }),
            "$lt" => Ok(FilterExpr::Lt {
                field,
                value: Self::numeric_operand(op, operand)?,
            }),
            "$lte" => Ok(FilterExpr::Lte {
                field,
                value: Self::numeric_operand(op, operand)?,
            }),
            "$in" | "$nin" => {
                let values = operand
                    .as_array()
                    .ok_or_else(|| Error::InvalidFilter(format!("{op} expects an array")))?
                    .clone();
                Ok(if op == "$in" {
                    FilterExpr::In { field, values }
                } else {
                    FilterExpr::Nin { field, values }
                })
            }
            "$exists" => {
                let expected = operand
                    .as_bool()
                    .ok_or_else(|| Error::InvalidFilter("$exists expects a boolean".to_string()))?;
                Ok(FilterExpr::Exists { field, expected })
            }
            other => Err(Error::InvalidFilter(format!(
                "unsupported operator: {other}"
            ))),
        }
    }

    /// Evaluate the predicate against parsed metadata.
    ///
    /// Comparison and membership operators require the field to be
    /// present; only `{"$exists": false}` matches a missing field.
    pub fn matches(&self, metadata: &Value) -> bool {
        match self {
            FilterExpr::Eq { field, value } => {
                lookup(metadata, field).map_or(false, |v| value_eq(v, value))
            }
            FilterExpr::Ne { field, value } => {
                lookup(metadata, field).map_or(false, |v| !value_eq(v, value))
            }
            FilterExpr::Gt { field, value } => compare_numeric(metadata, field, |v| v > *value),
            FilterExpr::Gte { field, value } => compare_numeric(metadata, field, |v| v >= *value),
            FilterExpr::Lt { field, value } => compare_numeric(metadata, field, |v| v < *value),
            FilterExpr::Lte { field, value } => compare_numeric(metadata, field, |v| v <= *value),
            FilterExpr::In { field, values } => lookup(metadata, field)
                .map_or(false, |v| values.iter().any(|c| value_eq(v, c))),
            FilterExpr::Nin { field, values } => lookup(metadata, field)
                .map_or(false, |v| !values.iter().any(|c| value_eq(v, c))),
            FilterExpr::Exists { field, expected } => lookup(metadata, field).is_some() == *expected,
            FilterExpr::And(clauses) => clauses.iter().all(|c| c.matches(metadata)),
            FilterExpr::Or(clauses) => clauses.iter().any(|c| c.matches(metadata)),
            FilterExpr::Not(inner) => !inner.matches(metadata),
        }
    }

    /// Evaluate against raw metadata bytes.
    ///
    /// A record whose metadata fails to parse is treated as non-matching;
    /// one bad entry must not abort a whole query or delete scan.
    pub fn matches_bytes(&self, metadata: &[u8]) -> bool {
        match serde_json::from_slice::<Value>(metadata) {
            Ok(value) => self.matches(&value),
            Err(e) => {
                warn!("skipping record with unparsable metadata: {e}");
                false
            }
        }
    }

    /// Serialize back into the JSON filter syntax this expression was
    /// parsed from.
    pub fn to_json(&self) -> Value {
        match self {
            FilterExpr::Eq { field, value } => json!({ (field.as_str()): value }),
            FilterExpr::Ne { field, value } => json!({ (field.as_str()): { "$ne": value } }),
            FilterExpr::Gt { field, value } => json!({ (field.as_str()): { "$gt": value } }),
            FilterExpr::Gte { field, value } => json!({ (field.as_str()): { "$gte": value } }),
            FilterExpr::Lt { field, value } => json!({ (field.as_str()): { "$lt": value } }),
            FilterExpr::Lte { field, value } => json!({ (field.as_str()): { "$lte": value } }),
            FilterExpr::In { field, values } => json!({ (field.as_str()): { "$in": values } }),
            FilterExpr::Nin { field, values } => json!({ (field.as_str()): { "$nin": values } }),
            FilterExpr::Exists { field, expected } => {
                json!({ (field.as_str()): { "$exists": expected } })
            }
            FilterExpr::And(clauses) => {
                json!({ "$and": clauses.iter().map(FilterExpr::to_json).collect::<Vec<_>>() })
            }
            FilterExpr::Or(clauses) => {
                json!({ "$or": clauses.iter().map(FilterExpr::to_json).collect::<Vec<_>>() })
            }
            FilterExpr::Not(inner) => json!({ "$not": inner.to_json() }),
        }
    }
}

/// Resolve a possibly dotted field path ("a.b.c") inside a metadata object.
fn lookup<'a>(metadata: &'a Value, field: &str) -> Option<&'a Value> {
    let mut current = metadata;
    for part in field.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn compare_numeric(metadata: &Value, field: &str, cmp: impl Fn(f64) -> bool) -> bool {
    lookup(metadata, field)
        .and_then(Value::as_f64)
        .map_or(false, cmp)
}

/// Equality with numeric coercion: 1 and 1.0 compare equal.
fn value_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(s: &str) -> Value {
        serde_json::from_str(s).unwrap()
    }

    #[test]
    fn test_shorthand_equality() {
        let f = FilterExpr::parse(r#"{"tag": "a"}"#).unwrap();
        assert!(f.matches(&meta(r#"{"tag": "a"}"#)));
        assert!(!f.matches(&meta(r#"{"tag": "b"}"#)));
        assert!(!f.matches(&meta(r#"{}"#)));
    }

    #[test]
    fn test_numeric_comparisons() {
        let f = FilterExpr::parse(r#"{"price": {"$gte": 10, "$lt": 50}}"#).unwrap();
        assert!(f.matches(&meta(r#"{"price": 10}"#)));
        assert!(f.matches(&meta(r#"{"price": 49.9}"#)));
        assert!(!f.matches(&meta(r#"{"price": 50}"#)));
        assert!(!f.matches(&meta(r#"{"price": "10"}"#)));
        assert!(!f.matches(&meta(r#"{}"#)));
    }

    #[test]
    fn test_numeric_equality_coercion() {
        let f = FilterExpr::parse(r#"{"n": 1}"#).unwrap();
        assert!(f.matches(&meta(r#"{"n": 1.0}"#)));
    }

    #[test]
    fn test_membership() {
        let f = FilterExpr::parse(r#"{"tag": {"$in": ["a", "b"]}}"#).unwrap();
        assert!(f.matches(&meta(r#"{"tag": "b"}"#)));
        assert!(!f.matches(&meta(r#"{"tag": "c"}"#)));

        let f = FilterExpr::parse(r#"{"tag": {"$nin": ["a", "b"]}}"#).unwrap();
        assert!(f.matches(&meta(r#"{"tag": "c"}"#)));
        // A missing field is not a member of the complement either.
        assert!(!f.matches(&meta(r#"{}"#)));
    }

    #[test]
    fn test_exists() {
        let f = FilterExpr::parse(r#"{"tag": {"$exists": true}}"#).unwrap();
        assert!(f.matches(&meta(r#"{"tag": null}"#)));
        assert!(!f.matches(&meta(r#"{}"#)));

        let f = FilterExpr::parse(r#"{"tag": {"$exists": false}}"#).unwrap();
        assert!(f.matches(&meta(r#"{}"#)));
    }

    #[test]
    fn test_logical_combinators() {
        let f = FilterExpr::parse(
            r#"{"$or": [{"tag": "a"}, {"$and": [{"n": {"$gt": 5}}, {"tag": "b"}]}]}"#,
        )
        .unwrap();
        assert!(f.matches(&meta(r#"{"tag": "a", "n": 0}"#)));
        assert!(f.matches(&meta(r#"{"tag": "b", "n": 6}"#)));
        assert!(!f.matches(&meta(r#"{"tag": "b", "n": 5}"#)));

        let f = FilterExpr::parse(r#"{"$not": {"tag": "a"}}"#).unwrap();
        assert!(!f.matches(&meta(r#"{"tag": "a"}"#)));
        assert!(f.matches(&meta(r#"{"tag": "b"}"#)));
    }

    #[test]
    fn test_implicit_and_over_fields() {
        let f = FilterExpr::parse(r#"{"tag": "a", "n": {"$gt": 1}}"#).unwrap();
        assert!(f.matches(&meta(r#"{"tag": "a", "n": 2}"#)));
        assert!(!f.matches(&meta(r#"{"tag": "a", "n": 1}"#)));
    }

    #[test]
    fn test_dotted_paths() {
        let f = FilterExpr::parse(r#"{"user.name": "ada"}"#).unwrap();
        assert!(f.matches(&meta(r#"{"user": {"name": "ada"}}"#)));
        assert!(!f.matches(&meta(r#"{"user": {}}"#)));
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let f = FilterExpr::parse("{}").unwrap();
        assert!(f.matches(&meta(r#"{"anything": 1}"#)));
    }

    #[test]
    fn test_invalid_filters() {
        assert!(matches!(
            FilterExpr::parse("not json"),
            Err(Error::InvalidFilter(_))
        ));
        assert!(matches!(
            FilterExpr::parse(r#"[1, 2]"#),
            Err(Error::InvalidFilter(_))
        ));
        assert!(matches!(
            FilterExpr::parse(r#"{"tag": {"$regex": "a.*"}}"#),
            Err(Error::InvalidFilter(_))
        ));
        assert!(matches!(
            FilterExpr::parse(r#"{"$bogus": 1}"#),
            Err(Error::InvalidFilter(_))
        ));
        assert!(matches!(
            FilterExpr::parse(r#"{"n": {"$gt": "high"}}"#),
            Err(Error::InvalidFilter(_))
        ));
        assert!(matches!(
            FilterExpr::parse(r#"{"tag": {"$in": "a"}}"#),
            Err(Error::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_unparsable_metadata_is_non_matching() {
        let f = FilterExpr::parse(r#"{"tag": "a"}"#).unwrap();
        assert!(!f.matches_bytes(b"{broken"));
        assert!(f.matches_bytes(br#"{"tag": "a"}"#));
    }

    #[test]
    fn test_round_trip_through_json_syntax() {
        let sources = [
            r#"{"tag": "a"}"#,
            r#"{"price": {"$gte": 10, "$lt": 50}}"#,
            r#"{"tag": {"$in": ["a", "b"]}}"#,
            r#"{"$or": [{"tag": "a"}, {"n": {"$ne": 3}}]}"#,
            r#"{"$not": {"archived": {"$exists": true}}}"#,
        ];
        for src in sources {
            let parsed = FilterExpr::parse(src).unwrap();
            let emitted = parsed.to_json().to_string();
            let reparsed = FilterExpr::parse(&emitted).unwrap();
            assert_eq!(parsed, reparsed, "round trip failed for {src}");
        }
    }
}
