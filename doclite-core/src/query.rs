// src/query.rs
// Query predicate semantics shared by find, update, delete and $match.

use std::cmp::Ordering;

use regex::RegexBuilder;
use serde_json::Value;

use crate::error::{DocLiteError, Result};

/// Operator keys understood inside a per-field condition object. A condition
/// object with none of these is not an operator object; it is compared to
/// the stored value by strict equality.
const FIELD_OPERATORS: [&str; 8] = [
    "$regex", "$options", "$gt", "$lt", "$gte", "$lte", "$in", "$eq",
];

/// Check whether a document satisfies a query object.
///
/// Root-level `$or` / `$and` take arrays of sub-queries, short-circuit, and
/// combine with any sibling field conditions via logical AND. A query with
/// zero keys matches everything.
pub fn matches_query(doc: &Value, query: &Value) -> Result<bool> {
    let conditions = query
        .as_object()
        .ok_or_else(|| DocLiteError::InvalidQuery("query must be an object".into()))?;

    for (key, condition) in conditions {
        let matched = match key.as_str() {
            "$or" => {
                let branches = sub_queries(key, condition)?;
                let mut any = false;
                for branch in branches {
                    if matches_query(doc, branch)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$and" => {
                let branches = sub_queries(key, condition)?;
                let mut all = true;
                for branch in branches {
                    if !matches_query(doc, branch)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            field => field_matches(doc.get(field), condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn sub_queries<'a>(op: &str, value: &'a Value) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| DocLiteError::InvalidQuery(format!("{} requires an array", op)))
}

/// Evaluate one field condition against the stored value (if any).
fn field_matches(value: Option<&Value>, condition: &Value) -> Result<bool> {
    if let Some(ops) = condition.as_object() {
        let recognized = ops.keys().any(|k| FIELD_OPERATORS.contains(&k.as_str()));
        if recognized {
            return operator_matches(value, ops);
        }
        // Unrecognized operator object: strict equality against the whole value.
    }

    Ok(value == Some(condition))
}

fn operator_matches(value: Option<&Value>, ops: &serde_json::Map<String, Value>) -> Result<bool> {
    for (op, target) in ops {
        let matched = match op.as_str() {
            "$options" => true, // consumed by $regex
            "$regex" => regex_matches(value, target, ops.get("$options"))?,
            "$eq" => value == Some(target),
            "$gt" => compare(value, target) == Some(Ordering::Greater),
            "$gte" => matches!(
                compare(value, target),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            "$lt" => compare(value, target) == Some(Ordering::Less),
            "$lte" => matches!(compare(value, target), Some(Ordering::Less | Ordering::Equal)),
            "$in" => {
                let candidates = target.as_array().ok_or_else(|| {
                    DocLiteError::InvalidQuery("$in requires an array".into())
                })?;
                value.map_or(false, |v| candidates.contains(v))
            }
            // Only reachable when mixed with recognized operators; treat the
            // unknown key as a non-match rather than guessing.
            _ => false,
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn regex_matches(value: Option<&Value>, pattern: &Value, options: Option<&Value>) -> Result<bool> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| DocLiteError::InvalidQuery("$regex requires a string".into()))?;

    let case_insensitive = options
        .and_then(Value::as_str)
        .map_or(false, |o| o.contains('i'));

    let regex = RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| DocLiteError::InvalidQuery(format!("invalid $regex: {}", e)))?;

    Ok(value
        .and_then(Value::as_str)
        .map_or(false, |s| regex.is_match(s)))
}

/// Compare a stored value against a query operand. Numbers compare
/// numerically, strings lexicographically, booleans by value; anything else
/// falls back to comparing serialized forms so ordering stays total.
fn compare(value: Option<&Value>, target: &Value) -> Option<Ordering> {
    let value = value?;
    match (value, target) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64()?;
            let b = b.as_f64()?;
            a.partial_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (a, b) => Some(a.to_string().cmp(&b.to_string())),
    }
}
