// src/find_options.rs
// Result shaping for find queries: projection, sort, limit, skip

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::document::DOCUMENT_ID_FIELD;
use crate::error::{DocLiteError, Result};

/// Projection mode derived from a validated projection object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionMode {
    Include,
    Exclude,
}

/// Validate a projection object: every value must be 0 or 1, and inclusion
/// and exclusion must not be mixed within one projection.
pub fn validate_projection(projection: &Map<String, Value>) -> Result<ProjectionMode> {
    let mut includes = false;
    let mut excludes = false;

    for (field, value) in projection {
        match value.as_i64() {
            Some(1) => includes = true,
            Some(0) => excludes = true,
            _ => {
                return Err(DocLiteError::InvalidProjection(format!(
                    "projection value for '{}' must be 0 or 1",
                    field
                )))
            }
        }
    }

    if includes && excludes {
        return Err(DocLiteError::InvalidProjection(
            "cannot mix inclusion and exclusion in one projection".into(),
        ));
    }

    if excludes {
        Ok(ProjectionMode::Exclude)
    } else {
        Ok(ProjectionMode::Include)
    }
}

/// Apply a projection to a document. `documentId` is always preserved in
/// the output regardless of the projection.
pub fn apply_projection(doc: &Value, projection: &Map<String, Value>) -> Result<Value> {
    if projection.is_empty() {
        return Ok(doc.clone());
    }

    let mode = validate_projection(projection)?;

    let Some(obj) = doc.as_object() else {
        return Ok(doc.clone());
    };

    let mut result = Map::new();

    match mode {
        ProjectionMode::Include => {
            for field in projection.keys() {
                if let Some(value) = obj.get(field) {
                    result.insert(field.clone(), value.clone());
                }
            }
        }
        ProjectionMode::Exclude => {
            for (key, value) in obj {
                if projection.contains_key(key) && key != DOCUMENT_ID_FIELD {
                    continue;
                }
                result.insert(key.clone(), value.clone());
            }
        }
    }

    if let Some(id) = obj.get(DOCUMENT_ID_FIELD) {
        result.insert(DOCUMENT_ID_FIELD.to_string(), id.clone());
    }

    Ok(Value::Object(result))
}

/// Stable single-field sort. Numeric fields compare numerically, strings
/// lexicographically, everything else through a generic total order.
pub fn apply_sort(docs: &mut [Value], field: &str, direction: i32) {
    docs.sort_by(|a, b| {
        let cmp = compare_values(a.get(field), b.get(field));
        if direction < 0 {
            cmp.reverse()
        } else {
            cmp
        }
    });
}

/// Compare two optional field values for sorting. Missing sorts before any
/// present value.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,

        (Some(Value::Number(n1)), Some(Value::Number(n2))) => {
            let f1 = n1.as_f64().unwrap_or(0.0);
            let f2 = n2.as_f64().unwrap_or(0.0);
            f1.partial_cmp(&f2).unwrap_or(Ordering::Equal)
        }

        (Some(Value::String(s1)), Some(Value::String(s2))) => s1.cmp(s2),

        (Some(Value::Bool(b1)), Some(Value::Bool(b2))) => b1.cmp(b2),

        (Some(a), Some(b)) => a.to_string().cmp(&b.to_string()),
    }
}

/// Slice `[skip, skip + limit)` out of the matched set.
pub fn apply_limit_skip(docs: Vec<Value>, limit: Option<usize>, skip: Option<usize>) -> Vec<Value> {
    let start = skip.unwrap_or(0);

    if start >= docs.len() {
        return Vec::new();
    }

    let end = match limit {
        Some(limit) => (start + limit).min(docs.len()),
        None => docs.len(),
    };

    docs[start..end].to_vec()
}
