// src/searcher.rs
// Predicate matching strategy: linear scan with early exit for small sets or
// single-document lookups, chunked parallel evaluation for larger sets.

use serde_json::Value;

use crate::error::{DocLiteError, Result};
use crate::query::matches_query;
use crate::workers::{run_chunked, WorkerConfig};

/// Filter documents by a query. Sets at or below the configured threshold
/// (or `find_one` requests) scan linearly; larger sets are partitioned into
/// `min(max_workers, ceil(n / threshold))` contiguous chunks evaluated on
/// the worker pool. Result order across chunks follows chunk order, not a
/// global guarantee.
pub fn find(
    docs: Vec<Value>,
    query: &Value,
    find_one: bool,
    config: &WorkerConfig,
) -> Result<Vec<Value>> {
    filter_items(docs, query, find_one, config, |doc| doc)
}

/// Same strategy over `(file_name, document)` pairs, used by update and
/// delete to keep track of the originating file.
pub fn find_tagged(
    docs: Vec<(String, Value)>,
    query: &Value,
    config: &WorkerConfig,
) -> Result<Vec<(String, Value)>> {
    filter_items(docs, query, false, config, |pair| &pair.1)
}

fn filter_items<T, A>(
    items: Vec<T>,
    query: &Value,
    find_one: bool,
    config: &WorkerConfig,
    value_of: A,
) -> Result<Vec<T>>
where
    T: Clone + Send + Sync,
    A: Fn(&T) -> &Value + Sync,
{
    if query.as_object().map_or(false, |q| q.is_empty()) {
        return Ok(items);
    }

    if find_one {
        for item in items {
            if matches_query(value_of(&item), query)? {
                return Ok(vec![item]);
            }
        }
        return Ok(Vec::new());
    }

    if items.len() <= config.parallel_threshold {
        let mut matched = Vec::new();
        for item in items {
            if matches_query(value_of(&item), query)? {
                matched.push(item);
            }
        }
        return Ok(matched);
    }

    let chunks = config
        .max_workers
        .min(items.len().div_ceil(config.parallel_threshold))
        .max(1);

    let partials = run_chunked(&items, chunks, |chunk| {
        let mut matched = Vec::new();
        for item in chunk {
            if matches_query(value_of(item), query)? {
                matched.push(item.clone());
            }
        }
        Ok::<Vec<T>, DocLiteError>(matched)
    })?;

    let mut matched = Vec::new();
    for partial in partials {
        matched.extend(partial?);
    }
    Ok(matched)
}
