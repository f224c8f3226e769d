// src/reader.rs
// Query execution: cache lookup, candidate-file selection, bulk load,
// predicate filter, then sort / pagination / count / projection.

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::collection::Collection;
use crate::document::DOCUMENT_ID_FIELD;
use crate::error::{DocLiteError, Result};
use crate::find_options::{apply_limit_skip, apply_projection, apply_sort};
use crate::searcher;

/// Result of an executed find: the shaped documents plus the pre-pagination
/// matched count when requested.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub documents: Vec<Value>,
    /// Full matched-set length before `skip`/`limit`, when counting.
    pub total_documents: Option<usize>,
}

/// Builder over a base query. Construct with [`Collection::find`].
pub struct FindBuilder<'a> {
    collection: &'a Collection,
    query: Value,
    limit: Option<usize>,
    skip: Option<usize>,
    sort: Option<(String, i32)>,
    count: bool,
    find_one: bool,
    projection: Option<Value>,
}

impl<'a> FindBuilder<'a> {
    pub(crate) fn new(collection: &'a Collection, query: Value) -> Self {
        FindBuilder {
            collection,
            query,
            limit: None,
            skip: None,
            sort: None,
            count: false,
            find_one: false,
            projection: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Sort by one field; direction 1 is ascending, -1 descending.
    pub fn with_sort(mut self, field: &str, direction: i32) -> Self {
        self.sort = Some((field.to_string(), direction));
        self
    }

    /// Attach the pre-pagination matched count to the result.
    pub fn with_count(mut self, count: bool) -> Self {
        self.count = count;
        self
    }

    /// Return only the first matching document; an empty match set becomes a
    /// not-found error.
    pub fn find_one(mut self, find_one: bool) -> Self {
        self.find_one = find_one;
        self
    }

    /// Projection object: `{field: 1, ...}` or `{field: 0, ...}`.
    pub fn with_projection(mut self, projection: Value) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn exec(&self) -> Result<QueryResult> {
        let collection = self.collection;
        let _guard = collection.read_guard();

        let conditions = self
            .query
            .as_object()
            .ok_or_else(|| DocLiteError::InvalidQuery("query must be an object".into()))?;

        let cache_key = serde_json::to_string(&self.query)?;

        let mut matched = match collection.cache().get(&cache_key) {
            Some(cached) => {
                trace!(key = %cache_key, "query cache hit");
                cached
            }
            None => self.execute_miss(conditions, &cache_key)?,
        };

        if let Some((field, direction)) = &self.sort {
            apply_sort(&mut matched, field, *direction);
        }

        if self.find_one {
            let Some(first) = matched.into_iter().next() else {
                return Err(DocLiteError::DocumentNotFound(
                    "no documents found for the query".into(),
                ));
            };
            return Ok(QueryResult {
                documents: vec![self.project(first)?],
                total_documents: None,
            });
        }

        let total = matched.len();
        let page = apply_limit_skip(matched, self.limit, self.skip);

        let mut documents = Vec::with_capacity(page.len());
        for doc in page {
            documents.push(self.project(doc)?);
        }

        Ok(QueryResult {
            documents,
            total_documents: self.count.then_some(total),
        })
    }

    /// Cache miss: select candidate files, bulk-load, filter, and cache the
    /// matched set when the selection allows it.
    fn execute_miss(&self, conditions: &Map<String, Value>, cache_key: &str) -> Result<Vec<Value>> {
        let collection = self.collection;

        // documentId fast path: read exactly the named file(s), bypassing
        // both the directory scan and the cache write.
        if let Some(ids) = document_id_targets(conditions) {
            debug!(ids = ids.len(), "documentId fast path");
            let loaded = collection.load_by_ids(&ids)?;
            let docs = loaded.into_iter().map(|(_, doc)| doc).collect();
            return searcher::find(docs, &self.query, self.find_one, collection.workers());
        }

        let loaded = collection.load_candidates(&self.query)?;
        let docs: Vec<Value> = loaded.into_iter().map(|(_, doc)| doc).collect();

        if conditions.is_empty() {
            return Ok(docs);
        }

        let matched = searcher::find(docs, &self.query, self.find_one, collection.workers())?;

        // A find_one scan stops at the first hit, so its match set is
        // partial and must not be cached.
        if !self.find_one {
            collection.cache().put(cache_key.to_string(), matched.clone());
        }

        Ok(matched)
    }

    fn project(&self, doc: Value) -> Result<Value> {
        let Some(projection) = &self.projection else {
            return Ok(doc);
        };
        let fields = projection.as_object().ok_or_else(|| {
            DocLiteError::InvalidProjection("projection must be an object".into())
        })?;
        apply_projection(&doc, fields)
    }
}

/// Extract the documentId fast-path targets: a scalar id or an array of ids.
pub(crate) fn document_id_targets(conditions: &Map<String, Value>) -> Option<Vec<String>> {
    match conditions.get(DOCUMENT_ID_FIELD)? {
        Value::String(id) => Some(vec![id.clone()]),
        Value::Array(ids) => {
            let mut targets = Vec::with_capacity(ids.len());
            for id in ids {
                targets.push(id.as_str()?.to_string());
            }
            Some(targets)
        }
        _ => None,
    }
}
