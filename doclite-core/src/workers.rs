// src/workers.rs
// Bounded worker pool for CPU-bound bulk work: file loading, decryption and
// large-set predicate matching. The shape is a plain map-reduce: partition
// the input into contiguous chunks, run one scoped worker per chunk, join
// them all and flatten.

use std::path::PathBuf;

use serde_json::Value;
use tracing::debug;

use crate::crypto::Codec;
use crate::error::{DocLiteError, Result};
use crate::storage;

/// Chunk and worker-count heuristics. The defaults keep small batches on the
/// calling thread and cap fan-out at the machine's core count.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Item count below which work stays on a single worker.
    pub parallel_threshold: usize,
    /// Upper bound on concurrent workers.
    pub max_workers: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            parallel_threshold: 100,
            max_workers: num_cpus::get().max(1),
        }
    }
}

/// Run `f` over contiguous chunks of `items` on up to `workers` scoped
/// threads, returning the per-chunk results in input order. The call joins
/// every dispatched worker before returning.
pub fn run_chunked<T, R, F>(items: &[T], workers: usize, f: F) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&[T]) -> R + Sync,
{
    let workers = workers.max(1);
    if workers == 1 || items.len() <= 1 {
        return Ok(vec![f(items)]);
    }

    let chunk_size = items.len().div_ceil(workers);
    debug!(items = items.len(), workers, chunk_size, "dispatching chunked work");

    let f = &f;
    crossbeam::thread::scope(|scope| {
        let handles: Vec<_> = items
            .chunks(chunk_size)
            .map(|chunk| scope.spawn(move |_| f(chunk)))
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| DocLiteError::Worker("worker thread panicked".into()))
            })
            .collect::<Result<Vec<R>>>()
    })
    .map_err(|_| DocLiteError::Worker("worker scope panicked".into()))?
}

/// Bulk-load document files, decrypting when a codec is supplied. Returns
/// `(file_name, document)` pairs. Small batches load on the calling thread;
/// larger ones fan out over `min(max_workers, file_count)` workers, each
/// taking a contiguous slice of the file list.
///
/// Files that disappear between listing and read are skipped: a scan races
/// concurrent deletes by design, and mutation paths re-read fresh listings.
pub fn load_documents(
    paths: &[PathBuf],
    codec: Option<&Codec>,
    config: &WorkerConfig,
) -> Result<Vec<(String, Value)>> {
    if paths.is_empty() {
        return Ok(Vec::new());
    }

    if paths.len() <= config.parallel_threshold {
        return load_slice(paths, codec);
    }

    let workers = config.max_workers.min(paths.len());
    let partials = run_chunked(paths, workers, |chunk| load_slice(chunk, codec))?;

    let mut documents = Vec::with_capacity(paths.len());
    for partial in partials {
        documents.extend(partial?);
    }
    Ok(documents)
}

fn load_slice(paths: &[PathBuf], codec: Option<&Codec>) -> Result<Vec<(String, Value)>> {
    let mut documents = Vec::with_capacity(paths.len());

    for path in paths {
        let raw = match storage::read_file(path) {
            Ok(raw) => raw,
            Err(DocLiteError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        let text = match codec {
            Some(codec) => codec.decrypt(&raw)?,
            None => raw,
        };

        let value: Value = serde_json::from_str(&text)?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        documents.push((file_name, value));
    }

    Ok(documents)
}
