//! Artifact writing and the shared run index.
//!
//! The aggregator is the single owner of the run directory: workers hand it
//! finished records and artifact contents, and it serializes everything to
//! disk. Files are written to a temporary sibling and renamed into place so
//! a concurrent reader never observes a partially-written document, and the
//! index is updated under a single async lock so concurrent remote workers
//! never interleave their merges.

use bench_core::{BackendMode, BenchError, BenchResult, ModelRecord, RunIndex};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Filename of the run-level index document.
pub const INDEX_FILE: &str = "index.json";

/// Longest sanitized file stem; model identifiers can be arbitrarily long.
const MAX_STEM_LEN: usize = 200;

/// Owner of the run directory and the run-level index.
#[derive(Debug)]
pub struct Aggregator {
    out_dir: PathBuf,
    index_path: PathBuf,
    index: Mutex<RunIndex>,
}

impl Aggregator {
    /// Create the run directory (if needed) and write an empty index.
    pub fn new(out_dir: impl Into<PathBuf>, backend: BackendMode) -> BenchResult<Self> {
        let out_dir = out_dir.into();
        std::fs::create_dir_all(&out_dir).map_err(|e| BenchError::artifact_write(&out_dir, e))?;

        let index = RunIndex::new(backend);
        let index_path = out_dir.join(INDEX_FILE);
        write_json_atomic(&index_path, &index)?;

        info!(out_dir = %out_dir.display(), "run directory initialized");
        Ok(Self {
            out_dir,
            index_path,
            index: Mutex::new(index),
        })
    }

    /// The run's output directory.
    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Sanitize a model identifier into a file stem: anything outside
    /// `[A-Za-z0-9_.-]` becomes `_`, length-capped.
    pub fn safe_file_stem(model_id: &str) -> String {
        model_id
            .chars()
            .take(MAX_STEM_LEN)
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Path of an artifact for the given stem and extension.
    pub fn artifact_path(&self, stem: &str, suffix: &str) -> PathBuf {
        self.out_dir.join(format!("{stem}{suffix}"))
    }

    /// Whether a record JSON for this model already exists (used by remote
    /// re-runs to skip finished work).
    pub fn record_exists(&self, model_id: &str) -> bool {
        self.artifact_path(&Self::safe_file_stem(model_id), ".json").exists()
    }

    /// Atomically write a text artifact.
    pub fn write_text_artifact(&self, path: &Path, contents: &str) -> BenchResult<()> {
        write_atomic(path, contents.as_bytes())
    }

    /// Commit a finished record: write its JSON artifact atomically, then
    /// append it to the index and rewrite the index atomically. Index
    /// updates from concurrent workers are mutually exclusive.
    pub async fn commit(&self, mut record: ModelRecord) -> BenchResult<()> {
        let stem = Self::safe_file_stem(&record.model_id);
        let record_path = self.artifact_path(&stem, ".json");
        record.artifacts.record = Some(record_path.clone());

        write_json_atomic(&record_path, &record)?;
        debug!(model = %record.model_id, path = %record_path.display(), "record written");

        let mut index = self.index.lock().await;
        index.records.push(record);
        write_json_atomic(&self.index_path, &*index)?;
        Ok(())
    }

    /// Number of records committed so far.
    pub async fn committed(&self) -> usize {
        self.index.lock().await.records.len()
    }
}

/// Serialize to pretty JSON and write atomically.
fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> BenchResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_atomic(path, json.as_bytes())
}

/// Write to a temporary sibling, then rename into place. A reader of `path`
/// sees either the previous contents or the new ones, never a mix.
fn write_atomic(path: &Path, bytes: &[u8]) -> BenchResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, bytes).map_err(|e| BenchError::artifact_write(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| BenchError::artifact_write(path, e))?;
    Ok(())
}
