//! Library and retrieval configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KuraError, Result};

/// Default number of nearest neighbours pulled from the similarity index.
pub const DEFAULT_TOP_K: usize = 5;
/// Default minimum similarity score for a candidate to reach arbitration.
pub const DEFAULT_THRESHOLD: f32 = 0.95;

/// Configuration for opening a [`LibraryManager`](crate::LibraryManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Directory holding the record store and index files.
    pub data_dir: PathBuf,
    /// Record store file name, relative to `data_dir`.
    pub records_file: String,
    /// Similarity index file name, relative to `data_dir`.
    pub index_file: String,
    /// Attempts made when SQLite reports the database as busy or locked.
    pub busy_retries: u32,
    /// Upper bound on a single embedding call, in milliseconds.
    pub embed_timeout_ms: u64,
    /// Re-embed missing index entries and drop orphans when opening.
    pub reconcile_on_open: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("media"),
            records_file: "library.db".into(),
            index_file: "index.db".into(),
            busy_retries: 4,
            embed_timeout_ms: 30_000,
            reconcile_on_open: true,
        }
    }
}

impl LibraryConfig {
    /// Create a configuration rooted at `data_dir` with default settings.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file. Missing keys take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| KuraError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| KuraError::Config(format!("{}: {e}", path.display())))
    }

    pub fn with_busy_retries(mut self, retries: u32) -> Self {
        self.busy_retries = retries.max(1);
        self
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_reconcile_on_open(mut self, enabled: bool) -> Self {
        self.reconcile_on_open = enabled;
        self
    }

    /// Full path of the record store database.
    pub fn records_path(&self) -> PathBuf {
        self.data_dir.join(&self.records_file)
    }

    /// Full path of the similarity index database.
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(&self.index_file)
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }
}

/// Tuning for the two-stage retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of nearest neighbours considered during coarse recall.
    pub top_k: usize,
    /// Candidates scoring below this never reach arbitration.
    pub threshold: f32,
    /// Upper bound on a single arbitration call, in milliseconds.
    pub arbitrate_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            threshold: DEFAULT_THRESHOLD,
            arbitrate_timeout_ms: 120_000,
        }
    }
}

impl RetrievalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the coarse recall size (at least 1).
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Set the similarity threshold, clamped to `[0.0, 1.0]`.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_arbitrate_timeout(mut self, timeout: Duration) -> Self {
        self.arbitrate_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn arbitrate_timeout(&self) -> Duration {
        Duration::from_millis(self.arbitrate_timeout_ms)
    }
}
