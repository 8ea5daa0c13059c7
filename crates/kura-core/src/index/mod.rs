//! # Similarity Index
//!
//! Nearest-neighbour retrieval over description embeddings. Entries are
//! persisted in their own SQLite file as `(id, vector, description)` and
//! mirrored in memory, so queries never touch the disk.

mod vector;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{KuraError, Result};
use crate::types::AssetId;

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS embedding (
    id INTEGER PRIMARY KEY,
    dimension INTEGER NOT NULL,
    vector BLOB NOT NULL,
    description TEXT NOT NULL
);
";

/// A scored query result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
    pub id: AssetId,
    /// Similarity in `[0.0, 1.0]`, `1.0` meaning identical direction.
    pub score: f32,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    /// Unit-length embedding.
    vector: Vec<f32>,
    description: String,
}

/// Persistent embedding index keyed by asset id.
pub struct SimilarityIndex {
    conn: Mutex<Connection>,
    entries: RwLock<BTreeMap<AssetId, IndexEntry>>,
}

impl SimilarityIndex {
    /// Open or create the index at `path`, loading every entry into memory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(KuraError::index)?;
        }
        let conn = Connection::open(path).map_err(KuraError::index)?;
        let index = Self::from_connection(conn)?;
        info!(path = %path.display(), entries = index.len(), "similarity index opened");
        Ok(index)
    }

    /// Create an index that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(KuraError::index)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL).map_err(KuraError::index)?;

        let mut entries = BTreeMap::new();
        {
            let mut stmt = conn
                .prepare("SELECT id, dimension, vector, description FROM embedding")
                .map_err(KuraError::index)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, AssetId>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(KuraError::index)?;
            for row in rows {
                let (id, dimension, blob, description) = row.map_err(KuraError::index)?;
                let dimension = usize::try_from(dimension)
                    .map_err(|_| KuraError::IndexIo(format!("negative dimension for {id}")))?;
                let vector = vector::decode_blob(&blob, dimension)?;
                entries.insert(
                    id,
                    IndexEntry {
                        vector,
                        description,
                    },
                );
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
            entries: RwLock::new(entries),
        })
    }

    /// Store or replace the embedding and description for `id`.
    ///
    /// # Errors
    ///
    /// `Validation` for a degenerate vector or one whose dimension differs
    /// from the rest of the index, `IndexIo` on storage failure.
    pub fn upsert(&self, id: AssetId, embedding: &[f32], description: &str) -> Result<()> {
        vector::validate(embedding)?;
        let unit = vector::normalized(embedding);

        let conn = self.lock_conn()?;
        if let Some(dimension) = self.dimension_excluding(id)? {
            if dimension != unit.len() {
                return Err(KuraError::Validation(format!(
                    "embedding dimension {} does not match index dimension {dimension}",
                    unit.len()
                )));
            }
        }

        let dimension = i64::try_from(unit.len())
            .map_err(|_| KuraError::Validation("embedding too large".into()))?;
        conn.execute(
            "INSERT INTO embedding (id, dimension, vector, description) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                dimension = excluded.dimension,
                vector = excluded.vector,
                description = excluded.description",
            params![id, dimension, vector::encode_blob(&unit), description],
        )
        .map_err(KuraError::index)?;

        self.write_entries()?.insert(
            id,
            IndexEntry {
                vector: unit,
                description: description.to_string(),
            },
        );
        debug!(id, "index entry upserted");
        Ok(())
    }

    /// Up to `k` nearest entries, best first. Ties are broken by ascending id.
    ///
    /// # Errors
    ///
    /// `Validation` for a degenerate query, `IndexIo` when the query
    /// dimension differs from the stored embeddings (the index was built
    /// with another model and cannot be searched).
    pub fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<IndexHit>> {
        vector::validate(embedding)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let unit = vector::normalized(embedding);

        let entries = self.read_entries()?;
        if let Some((id, entry)) = entries.iter().find(|(_, e)| e.vector.len() != unit.len()) {
            return Err(KuraError::IndexIo(format!(
                "query dimension {} does not match index dimension {} (entry {id})",
                unit.len(),
                entry.vector.len()
            )));
        }
        let mut hits: Vec<IndexHit> = entries
            .iter()
            .map(|(&id, entry)| IndexHit {
                id,
                score: vector::score(&unit, &entry.vector),
            })
            .collect();
        drop(entries);

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Remove the entry for `id`. Returns whether one existed.
    pub fn delete(&self, id: AssetId) -> Result<bool> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM embedding WHERE id = ?1", params![id])
            .map_err(KuraError::index)?;
        Ok(self.write_entries()?.remove(&id).is_some())
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM embedding", [])
            .map_err(KuraError::index)?;
        let mut entries = self.write_entries()?;
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }

    /// Description stored alongside the embedding for `id`.
    pub fn description(&self, id: AssetId) -> Result<Option<String>> {
        Ok(self.read_entries()?.get(&id).map(|e| e.description.clone()))
    }

    /// Snapshot of every `(id, description)` pair, ordered by id.
    pub fn descriptions(&self) -> Result<Vec<(AssetId, String)>> {
        Ok(self
            .read_entries()?
            .iter()
            .map(|(&id, e)| (id, e.description.clone()))
            .collect())
    }

    pub fn contains(&self, id: AssetId) -> bool {
        self.read_entries().is_ok_and(|e| e.contains_key(&id))
    }

    pub fn len(&self) -> usize {
        self.read_entries().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimension_excluding(&self, id: AssetId) -> Result<Option<usize>> {
        Ok(self
            .read_entries()?
            .iter()
            .find(|(other, _)| **other != id)
            .map(|(_, e)| e.vector.len()))
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| KuraError::IndexIo("connection mutex poisoned".into()))
    }

    fn read_entries(&self) -> Result<RwLockReadGuard<'_, BTreeMap<AssetId, IndexEntry>>> {
        self.entries
            .read()
            .map_err(|_| KuraError::IndexIo("index entries poisoned".into()))
    }

    fn write_entries(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<AssetId, IndexEntry>>> {
        self.entries
            .write()
            .map_err(|_| KuraError::IndexIo("index entries poisoned".into()))
    }
}
