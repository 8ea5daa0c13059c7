//! # Library Manager
//!
//! The single writer of asset state. Owns the record store, the similarity
//! index and the lookup cache and applies every mutation to all three in a
//! fixed order:
//!
//! - create / update: record store, then index, then cache
//! - delete / clear: index, then cache, then record store
//!
//! A create or update that fails after touching the record store is undone
//! and reported as [`KuraError::PartialWrite`]. Writes to one id are
//! serialised; reads only wait on a write when they miss the cache.

mod import;
mod reconcile;

pub use import::{IMAGE_EXTENSIONS, MESH_EXTENSIONS};
pub use reconcile::ReconcileMode;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::cache::AssetCache;
use crate::config::LibraryConfig;
use crate::error::{KuraError, Result};
use crate::index::SimilarityIndex;
use crate::locks::KeyedLocks;
use crate::services::{self, Embedder};
use crate::store::{AssetStore, RetryPolicy};
use crate::types::{AssetId, AssetPatch, AssetRecord, NewAsset};

/// Owner of the three asset stores.
pub struct LibraryManager {
    store: AssetStore,
    index: SimilarityIndex,
    cache: AssetCache,
    embedder: Arc<dyn Embedder>,
    embed_timeout: Duration,
    writes: KeyedLocks<AssetId>,
}

impl LibraryManager {
    /// Assemble a manager from already opened stores. The cache starts
    /// empty; call [`warm_cache`](Self::warm_cache) to pre-load it.
    pub fn new(store: AssetStore, index: SimilarityIndex, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            index,
            cache: AssetCache::new(),
            embedder,
            embed_timeout: LibraryConfig::default().embed_timeout(),
            writes: KeyedLocks::new(),
        }
    }

    /// Bound every embedding call made by this manager.
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    /// Open the stores under `config.data_dir`, warm the cache and reconcile
    /// the index against the record store.
    pub async fn open(config: &LibraryConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let store = AssetStore::open_with_policy(
            config.records_path(),
            RetryPolicy::new(config.busy_retries),
        )?;
        let index = SimilarityIndex::open(config.index_path())?;
        let manager = Self::new(store, index, embedder).with_embed_timeout(config.embed_timeout());

        let cached = manager.warm_cache()?;
        let mode = if config.reconcile_on_open {
            ReconcileMode::Repair
        } else {
            ReconcileMode::Detect
        };
        let report = manager.reconcile(mode).await?;
        info!(assets = cached, %report, "library opened");
        Ok(manager)
    }

    /// Rebuild the cache from the record store. Returns the entry count.
    ///
    /// Meant for startup; a write racing the reload is only reflected once
    /// its own cache step runs.
    pub fn warm_cache(&self) -> Result<usize> {
        let records = self.store.list_all()?;
        let count = records.len();
        self.cache.load_all(records);
        Ok(count)
    }

    /// Create an asset in all three stores and return its id.
    ///
    /// # Errors
    ///
    /// - `Validation` for an empty or duplicate name (nothing written)
    /// - `RetrievalUnavailable` if embedding fails (nothing written)
    /// - `PartialWrite` if the index write failed after the record was
    ///   inserted; the record has been removed again
    /// - `NotFound` if a concurrent delete or clear removed the new record
    ///   before it was indexed; no index or cache entry is left behind
    pub async fn add_asset(&self, asset: NewAsset) -> Result<AssetId> {
        if asset.name.trim().is_empty() {
            return Err(KuraError::Validation("asset name is empty".into()));
        }

        let vector = self.embed(asset.semantic_text()).await?;
        let id = self.store.insert(&asset)?;
        let _guard = self.writes.lock(id).await;

        // A delete or clear may have run between the insert and the lock.
        if self.store.get(id)?.is_none() {
            warn!(id, "record removed before indexing, abandoning insert");
            return Err(KuraError::NotFound(id));
        }

        let record = asset.into_record(id);
        if let Err(err) = self.index.upsert(id, &vector, record.semantic_text()) {
            warn!(id, error = %err, "index write failed, rolling back insert");
            self.undo_insert(id);
            return Err(KuraError::PartialWrite {
                id,
                source: Box::new(err),
            });
        }
        info!(id, name = %record.name, "asset added");
        self.cache.put(record);
        Ok(id)
    }

    /// Fetch an asset, from the cache when possible.
    pub async fn get_asset_by_id(&self, id: AssetId) -> Result<Option<AssetRecord>> {
        if let Some(record) = self.cache.get(id) {
            return Ok(Some(record));
        }

        // Repopulate under the write lock so a concurrent delete cannot be
        // undone by a stale read.
        let _guard = self.writes.lock(id).await;
        if let Some(record) = self.cache.get(id) {
            return Ok(Some(record));
        }
        let record = self.store.get(id)?;
        if let Some(ref record) = record {
            self.cache.put(record.clone());
        }
        Ok(record)
    }

    /// Fetch an asset by name (case-insensitive) from the record store.
    pub fn get_asset_by_name(&self, name: &str) -> Result<Option<AssetRecord>> {
        self.store.get_by_name(name)
    }

    /// Apply `patch` to an asset, re-embedding when its semantic text
    /// changes. Returns the updated record.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Validation`, `RetrievalUnavailable` (nothing written), or
    /// `PartialWrite` when the index write failed and the record was restored.
    pub async fn update_asset(&self, id: AssetId, patch: AssetPatch) -> Result<AssetRecord> {
        if patch.is_empty() {
            return Err(KuraError::Validation(format!(
                "no fields to update for asset {id}"
            )));
        }

        let _guard = self.writes.lock(id).await;
        let current = self.store.get(id)?.ok_or(KuraError::NotFound(id))?;
        let target = current.patched(&patch);

        let reembed = target.semantic_text() != current.semantic_text() || !self.index.contains(id);
        let vector = if reembed {
            Some(self.embed(target.semantic_text()).await?)
        } else {
            None
        };

        let updated = self.store.update(id, &patch)?;
        if let Some(vector) = vector {
            if let Err(err) = self.index.upsert(id, &vector, updated.semantic_text()) {
                warn!(id, error = %err, "index write failed, restoring record");
                match self.store.restore(&current) {
                    Ok(()) => self.cache.put(current),
                    Err(undo) => {
                        error!(id, error = %undo, "failed to restore record after index failure");
                        self.cache.delete(id);
                    }
                }
                return Err(KuraError::PartialWrite {
                    id,
                    source: Box::new(err),
                });
            }
        }

        self.cache.put(updated.clone());
        info!(id, reembedded = reembed, "asset updated");
        Ok(updated)
    }

    /// Remove an asset from every store. Returns whether the record existed.
    pub async fn delete_asset_by_id(&self, id: AssetId) -> Result<bool> {
        let _guard = self.writes.lock(id).await;
        self.index.delete(id)?;
        self.cache.delete(id);
        let existed = self.store.delete(id)?;
        if existed {
            info!(id, "asset deleted");
        }
        Ok(existed)
    }

    /// Remove every asset. Returns how many records were removed.
    pub fn clear_database(&self) -> Result<usize> {
        let entries = self.index.clear()?;
        self.cache.clear();
        let removed = self.store.clear()?;
        info!(records = removed, index_entries = entries, "library cleared");
        Ok(removed)
    }

    /// Every asset, in insertion order.
    pub fn list_assets(&self) -> Result<Vec<AssetRecord>> {
        self.store.list_all()
    }

    /// Embed `text` with the configured timeout.
    pub(crate) async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        services::bounded("embedding", self.embed_timeout, self.embedder.embed(text)).await
    }

    pub(crate) fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &AssetStore {
        &self.store
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &AssetCache {
        &self.cache
    }

    /// Best-effort removal of a freshly inserted asset from every store.
    fn undo_insert(&self, id: AssetId) {
        if let Err(err) = self.index.delete(id) {
            error!(id, error = %err, "rollback: failed to remove index entry");
        }
        self.cache.delete(id);
        if let Err(err) = self.store.delete(id) {
            error!(id, error = %err, "rollback: failed to remove record");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::testing::FakeEmbedder;

    pub(crate) fn manager_with(embedder: Arc<FakeEmbedder>) -> LibraryManager {
        LibraryManager::new(
            AssetStore::open_in_memory().unwrap(),
            SimilarityIndex::open_in_memory().unwrap(),
            embedder,
        )
    }

    fn manager() -> (LibraryManager, Arc<FakeEmbedder>) {
        let embedder = Arc::new(FakeEmbedder::new(16));
        (manager_with(Arc::clone(&embedder)), embedder)
    }

    /// Record store, index and cache hold exactly the same ids, and the
    /// index text matches each record.
    pub(crate) fn assert_consistent(library: &LibraryManager) {
        let records = library.store().list_all().unwrap();
        let indexed = library.index().descriptions().unwrap();
        let record_ids: Vec<_> = records.iter().map(|r| r.id).collect();
        let indexed_ids: Vec<_> = indexed.iter().map(|(id, _)| *id).collect();

        assert_eq!(record_ids, indexed_ids, "record store and index diverge");
        for (record, (_, text)) in records.iter().zip(&indexed) {
            assert_eq!(record.semantic_text(), text, "stale index text for {}", record.id);
            if let Some(cached) = library.cache().get(record.id) {
                assert_eq!(&cached, record, "stale cache entry for {}", record.id);
            }
        }
        for id in library.cache().ids() {
            assert!(record_ids.contains(&id), "cache holds deleted asset {id}");
        }
    }

    #[tokio::test]
    async fn add_then_get_roundtrip() {
        let (library, _) = manager();
        let id = library
            .add_asset(
                NewAsset::new("cube1")
                    .with_description("a red cube")
                    .with_image_path("")
                    .with_mesh_path(""),
            )
            .await
            .unwrap();
        assert_eq!(id, 1);

        let record = library.get_asset_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.name, "cube1");
        assert_eq!(record.description.as_deref(), Some("a red cube"));
        assert_eq!(record.image_path.as_deref(), Some(""));
        assert_eq!(record.mesh_path.as_deref(), Some(""));
        assert!(library.cache().contains(id));
        assert_consistent(&library);
    }

    #[tokio::test]
    async fn add_rejects_empty_name_without_embedding() {
        let (library, embedder) = manager();
        let err = library.add_asset(NewAsset::new("")).await.unwrap_err();
        assert!(matches!(err, KuraError::Validation(_)));
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn add_with_embedding_outage_writes_nothing() {
        let (library, embedder) = manager();
        embedder.set_failing(true);

        let err = library
            .add_asset(NewAsset::new("cube1").with_description("a red cube"))
            .await
            .unwrap_err();
        assert!(matches!(err, KuraError::RetrievalUnavailable(_)));
        assert!(library.list_assets().unwrap().is_empty());
        assert!(library.index().is_empty());
    }

    #[tokio::test]
    async fn add_with_index_failure_rolls_back() {
        let embedder = Arc::new(
            FakeEmbedder::new(4).with_vector("broken vector", vec![1.0, 0.0, 0.0]),
        );
        let library = manager_with(Arc::clone(&embedder));
        library
            .add_asset(NewAsset::new("cube1").with_description("a red cube"))
            .await
            .unwrap();

        let err = library
            .add_asset(NewAsset::new("odd").with_description("broken vector"))
            .await
            .unwrap_err();
        let KuraError::PartialWrite { id, .. } = err else {
            panic!("expected PartialWrite, got {err:?}");
        };

        assert!(library.get_asset_by_id(id).await.unwrap().is_none());
        assert!(library.get_asset_by_name("odd").unwrap().is_none());
        assert_eq!(library.list_assets().unwrap().len(), 1);
        assert_consistent(&library);
    }

    #[tokio::test]
    async fn asset_without_description_is_indexed_by_name() {
        let (library, _) = manager();
        let id = library.add_asset(NewAsset::new("lamp")).await.unwrap();
        assert_eq!(library.index().description(id).unwrap().as_deref(), Some("lamp"));
        assert_consistent(&library);
    }

    #[tokio::test]
    async fn get_falls_back_to_store_and_repopulates() {
        let (library, _) = manager();
        let id = library.add_asset(NewAsset::new("cube1")).await.unwrap();
        library.cache().clear();

        let record = library.get_asset_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.name, "cube1");
        assert!(library.cache().contains(id));
        assert!(library.get_asset_by_id(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_reembeds_on_description_change() {
        let (library, embedder) = manager();
        let id = library
            .add_asset(NewAsset::new("cube1").with_description("a red cube"))
            .await
            .unwrap();
        let calls = embedder.calls();

        let updated = library
            .update_asset(id, AssetPatch::new().with_description("a blue cube"))
            .await
            .unwrap();
        assert_eq!(updated.description.as_deref(), Some("a blue cube"));
        assert_eq!(embedder.calls(), calls + 1);
        assert_eq!(
            library.index().description(id).unwrap().as_deref(),
            Some("a blue cube")
        );
        assert_consistent(&library);
    }

    #[tokio::test]
    async fn update_of_paths_does_not_reembed() {
        let (library, embedder) = manager();
        let id = library
            .add_asset(NewAsset::new("cube1").with_description("a red cube"))
            .await
            .unwrap();
        let calls = embedder.calls();

        let updated = library
            .update_asset(id, AssetPatch::new().with_mesh_path("cube.glb"))
            .await
            .unwrap();
        assert_eq!(updated.mesh_path.as_deref(), Some("cube.glb"));
        assert_eq!(embedder.calls(), calls);
        assert_eq!(library.get_asset_by_id(id).await.unwrap().unwrap(), updated);
        assert_consistent(&library);
    }

    #[tokio::test]
    async fn update_with_index_failure_restores_record() {
        let embedder = Arc::new(FakeEmbedder::new(4).with_vector("bad", vec![1.0, 0.0]));
        let library = manager_with(Arc::clone(&embedder));
        let id = library
            .add_asset(NewAsset::new("cube1").with_description("a red cube"))
            .await
            .unwrap();
        library
            .add_asset(NewAsset::new("sphere").with_description("a ball"))
            .await
            .unwrap();

        let err = library
            .update_asset(id, AssetPatch::new().with_description("bad"))
            .await
            .unwrap_err();
        assert!(matches!(err, KuraError::PartialWrite { id: failed, .. } if failed == id));

        let record = library.get_asset_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.description.as_deref(), Some("a red cube"));
        assert_consistent(&library);
    }

    #[tokio::test]
    async fn add_racing_delete_leaves_no_orphans() {
        let (library, _) = manager();
        let library = Arc::new(library);
        let held = library.writes.lock(1).await;

        let adder = tokio::spawn({
            let library = Arc::clone(&library);
            async move {
                library
                    .add_asset(NewAsset::new("cube1").with_description("a red cube"))
                    .await
            }
        });
        for _ in 0..200 {
            if library.store().get(1).unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Same steps as delete_asset_by_id, which is blocked on `held`.
        library.index().delete(1).unwrap();
        library.cache().delete(1);
        assert!(library.store().delete(1).unwrap());
        drop(held);

        let err = adder.await.unwrap().unwrap_err();
        assert!(matches!(err, KuraError::NotFound(1)));
        assert!(!library.index().contains(1));
        assert!(library.cache().get(1).is_none());
        assert_consistent(&library);
    }

    #[tokio::test]
    async fn failed_restore_evicts_cache_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.db");
        let embedder = Arc::new(FakeEmbedder::new(4).with_vector("bad", vec![1.0, 0.0]));
        let library = LibraryManager::new(
            AssetStore::open(&path).unwrap(),
            SimilarityIndex::open_in_memory().unwrap(),
            embedder,
        );
        let id = library
            .add_asset(NewAsset::new("cube1").with_description("a red cube"))
            .await
            .unwrap();
        library
            .add_asset(NewAsset::new("sphere").with_description("a ball"))
            .await
            .unwrap();

        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER refuse_restore BEFORE UPDATE ON asset
                 WHEN NEW.description = 'a red cube'
                 BEGIN SELECT RAISE(ABORT, 'restore refused'); END;",
            )
            .unwrap();

        let err = library
            .update_asset(id, AssetPatch::new().with_description("bad"))
            .await
            .unwrap_err();
        assert!(matches!(err, KuraError::PartialWrite { .. }));

        assert!(library.cache().get(id).is_none());
        let record = library.get_asset_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.description.as_deref(), Some("bad"));
    }

    #[tokio::test]
    async fn update_missing_and_empty_patch() {
        let (library, _) = manager();
        let err = library
            .update_asset(5, AssetPatch::new().with_name("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, KuraError::NotFound(5)));

        let err = library.update_asset(5, AssetPatch::new()).await.unwrap_err();
        assert!(matches!(err, KuraError::Validation(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent_across_stores() {
        let (library, _) = manager();
        let id = library
            .add_asset(NewAsset::new("cube1").with_description("a red cube"))
            .await
            .unwrap();

        assert!(library.delete_asset_by_id(id).await.unwrap());
        assert!(!library.delete_asset_by_id(id).await.unwrap());
        assert!(library.get_asset_by_id(id).await.unwrap().is_none());
        assert!(!library.index().contains(id));
        assert_consistent(&library);
    }

    #[tokio::test]
    async fn clear_database_empties_everything() {
        let (library, _) = manager();
        for name in ["a", "b", "c"] {
            library.add_asset(NewAsset::new(name)).await.unwrap();
        }

        assert_eq!(library.clear_database().unwrap(), 3);
        assert!(library.list_assets().unwrap().is_empty());
        assert!(library.index().is_empty());
        assert!(library.cache().is_empty());
    }

    #[tokio::test]
    async fn concurrent_writes_keep_stores_consistent() {
        let embedder = Arc::new(FakeEmbedder::new(16));
        let library = Arc::new(manager_with(embedder));
        let id = library
            .add_asset(NewAsset::new("cube1").with_description("a red cube"))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for n in 0..10 {
            let library = Arc::clone(&library);
            tasks.push(tokio::spawn(async move {
                let patch = AssetPatch::new().with_description(format!("variant {n}"));
                library.update_asset(id, patch).await.map(|_| ())
            }));
        }
        for n in 0..5 {
            let library = Arc::clone(&library);
            tasks.push(tokio::spawn(async move {
                library
                    .add_asset(NewAsset::new(format!("extra{n}")))
                    .await
                    .map(|_| ())
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(library.list_assets().unwrap().len(), 6);
        assert_consistent(&library);
    }

    #[tokio::test]
    async fn open_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let config = LibraryConfig::new(dir.path());
        let embedder = Arc::new(FakeEmbedder::new(16));

        let id = {
            let library = LibraryManager::open(&config, embedder.clone()).await.unwrap();
            library
                .add_asset(NewAsset::new("cube1").with_description("a red cube"))
                .await
                .unwrap()
        };

        let library = LibraryManager::open(&config, embedder).await.unwrap();
        assert!(library.cache().contains(id));
        assert_eq!(
            library.index().description(id).unwrap().as_deref(),
            Some("a red cube")
        );
        assert_consistent(&library);
    }
}
