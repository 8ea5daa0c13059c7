use std::collections::BTreeMap;

use tracing::{info, warn};

use super::LibraryManager;
use crate::error::Result;
use crate::types::{AssetId, ReconcileReport};

/// What [`LibraryManager::reconcile`] does with the divergences it finds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Count divergences only.
    Detect,
    /// Re-embed missing or stale entries and drop orphans.
    Repair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Missing,
    Stale,
    Orphan,
}

impl LibraryManager {
    /// Compare the record store with the similarity index.
    ///
    /// In [`ReconcileMode::Repair`] each divergent id is fixed under its
    /// write lock against a fresh read of the record. Items that cannot be
    /// repaired (embedding outage, storage error) are logged and left for
    /// the next pass.
    pub async fn reconcile(&self, mode: ReconcileMode) -> Result<ReconcileReport> {
        let records = self.store.list_all()?;
        let mut indexed: BTreeMap<AssetId, String> =
            self.index.descriptions()?.into_iter().collect();

        let mut faults = Vec::new();
        for record in &records {
            match indexed.remove(&record.id) {
                None => faults.push((record.id, Fault::Missing)),
                Some(text) if text != record.semantic_text() => {
                    faults.push((record.id, Fault::Stale));
                }
                Some(_) => {}
            }
        }
        faults.extend(indexed.into_keys().map(|id| (id, Fault::Orphan)));

        let mut report = ReconcileReport::default();
        for &(_, fault) in &faults {
            match fault {
                Fault::Missing => report.missing += 1,
                Fault::Stale => report.stale += 1,
                Fault::Orphan => report.orphans += 1,
            }
        }

        if mode == ReconcileMode::Repair {
            for (id, fault) in faults {
                match self.repair(id).await {
                    Ok(true) if fault == Fault::Orphan => report.orphans_removed += 1,
                    Ok(true) => report.reindexed += 1,
                    Ok(false) => {}
                    Err(err) => warn!(id, ?fault, error = %err, "reconcile: repair failed"),
                }
            }
        }

        if report.is_consistent() {
            info!("reconcile: record store and index agree");
        } else {
            warn!(%report, ?mode, "reconcile: divergence found");
        }
        Ok(report)
    }

    /// Bring the index entry for `id` in line with its current record.
    /// Returns whether anything was written.
    async fn repair(&self, id: AssetId) -> Result<bool> {
        let _guard = self.writes.lock(id).await;
        match self.store.get(id)? {
            None => self.index.delete(id),
            Some(record) => {
                let text = record.semantic_text();
                if self.index.description(id)?.as_deref() == Some(text) {
                    return Ok(false);
                }
                let vector = self.embed(text).await?;
                self.index.upsert(id, &vector, text)?;
                Ok(true)
            }
        }
    }
}
