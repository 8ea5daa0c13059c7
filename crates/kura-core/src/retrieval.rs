//! # Retrieval Orchestrator
//!
//! Answers "does an asset matching this description already exist?" in two
//! stages:
//!
//! 1. **Coarse recall**: embed the query and take the top-`k` neighbours
//!    from the similarity index, dropping everything under the threshold.
//! 2. **Arbitration**: hand the survivors to the [`Arbiter`], whose answer
//!    is final.
//!
//! An empty candidate list after filtering is a miss without an
//! arbitration call. Service failures and timeouts surface as
//! [`KuraError::RetrievalUnavailable`], never as a miss.
//!
//! Equivalent descriptions (same [`Fingerprint`]) are serialised: a caller
//! that confirms a miss through [`Retriever::find_or_reserve`] holds a
//! [`GenerationPermit`] until the new asset is inserted, and every other
//! lookup for that fingerprint waits for it.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::error::{KuraError, Result};
use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::library::LibraryManager;
use crate::locks::{KeyedGuard, KeyedLocks};
use crate::services::{self, Arbiter, Candidate};
use crate::types::{AssetId, NewAsset};

/// Result of [`Retriever::find_or_reserve`].
#[derive(Debug)]
pub enum Lookup {
    /// A matching asset exists.
    Found(AssetId),
    /// No match; the caller owns generation for this description.
    Miss(GenerationPermit),
}

/// Exclusive right to create the asset for one description fingerprint.
///
/// Other lookups for the same fingerprint block until the permit is
/// committed or dropped. Dropping it abandons the generation.
pub struct GenerationPermit {
    library: Arc<LibraryManager>,
    description: String,
    guard: KeyedGuard<Fingerprint>,
}

impl GenerationPermit {
    /// The query that missed.
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        self.guard.key()
    }

    /// Insert the generated asset and release the guard.
    ///
    /// An asset without a description is stored under the description that
    /// missed, so the next equivalent lookup finds it.
    pub async fn commit(self, mut asset: NewAsset) -> Result<AssetId> {
        if asset.description.is_none() {
            asset.description = Some(self.description.clone());
        }
        let id = self.library.add_asset(asset).await?;
        info!(id, fingerprint = %self.fingerprint(), "generated asset committed");
        Ok(id)
    }
}

impl fmt::Debug for GenerationPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationPermit")
            .field("description", &self.description)
            .field("fingerprint", self.fingerprint())
            .finish()
    }
}

/// Two-stage semantic lookup over a [`LibraryManager`].
pub struct Retriever {
    library: Arc<LibraryManager>,
    arbiter: Arc<dyn Arbiter>,
    config: RetrievalConfig,
    fingerprinter: Fingerprinter,
    generations: KeyedLocks<Fingerprint>,
}

impl Retriever {
    /// # Errors
    ///
    /// Returns `KuraError::RegexError` if the fingerprint pattern fails to
    /// compile.
    pub fn new(
        library: Arc<LibraryManager>,
        arbiter: Arc<dyn Arbiter>,
        config: RetrievalConfig,
    ) -> Result<Self> {
        Ok(Self {
            library,
            arbiter,
            config,
            fingerprinter: Fingerprinter::new()?,
            generations: KeyedLocks::new(),
        })
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn library(&self) -> &Arc<LibraryManager> {
        &self.library
    }

    /// Id of the asset matching `description`, or `None`.
    ///
    /// Waits while a [`GenerationPermit`] for an equivalent description is
    /// outstanding. Concurrent reads of the same description do not wait on
    /// each other.
    ///
    /// # Errors
    ///
    /// - `Validation` for a blank description
    /// - `RetrievalUnavailable` if embedding, the index or arbitration fail
    ///   or time out
    pub async fn find_by_description(&self, description: &str) -> Result<Option<AssetId>> {
        let fingerprint = self.check(description)?;
        drop(self.generations.lock(fingerprint).await);
        self.lookup(description).await
    }

    /// Like [`find_by_description`](Self::find_by_description), but a miss
    /// hands the caller a [`GenerationPermit`] for this fingerprint.
    pub async fn find_or_reserve(&self, description: &str) -> Result<Lookup> {
        let fingerprint = self.check(description)?;
        let guard = self.generations.lock(fingerprint).await;

        match self.lookup(description).await? {
            Some(id) => Ok(Lookup::Found(id)),
            None => {
                debug!(fingerprint = %guard.key(), "miss confirmed, generation reserved");
                Ok(Lookup::Miss(GenerationPermit {
                    library: Arc::clone(&self.library),
                    description: description.trim().to_string(),
                    guard,
                }))
            }
        }
    }

    fn check(&self, description: &str) -> Result<Fingerprint> {
        if description.trim().is_empty() {
            return Err(KuraError::Validation("query description is empty".into()));
        }
        Ok(self.fingerprinter.fingerprint(description))
    }

    async fn lookup(&self, description: &str) -> Result<Option<AssetId>> {
        let query = self.library.embed(description).await?;

        let hits = self
            .library
            .index()
            .query(&query, self.config.top_k)
            .map_err(unavailable)?;
        let recalled = hits.len();
        let survivors: Vec<_> = hits
            .into_iter()
            .filter(|hit| hit.score >= self.config.threshold)
            .collect();
        debug!(
            recalled,
            survivors = survivors.len(),
            threshold = self.config.threshold,
            "coarse recall"
        );
        if survivors.is_empty() {
            return Ok(None);
        }

        let mut candidates = Vec::with_capacity(survivors.len());
        for hit in survivors {
            match self.library.get_asset_by_id(hit.id).await.map_err(unavailable)? {
                Some(record) => candidates.push(Candidate {
                    id: hit.id,
                    description: record.semantic_text().to_string(),
                    score: hit.score,
                }),
                None => warn!(id = hit.id, "index hit has no record, skipping"),
            }
        }
        if candidates.is_empty() {
            return Ok(None);
        }

        let verdict = services::bounded(
            "arbitration",
            self.config.arbitrate_timeout(),
            self.arbiter.arbitrate(description, &candidates),
        )
        .await?;

        match verdict {
            Some(id) if candidates.iter().any(|c| c.id == id) => {
                debug!(id, "arbiter confirmed match");
                Ok(Some(id))
            }
            Some(id) => {
                warn!(id, "arbiter picked an id outside the candidate set, treating as miss");
                Ok(None)
            }
            None => {
                debug!(candidates = candidates.len(), "arbiter rejected all candidates");
                Ok(None)
            }
        }
    }
}

fn unavailable(err: KuraError) -> KuraError {
    match err {
        KuraError::RetrievalUnavailable(_) => err,
        other => KuraError::RetrievalUnavailable(other.to_string()),
    }
}
