//! # Kura Core
//!
//! A durable library of generated 2D/3D assets with a two-stage semantic
//! lookup in front of it. Pipelines ask the [`Retriever`] whether an asset
//! matching a description already exists before paying for a new
//! generation.
//!
//! Every asset lives in three stores kept in step by the
//! [`LibraryManager`]: the SQLite [`AssetStore`] (authoritative), the
//! [`SimilarityIndex`] of description embeddings, and the in-memory
//! [`AssetCache`]. Embedding and arbitration are external services behind
//! the [`Embedder`] and [`Arbiter`] traits.
//!
//! ## Quick Start
//!
//! ```rust
//! use kura_core::{AssetStore, NewAsset, SimilarityIndex};
//!
//! let store = AssetStore::open_in_memory().unwrap();
//! let id = store.insert(&NewAsset::new("cube1").with_description("a red cube")).unwrap();
//! assert_eq!(id, 1);
//!
//! let index = SimilarityIndex::open_in_memory().unwrap();
//! index.upsert(id, &[1.0, 0.0, 0.0], "a red cube").unwrap();
//! let hits = index.query(&[0.9, 0.1, 0.0], 5).unwrap();
//! assert_eq!(hits[0].id, id);
//! assert!(hits[0].score > 0.95);
//! ```
pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod library;
pub mod locks;
pub mod retrieval;
pub mod services;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export primary API
pub use cache::AssetCache;
pub use config::{DEFAULT_THRESHOLD, DEFAULT_TOP_K, LibraryConfig, RetrievalConfig};
pub use error::{KuraError, Result};
pub use fingerprint::{Fingerprint, Fingerprinter};
pub use index::{IndexHit, SimilarityIndex};
pub use library::{IMAGE_EXTENSIONS, LibraryManager, MESH_EXTENSIONS, ReconcileMode};
pub use retrieval::{GenerationPermit, Lookup, Retriever};
pub use services::{Arbiter, Candidate, Embedder};
pub use store::{AssetStore, RetryPolicy};
pub use types::{AssetId, AssetPatch, AssetRecord, ImportReport, NewAsset, ReconcileReport};
