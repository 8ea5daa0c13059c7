//! # Kura
//!
//! Semantic asset library with a two-stage retrieval cache.
//!
//! This crate bundles [`kura_core`] (record store, similarity index, cache,
//! library manager and retriever) with the Ollama-backed services from
//! [`kura_ollama`].
pub use kura_core::*;

pub mod ollama {
    pub use kura_ollama::*;
}
