//! # Kura Ollama
//!
//! [`Embedder`](kura_core::Embedder) and [`Arbiter`](kura_core::Arbiter)
//! implementations that talk to an [Ollama](https://ollama.com) server.
//!
//! ```rust,no_run
//! use kura_ollama::{OllamaConfig, OllamaEmbedder};
//! use kura_core::Embedder;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let embedder = OllamaEmbedder::new(OllamaConfig::default())?;
//! let vector = embedder.embed("a red cube").await?;
//! assert!(!vector.is_empty());
//! # Ok(())
//! # }
//! ```
mod api;
pub mod arbiter;
pub mod config;
pub mod embedder;
pub mod error;

pub use arbiter::OllamaArbiter;
pub use config::{DEFAULT_ARBITER_MODEL, DEFAULT_BASE_URL, DEFAULT_EMBED_MODEL, OllamaConfig};
pub use embedder::OllamaEmbedder;
pub use error::{OllamaError, Result};
