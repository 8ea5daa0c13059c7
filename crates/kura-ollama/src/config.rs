use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default Ollama endpoint.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Default embedding model.
pub const DEFAULT_EMBED_MODEL: &str = "all-minilm";

/// Default arbitration model.
pub const DEFAULT_ARBITER_MODEL: &str = "devstral:24b";

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 120_000;

/// Connection settings shared by [`OllamaEmbedder`](crate::OllamaEmbedder)
/// and [`OllamaArbiter`](crate::OllamaArbiter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub embed_model: String,
    pub arbiter_model: String,
    /// Upper bound on one HTTP request, in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            arbiter_model: DEFAULT_ARBITER_MODEL.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl OllamaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server URL. A trailing slash is dropped.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    pub fn with_arbiter_model(mut self, model: impl Into<String>) -> Self {
        self.arbiter_model = model.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Build an HTTP client honouring the request timeout.
    pub fn client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(self.request_timeout())
            .build()?)
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{path}", self.base_url)
    }
}
