use async_trait::async_trait;
use kura_core::Embedder;
use tracing::debug;

use crate::api::{EmbedRequest, EmbedResponse};
use crate::config::OllamaConfig;
use crate::error::{OllamaError, Result};

/// [`Embedder`] backed by Ollama's `/api/embed` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaEmbedder {
    /// # Errors
    ///
    /// Returns `OllamaError::Http` if the HTTP client cannot be built.
    pub fn new(config: OllamaConfig) -> Result<Self> {
        Ok(Self::with_client(config.client()?, config))
    }

    /// Share a client (and its connection pool) with other services.
    pub fn with_client(client: reqwest::Client, config: OllamaConfig) -> Self {
        Self { client, config }
    }

    pub fn model(&self) -> &str {
        &self.config.embed_model
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbedRequest {
            model: &self.config.embed_model,
            input: text,
        };
        let response = self
            .client
            .post(self.config.endpoint("embed"))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OllamaError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: EmbedResponse = response.json().await?;
        let vector = first_embedding(body)?;
        debug!(model = %self.config.embed_model, dimension = vector.len(), "text embedded");
        Ok(vector)
    }
}

fn first_embedding(body: EmbedResponse) -> Result<Vec<f32>> {
    match body.embeddings.into_iter().next() {
        Some(vector) if !vector.is_empty() => Ok(vector),
        _ => Err(OllamaError::Malformed("response carried no embedding".into())),
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> kura_core::Result<Vec<f32>> {
        Ok(self.request(text).await?)
    }
}
