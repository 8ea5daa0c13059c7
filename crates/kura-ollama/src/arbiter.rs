use std::fmt::Write as _;

use async_trait::async_trait;
use kura_core::{Arbiter, AssetId, Candidate};
use serde_json::Value;
use tracing::debug;

use crate::api::{ChatOptions, ChatRequest, ChatResponse, Message, Role};
use crate::config::OllamaConfig;
use crate::error::{OllamaError, Result};

const SYSTEM_PROMPT: &str = "You match asset requests against an asset library. \
You receive a requested description and a numbered list of existing assets. \
Pick the asset that depicts the same object as the request; differences in wording do not matter, \
differences in shape, colour, material or subject do. \
If no asset depicts the same object, answer null. \
Reply with JSON only, in the form {\"id\": <asset id or null>}.";

/// [`Arbiter`] that asks an Ollama chat model to pick the matching asset.
#[derive(Debug, Clone)]
pub struct OllamaArbiter {
    client: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaArbiter {
    /// # Errors
    ///
    /// Returns `OllamaError::Http` if the HTTP client cannot be built.
    pub fn new(config: OllamaConfig) -> Result<Self> {
        Ok(Self::with_client(config.client()?, config))
    }

    pub fn with_client(client: reqwest::Client, config: OllamaConfig) -> Self {
        Self { client, config }
    }

    pub fn model(&self) -> &str {
        &self.config.arbiter_model
    }

    async fn request(&self, query: &str, candidates: &[Candidate]) -> Result<Option<AssetId>> {
        let request = ChatRequest {
            model: &self.config.arbiter_model,
            messages: vec![
                Message {
                    role: Role::System,
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: Role::User,
                    content: user_prompt(query, candidates),
                },
            ],
            stream: false,
            format: "json",
            options: ChatOptions { temperature: 0.0 },
        };
        let response = self
            .client
            .post(self.config.endpoint("chat"))
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

        let body: ChatResponse = response.json().await?;
        let verdict = parse_verdict(&body.message.content)?;
        debug!(model = %self.config.arbiter_model, ?verdict, "arbitration answered");
        Ok(verdict)
    }
}

fn user_prompt(query: &str, candidates: &[Candidate]) -> String {
    let mut prompt = format!("Requested: {query}\n\nAssets:\n");
    for candidate in candidates {
        let _ = writeln!(prompt, "- id {}: {}", candidate.id, candidate.description);
    }
    prompt
}

/// Reads `{"id": ...}` from the model reply. Accepts an integer, a numeric
/// string, or `null`/`"none"` for no match.
fn parse_verdict(content: &str) -> Result<Option<AssetId>> {
    let value: Value = serde_json::from_str(content.trim())
        .map_err(|e| OllamaError::Malformed(format!("reply is not JSON: {e}")))?;
    let id = value
        .get("id")
        .ok_or_else(|| OllamaError::Malformed(format!("reply has no \"id\" field: {content}")))?;

    match id {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| OllamaError::Malformed(format!("id is not an integer: {n}"))),
        Value::String(s) if s.trim().is_empty() || s.trim().eq_ignore_ascii_case("none") => {
            Ok(None)
        }
        Value::String(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| OllamaError::Malformed(format!("id is not an integer: {s:?}"))),
        other => Err(OllamaError::Malformed(format!("unexpected id value: {other}"))),
    }
}

#[async_trait]
impl Arbiter for OllamaArbiter {
    async fn arbitrate(
        &self,
        query: &str,
        candidates: &[Candidate],
    ) -> kura_core::Result<Option<AssetId>> {
        Ok(self.request(query, candidates).await?)
    }
}
