//! External service boundaries: text embedding and candidate arbitration.
//!
//! Both are black-box request/response services. Implementations live
//! outside this crate (see `kura-ollama`); the library only relies on these
//! traits.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{KuraError, Result};
use crate::types::AssetId;

/// Maps text to a fixed-dimension vector. Must be deterministic for
/// identical input.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// A candidate presented to the arbiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: AssetId,
    pub description: String,
    /// Similarity score from coarse recall.
    pub score: f32,
}

/// Picks the single best match for a query among a short candidate list.
#[async_trait]
pub trait Arbiter: Send + Sync {
    /// Returns the id of the best candidate, or `None` if none matches.
    /// Candidates are ordered best-recall-first.
    async fn arbitrate(&self, query: &str, candidates: &[Candidate]) -> Result<Option<AssetId>>;
}

/// Runs a service call under `limit`. Failures and timeouts both become
/// `RetrievalUnavailable`; neither is ever a negative answer.
pub(crate) async fn bounded<T>(
    what: &str,
    limit: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(KuraError::RetrievalUnavailable(format!("{what} failed: {err}"))),
        Err(_) => Err(KuraError::RetrievalUnavailable(format!(
            "{what} timed out after {limit:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_passes_through_success() {
        let value = bounded("embedding", Duration::from_secs(1), async { Ok(3) })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn bounded_maps_failure_and_timeout() {
        let err = bounded::<()>("embedding", Duration::from_secs(1), async {
            Err(KuraError::Service("connection refused".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, KuraError::RetrievalUnavailable(ref m) if m.contains("refused")));

        let err = bounded("arbitration", Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, KuraError::RetrievalUnavailable(ref m) if m.contains("timed out")));
    }
}
