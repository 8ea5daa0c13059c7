//! Deterministic stand-ins for the embedding and arbitration services.
//!
//! Enabled for this crate's tests and for downstream crates through the
//! `testing` feature.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{KuraError, Result};
use crate::services::{Arbiter, Candidate, Embedder};
use crate::types::AssetId;

/// Embeds text from an explicit table, falling back to a hashed
/// bag-of-words vector for unknown text.
pub struct FakeEmbedder {
    dimension: usize,
    table: Mutex<HashMap<String, Vec<f32>>>,
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FakeEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            table: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay: Mutex::new(None),
        }
    }

    /// Pin the vector returned for `text`.
    pub fn with_vector(self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.set_vector(text, vector);
        self
    }

    pub fn set_vector(&self, text: impl Into<String>, vector: Vec<f32>) {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(text.into(), vector);
    }

    /// Make every subsequent call fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every subsequent call.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Number of successful calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hashed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        let words = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty());
        for word in words {
            let slot = fnv1a(&word.to_lowercase()) % self.dimension as u64;
            vector[slot as usize] += 1.0;
        }
        if vector.iter().all(|v| *v == 0.0) {
            vector[0] = 1.0;
        }
        vector
    }
}

fn fnv1a(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(KuraError::Service("embedding backend offline".into()));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        let pinned = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(text)
            .cloned();
        Ok(pinned.unwrap_or_else(|| self.hashed(text)))
    }
}

/// How a [`ScriptedArbiter`] answers.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Pick the first (best-recall) candidate.
    First,
    /// Reject every candidate.
    Nothing,
    /// Always answer with this id, whether or not it was offered.
    Pick(AssetId),
    /// Fail with a service error.
    Fail,
}

/// One recorded arbitration request.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrationCall {
    pub query: String,
    pub candidates: Vec<Candidate>,
}

/// Arbiter that answers from a script and records every call.
pub struct ScriptedArbiter {
    verdict: Mutex<Verdict>,
    calls: Mutex<Vec<ArbitrationCall>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedArbiter {
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdict: Mutex::new(verdict),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        }
    }

    pub fn set_verdict(&self, verdict: Verdict) {
        *self.verdict.lock().unwrap_or_else(PoisonError::into_inner) = verdict;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn calls(&self) -> Vec<ArbitrationCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl Arbiter for ScriptedArbiter {
    async fn arbitrate(&self, query: &str, candidates: &[Candidate]) -> Result<Option<AssetId>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ArbitrationCall {
                query: query.to_string(),
                candidates: candidates.to_vec(),
            });

        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let verdict = self
            .verdict
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match verdict {
            Verdict::First => Ok(candidates.first().map(|c| c.id)),
            Verdict::Nothing => Ok(None),
            Verdict::Pick(id) => Ok(Some(id)),
            Verdict::Fail => Err(KuraError::Service("arbiter returned HTTP 500".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_embedder_is_deterministic() {
        let embedder = FakeEmbedder::new(32);
        let a = embedder.embed("a red cube").await.unwrap();
        let b = embedder.embed("A red cube!").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_eq!(embedder.calls(), 2);
    }

    #[tokio::test]
    async fn fake_embedder_prefers_pinned_vectors_and_can_fail() {
        let embedder = FakeEmbedder::new(3).with_vector("blue sphere", vec![0.0, 1.0, 0.0]);
        assert_eq!(embedder.embed("blue sphere").await.unwrap(), [0.0, 1.0, 0.0]);

        embedder.set_failing(true);
        assert!(embedder.embed("blue sphere").await.is_err());
    }

    #[tokio::test]
    async fn scripted_arbiter_records_calls() {
        let arbiter = ScriptedArbiter::new(Verdict::First);
        let candidates = [Candidate {
            id: 4,
            description: "blue sphere".into(),
            score: 0.99,
        }];

        assert_eq!(arbiter.arbitrate("blue sphere", &candidates).await.unwrap(), Some(4));
        arbiter.set_verdict(Verdict::Nothing);
        assert_eq!(arbiter.arbitrate("blue sphere", &candidates).await.unwrap(), None);

        assert_eq!(arbiter.call_count(), 2);
        assert_eq!(arbiter.calls()[0].candidates, candidates);
    }
}
