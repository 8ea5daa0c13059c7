use thiserror::Error;

use crate::types::AssetId;

/// Errors that can occur during Kura library operations.
///
/// Every variant is scoped to the request that produced it; none of them
/// leaves the library in a state that requires a restart.
#[derive(Debug, Error)]
pub enum KuraError {
    /// The input was rejected before any store was touched.
    #[error("invalid input: {0}")]
    Validation(String),

    /// No asset exists with the requested id.
    #[error("asset {0} not found")]
    NotFound(AssetId),

    /// The asset record store failed to read or write.
    #[error("record store error: {0}")]
    StoreIo(String),

    /// The similarity index failed to read or write.
    #[error("similarity index error: {0}")]
    IndexIo(String),

    /// A multi-store write failed part way and was rolled back.
    ///
    /// The id must be treated as if it never existed (for a create) or as
    /// still holding its previous values (for an update).
    #[error("partial write on asset {id} was rolled back: {source}")]
    PartialWrite {
        /// The asset the write was applied to.
        id: AssetId,
        /// The failure that interrupted the write.
        #[source]
        source: Box<KuraError>,
    },

    /// The embedding or arbitration service (or the index behind them) could
    /// not answer. This is never a negative match.
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// An external service returned an error of its own.
    #[error("service error: {0}")]
    Service(String),

    /// A configuration file could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A regex pattern failed to compile (should not happen with static patterns).
    #[error("regex compilation error: {0}")]
    RegexError(#[from] regex::Error),
}

impl KuraError {
    /// Returns `true` if retrying the same request may succeed.
    ///
    /// Validation and not-found errors are deterministic and never retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StoreIo(_)
            | Self::IndexIo(_)
            | Self::RetrievalUnavailable(_)
            | Self::Service(_)
            | Self::PartialWrite { .. } => true,
            Self::Validation(_) | Self::NotFound(_) | Self::Config(_) | Self::RegexError(_) => {
                false
            }
        }
    }

    pub(crate) fn store(err: impl std::fmt::Display) -> Self {
        Self::StoreIo(err.to_string())
    }

    pub(crate) fn index(err: impl std::fmt::Display) -> Self {
        Self::IndexIo(err.to_string())
    }
}

/// Result type alias for Kura operations.
pub type Result<T> = std::result::Result<T, KuraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = KuraError::NotFound(42);
        assert_eq!(err.to_string(), "asset 42 not found");

        let err = KuraError::Validation("asset name is empty".into());
        assert!(err.to_string().contains("asset name is empty"));
    }

    #[test]
    fn partial_write_exposes_source() {
        use std::error::Error as _;

        let err = KuraError::PartialWrite {
            id: 3,
            source: Box::new(KuraError::IndexIo("disk full".into())),
        };
        assert!(err.to_string().contains("asset 3"));
        let source = err.source().map(ToString::to_string).unwrap_or_default();
        assert!(source.contains("disk full"));
    }

    #[test]
    fn retryable_classification() {
        assert!(KuraError::StoreIo("locked".into()).is_retryable());
        assert!(KuraError::RetrievalUnavailable("timeout".into()).is_retryable());
        assert!(!KuraError::Validation("empty".into()).is_retryable());
        assert!(!KuraError::NotFound(1).is_retryable());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KuraError>();
    }
}
