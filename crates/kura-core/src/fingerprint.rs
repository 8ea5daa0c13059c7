//! Description fingerprints.
//!
//! Two requests whose descriptions differ only in case, punctuation or
//! spacing share a fingerprint and therefore a generation guard.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Normalised form of a description.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes [`Fingerprint`]s with a pre-compiled pattern.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    re_separators: Regex,
}

impl Fingerprinter {
    /// # Errors
    ///
    /// Returns `KuraError::RegexError` if the pattern fails to compile
    /// (should never happen with the static pattern defined here).
    pub fn new() -> Result<Self> {
        Ok(Self {
            re_separators: Regex::new(r"[^\p{L}\p{N}]+")?,
        })
    }

    /// Lowercases, replaces every run of non-alphanumerics with one space
    /// and trims.
    pub fn fingerprint(&self, description: &str) -> Fingerprint {
        let lowered = description.to_lowercase();
        let collapsed = self.re_separators.replace_all(&lowered, " ");
        Fingerprint(collapsed.trim().to_string())
    }
}
