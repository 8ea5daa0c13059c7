use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of a reconciliation pass between the record store and the
/// similarity index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Records that had no index entry.
    pub missing: usize,
    /// Index entries whose description no longer matches the record.
    pub stale: usize,
    /// Index entries with no backing record.
    pub orphans: usize,
    /// Entries re-embedded and written back to the index.
    pub reindexed: usize,
    /// Orphaned entries removed from the index.
    pub orphans_removed: usize,
}

impl ReconcileReport {
    /// Returns `true` if no divergence was found.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.missing == 0 && self.stale == 0 && self.orphans == 0
    }

    /// Returns `true` if every detected fault was repaired.
    #[must_use]
    pub fn is_repaired(&self) -> bool {
        self.reindexed == self.missing + self.stale && self.orphans_removed == self.orphans
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "missing={}, stale={}, orphans={}, reindexed={}, orphans_removed={}",
            self.missing, self.stale, self.orphans, self.reindexed, self.orphans_removed
        )
    }
}

/// Outcome of importing an asset directory tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    /// Assets added to the library.
    pub imported: usize,
    /// Sub-directories skipped because an asset with that name exists.
    pub skipped: usize,
    /// Sub-directories that could not be read or added.
    pub failed: usize,
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "imported={}, skipped={}, failed={}",
            self.imported, self.skipped, self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_report_is_consistent() {
        let report = ReconcileReport::default();
        assert!(report.is_consistent());
        assert!(report.is_repaired());
    }

    #[test]
    fn detected_but_unrepaired_faults() {
        let report = ReconcileReport {
            missing: 1,
            orphans: 2,
            ..Default::default()
        };
        assert!(!report.is_consistent());
        assert!(!report.is_repaired());
        assert!(report.to_string().contains("orphans=2"));
    }
}
