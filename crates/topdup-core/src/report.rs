//! Per-item outcome accounting for batch operations.
//!
//! Batch steps (metadata patches, similarity retrieval, pair extraction)
//! never abort on a single bad item. Instead each skipped item is recorded
//! here with a reason so callers and tests can observe it.

use serde::Serialize;

/// An item that was skipped, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedItem {
    pub id: String,
    pub reason: String,
}

/// Outcome of a batch: how many items succeeded and which were skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: Vec<SkippedItem>,
}

impl BatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ok(&mut self) {
        self.processed += 1;
    }

    pub fn record_skip(&mut self, id: impl Into<String>, reason: impl ToString) {
        let item = SkippedItem {
            id: id.into(),
            reason: reason.to_string(),
        };
        tracing::warn!(id = %item.id, reason = %item.reason, "item skipped");
        self.skipped.push(item);
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: BatchReport) {
        self.processed += other.processed;
        self.skipped.extend(other.skipped);
    }

    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_accumulates() {
        let mut a = BatchReport::new();
        a.record_ok();
        let mut b = BatchReport::new();
        b.record_ok();
        b.record_skip("d9", "document not found");
        a.merge(b);
        assert_eq!(a.processed, 2);
        assert_eq!(a.skipped.len(), 1);
        assert!(!a.is_clean());
    }
}
