//! Similarity records, rank merging and pair identity.
//!
//! Retrieval produces one [`SimilarityRecord`] per subject document: a
//! ranked list of `(candidate id, score)` matches. The rank-encoded field
//! names used in document metadata (`sim_score_<rank>`,
//! `similar_to_<rank>`) only appear when a record is turned into a
//! [`MetaPatch`].

use serde_json::Value;
use uuid::Uuid;

use crate::models::{Document, MetaPatch};

/// One reranked match for a subject document. Ranks start at 1.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedMatch {
    pub rank: usize,
    pub candidate_id: String,
    pub score: f32,
}

/// Retrieval output for one subject document.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityRecord {
    pub document_id: String,
    /// Best match first. Empty when retrieval failed for this document or
    /// there were no candidates.
    pub matches: Vec<RankedMatch>,
}

impl SimilarityRecord {
    pub fn empty(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            matches: Vec::new(),
        }
    }

    /// The match at `rank`, if any.
    pub fn at_rank(&self, rank: usize) -> Option<&RankedMatch> {
        self.matches.iter().find(|m| m.rank == rank)
    }

    /// Score at `rank`, `0.0` when absent.
    pub fn score_at(&self, rank: usize) -> f32 {
        self.at_rank(rank).map(|m| m.score).unwrap_or(0.0)
    }
}

/// Merge local and remote retrieval for one document into metadata patches.
///
/// For each rank up to `top_k`, the side with the higher score wins and
/// local wins ties. A patch is staged only when either side's score is
/// strictly greater than `threshold`.
pub fn merge_by_rank(
    local: &SimilarityRecord,
    remote: &SimilarityRecord,
    top_k: usize,
    threshold: f32,
) -> Vec<MetaPatch> {
    let mut patches = Vec::new();
    for rank in 1..=top_k {
        let local_sim = local.score_at(rank);
        let remote_sim = remote.score_at(rank);
        if local_sim <= threshold && remote_sim <= threshold {
            continue;
        }

        let (record, score) = if local_sim >= remote_sim {
            (local, local_sim)
        } else {
            (remote, remote_sim)
        };
        if let Some(m) = record.at_rank(rank) {
            patches.push(MetaPatch {
                document_id: record.document_id.clone(),
                rank,
                score,
                similar_to: m.candidate_id.clone(),
            });
        }
    }
    patches
}

/// Deterministic identifier of an ordered pair of document ids.
///
/// A name-based (v5, DNS namespace) UUID of the two ids concatenated in the
/// order given. `sim_id(a, b)` and `sim_id(b, a)` differ.
pub fn sim_id(a: &str, b: &str) -> String {
    let mut name = String::with_capacity(a.len() + b.len());
    name.push_str(a);
    name.push_str(b);
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes()).to_string()
}

/// Null-safe metadata accessor for display fields.
///
/// Missing keys and JSON `null` give `Ok(None)`, strings pass through,
/// numbers and booleans are rendered as text. Arrays and objects cannot be
/// displayed as a single column value and are an error.
pub fn meta_field(doc: &Document, key: &str) -> anyhow::Result<Option<String>> {
    match doc.meta.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => anyhow::bail!(
            "metadata field '{}' of document {} is not a scalar: {}",
            key,
            doc.id,
            other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, matches: &[(&str, f32)]) -> SimilarityRecord {
        SimilarityRecord {
            document_id: id.to_string(),
            matches: matches
                .iter()
                .enumerate()
                .map(|(i, (cand, score))| RankedMatch {
                    rank: i + 1,
                    candidate_id: cand.to_string(),
                    score: *score,
                })
                .collect(),
        }
    }

    #[test]
    fn test_merge_prefers_higher_score() {
        let local = record("d1", &[("l", 0.82)]);
        let remote = record("d1", &[("r", 0.95)]);
        let patches = merge_by_rank(&local, &remote, 1, 0.8);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].similar_to, "r");
        assert!((patches[0].score - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_merge_tie_prefers_local() {
        let local = record("d1", &[("l", 0.9)]);
        let remote = record("d1", &[("r", 0.9)]);
        let patches = merge_by_rank(&local, &remote, 1, 0.8);
        assert_eq!(patches[0].similar_to, "l");
    }

    #[test]
    fn test_merge_below_threshold_stages_nothing() {
        let local = record("d1", &[("l", 0.8)]);
        let remote = record("d1", &[("r", 0.5)]);
        assert!(merge_by_rank(&local, &remote, 1, 0.8).is_empty());
    }

    #[test]
    fn test_merge_one_side_above_threshold() {
        let local = record("d1", &[("l", 0.1)]);
        let remote = record("d1", &[("r", 0.81)]);
        let patches = merge_by_rank(&local, &remote, 1, 0.8);
        assert_eq!(patches[0].similar_to, "r");
    }

    #[test]
    fn test_merge_missing_side_counts_as_zero() {
        let local = SimilarityRecord::empty("d1");
        let remote = record("d1", &[("r", 0.9), ("s", 0.85)]);
        let patches = merge_by_rank(&local, &remote, 2, 0.8);
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[1].rank, 2);
        assert_eq!(patches[1].similar_to, "s");
    }

    #[test]
    fn test_sim_id_is_pure_and_ordered() {
        assert_eq!(sim_id("a1", "b2"), sim_id("a1", "b2"));
        assert_ne!(sim_id("a1", "b2"), sim_id("b2", "a1"));
        // name-based UUID over the plain concatenation
        assert_eq!(sim_id("ab", "c"), sim_id("a", "bc"));
    }

    #[test]
    fn test_meta_field_null_safe() {
        let doc = Document::new("d1", "x")
            .with_meta("title", "Tiêu đề")
            .with_meta("publish_date", Value::Null)
            .with_meta("views", 12)
            .with_meta("tags", serde_json::json!(["a"]));
        assert_eq!(meta_field(&doc, "title").unwrap().as_deref(), Some("Tiêu đề"));
        assert_eq!(meta_field(&doc, "publish_date").unwrap(), None);
        assert_eq!(meta_field(&doc, "domain").unwrap(), None);
        assert_eq!(meta_field(&doc, "views").unwrap().as_deref(), Some("12"));
        assert!(meta_field(&doc, "tags").is_err());
    }
}
