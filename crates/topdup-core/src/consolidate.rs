//! Pairwise consolidation of similarity metadata into `similar_docs`.
//!
//! Each run reads the pairs whose recorded score exceeds the threshold
//! within the lookback window, turns them into display rows and appends the
//! rows not yet persisted. Deduplication is by unordered document pair, so
//! re-running over the same window never grows the relation.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use tracing::{debug, error, info};

use crate::connection::Connection;
use crate::guard::JobGuard;
use crate::models::{SimilarDocRow, SimilarPair};
use crate::store::DocumentStore;
use crate::report::BatchReport;
use crate::similarity::{meta_field, sim_id};

#[derive(Debug, Clone)]
pub struct ConsolidationParams {
    pub threshold: f32,
    pub lookback: Duration,
}

#[derive(Debug, Clone)]
pub enum ConsolidationOutcome {
    Skipped,
    Aborted { reason: String },
    /// Nothing above the threshold inside the window.
    NoPairs,
    /// Every pair found was already persisted or could not be extracted.
    NothingNew { report: BatchReport },
    Completed { inserted: usize, report: BatchReport },
}

pub struct ConsolidationEngine {
    params: ConsolidationParams,
    remote: Arc<Connection>,
    guard: JobGuard,
}

/// Build the persisted row for one pair. Fails when a display field holds
/// a non-scalar value.
pub fn similar_doc_row(pair: &SimilarPair) -> Result<SimilarDocRow> {
    let (a, b) = (&pair.source, &pair.target);
    Ok(SimilarDocRow {
        document_id_a: a.id.clone(),
        document_id_b: b.id.clone(),
        domain_a: meta_field(a, "domain")?,
        domain_b: meta_field(b, "domain")?,
        url_a: meta_field(a, "url")?,
        url_b: meta_field(b, "url")?,
        publish_date_a: meta_field(a, "publish_date")?,
        publish_date_b: meta_field(b, "publish_date")?,
        title_a: meta_field(a, "title")?,
        title_b: meta_field(b, "title")?,
        sim_score: pair.score,
        sim_id: sim_id(&a.id, &b.id),
    })
}

/// Drop rows already persisted under either ordering of their pair, and
/// keep only the first row per unordered pair within `rows`.
fn unseen_rows(rows: Vec<SimilarDocRow>, existing: &HashSet<String>) -> Vec<SimilarDocRow> {
    let mut batch: HashSet<(String, String)> = HashSet::new();
    rows.into_iter()
        .filter(|row| {
            let reversed = sim_id(&row.document_id_b, &row.document_id_a);
            if existing.contains(&row.sim_id) || existing.contains(&reversed) {
                return false;
            }
            let key = if row.document_id_a <= row.document_id_b {
                (row.document_id_a.clone(), row.document_id_b.clone())
            } else {
                (row.document_id_b.clone(), row.document_id_a.clone())
            };
            batch.insert(key)
        })
        .collect()
}

// Attempted on every run; an absent relation or an existing key is fine.
async fn heal_sim_id_key(store: &dyn DocumentStore) {
    if let Err(e) = store.ensure_sim_id_key().await {
        debug!(error = %e, "sim_id key not added");
    }
}

impl ConsolidationEngine {
    pub fn new(params: ConsolidationParams, remote: Arc<Connection>) -> Self {
        Self {
            params,
            remote,
            guard: JobGuard::new("consolidation"),
        }
    }

    /// One consolidation invocation. Never returns an error.
    pub async fn run_consolidation(&self) -> ConsolidationOutcome {
        let Some(_permit) = self.guard.try_start() else {
            info!(job = self.guard.name(), "previous run still in flight, skipping");
            return ConsolidationOutcome::Skipped;
        };

        match self.consolidate_once().await {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = format!("{:#}", e);
                error!(error = %reason, "consolidation aborted");
                ConsolidationOutcome::Aborted { reason }
            }
        }
    }

    async fn consolidate_once(&self) -> Result<ConsolidationOutcome> {
        let store = self.remote.acquire().await?;
        let since = Utc::now() - self.params.lookback;

        let pairs = store
            .similar_documents_by_threshold(self.params.threshold, since)
            .await
            .context("querying similar documents")?;
        if pairs.is_empty() {
            heal_sim_id_key(store.as_ref()).await;
            info!("no new similar docs");
            return Ok(ConsolidationOutcome::NoPairs);
        }

        let mut report = BatchReport::new();
        let mut rows = Vec::with_capacity(pairs.len());
        for pair in &pairs {
            match similar_doc_row(pair) {
                Ok(row) => {
                    rows.push(row);
                    report.record_ok();
                }
                Err(e) => report.record_skip(
                    format!("{}:{}", pair.source.id, pair.target.id),
                    format!("{:#}", e),
                ),
            }
        }

        let existing = store
            .existing_sim_ids()
            .await
            .context("loading existing sim ids")?;
        let fresh = unseen_rows(rows, &existing);

        let inserted = if fresh.is_empty() {
            0
        } else {
            store
                .append_similar_docs(&fresh)
                .await
                .context("appending similar docs")?
        };

        heal_sim_id_key(store.as_ref()).await;

        if inserted == 0 {
            info!("no new similar docs");
            Ok(ConsolidationOutcome::NothingNew { report })
        } else {
            info!(inserted, "similar docs appended");
            Ok(ConsolidationOutcome::Completed { inserted, report })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::FixedConnector;
    use crate::models::Document;
    use crate::store::memory::InMemoryStore;

    fn pair(a: &str, b: &str) -> SimilarPair {
        SimilarPair {
            source: Document::new(a, "x").with_meta("domain", "vnexpress.net"),
            target: Document::new(b, "y").with_meta("title", "Tin mới"),
            score: 0.9,
        }
    }

    #[test]
    fn test_row_carries_display_fields() {
        let row = similar_doc_row(&pair("a", "b")).unwrap();
        assert_eq!(row.domain_a.as_deref(), Some("vnexpress.net"));
        assert_eq!(row.domain_b, None);
        assert_eq!(row.title_b.as_deref(), Some("Tin mới"));
        assert_eq!(row.sim_id, sim_id("a", "b"));
    }

    #[test]
    fn test_row_rejects_structured_meta() {
        let mut p = pair("a", "b");
        p.target = p.target.with_meta("url", serde_json::json!({"href": "x"}));
        assert!(similar_doc_row(&p).is_err());
    }

    #[test]
    fn test_unseen_rows_dedups_both_orders() {
        let rows = vec![
            similar_doc_row(&pair("a", "b")).unwrap(),
            similar_doc_row(&pair("b", "a")).unwrap(),
            similar_doc_row(&pair("c", "d")).unwrap(),
        ];
        let existing: HashSet<String> = [sim_id("d", "c")].into_iter().collect();
        let fresh = unseen_rows(rows, &existing);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].document_id_a, "a");
    }

    #[tokio::test]
    async fn test_empty_window_still_keys_relation() {
        let store = Arc::new(InMemoryStore::new());
        store
            .append_similar_docs(&[similar_doc_row(&pair("a", "b")).unwrap()])
            .await
            .unwrap();
        assert!(!store.sim_id_keyed());

        let engine = ConsolidationEngine::new(
            ConsolidationParams {
                threshold: 0.8,
                lookback: Duration::seconds(180),
            },
            Arc::new(Connection::new(Box::new(FixedConnector::new(
                "remote",
                store.clone(),
            )))),
        );
        assert!(matches!(
            engine.run_consolidation().await,
            ConsolidationOutcome::NoPairs
        ));
        assert!(store.sim_id_keyed());
        assert_eq!(store.similar_docs().map(|rows| rows.len()), Some(1));
    }

    #[tokio::test]
    async fn test_empty_window_does_not_create_relation() {
        let store = Arc::new(InMemoryStore::new());
        let engine = ConsolidationEngine::new(
            ConsolidationParams {
                threshold: 0.8,
                lookback: Duration::seconds(180),
            },
            Arc::new(Connection::new(Box::new(FixedConnector::new(
                "remote",
                store.clone(),
            )))),
        );
        assert!(matches!(
            engine.run_consolidation().await,
            ConsolidationOutcome::NoPairs
        ));
        assert!(store.similar_docs().is_none());
    }
}
