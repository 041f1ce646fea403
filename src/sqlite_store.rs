//! SQLite-backed [`DocumentStore`] implementation.
//!
//! Documents live in `documents` (metadata as a JSON object in
//! `meta_json`), vectors in `embeddings` keyed by `(document_id, slot)`.
//! The `similar_docs` relation is created lazily by the first append and
//! keyed on `sim_id` by [`ensure_sim_id_key`](DocumentStore::ensure_sim_id_key).

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, warn};

use topdup_core::connection::StoreConnector;
use topdup_core::embedding::{blob_to_vec, vec_to_blob};
use topdup_core::models::{Document, EmbeddingSlot, MetaPatch, SimilarDocRow, SimilarPair};
use topdup_core::report::BatchReport;
use topdup_core::store::{pairs_above_threshold, DocumentStore};

use crate::db::{self, PoolSettings};
use crate::migrate;

// Stays well under SQLite's bound-parameter limit.
const IN_BATCH: usize = 500;

/// SQLite implementation of the [`DocumentStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn relation_exists(&self) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='similar_docs'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Documents with embeddings, keyed by id.
    async fn load_documents(&self, ids: &[String]) -> Result<HashMap<String, Document>> {
        let mut docs = HashMap::with_capacity(ids.len());
        for batch in ids.chunks(IN_BATCH) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT id, content, meta_json, updated_at FROM documents WHERE id IN (",
            );
            let mut sep = qb.separated(", ");
            for id in batch {
                sep.push_bind(id.as_str());
            }
            sep.push_unseparated(")");
            for row in qb.build().fetch_all(&self.pool).await? {
                if let Some(doc) = readable_document(&row) {
                    docs.insert(doc.id.clone(), doc);
                }
            }

            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT document_id, slot, vector FROM embeddings WHERE document_id IN (",
            );
            let mut sep = qb.separated(", ");
            for id in batch {
                sep.push_bind(id.as_str());
            }
            sep.push_unseparated(")");
            for row in qb.build().fetch_all(&self.pool).await? {
                let id: String = row.get("document_id");
                let slot: String = row.get("slot");
                let blob: Vec<u8> = row.get("vector");
                if let (Some(doc), Some(slot)) = (docs.get_mut(&id), EmbeddingSlot::parse(&slot)) {
                    doc.embeddings.insert(slot, blob_to_vec(&blob));
                }
            }
        }
        Ok(docs)
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let id: String = row.get("id");
    let meta_json: String = row.get("meta_json");
    let meta: Map<String, Value> = serde_json::from_str(&meta_json)
        .with_context(|| format!("malformed metadata for document {}", id))?;
    Ok(Document {
        id,
        content: row.get("content"),
        meta,
        embeddings: Default::default(),
        updated_at: from_millis(row.get("updated_at")),
    })
}

/// A row whose metadata cannot be decoded is logged and left out.
fn readable_document(row: &SqliteRow) -> Option<Document> {
    match row_to_document(row) {
        Ok(doc) => Some(doc),
        Err(e) => {
            warn!(error = %format!("{:#}", e), "skipping unreadable document");
            None
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn document_ids(&self, since: Option<DateTime<Utc>>) -> Result<BTreeSet<String>> {
        let ids: Vec<String> = match since {
            Some(ts) => {
                sqlx::query_scalar("SELECT id FROM documents WHERE updated_at >= ?")
                    .bind(to_millis(ts))
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT id FROM documents")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(ids.into_iter().collect())
    }

    async fn documents_by_id(&self, ids: &[String]) -> Result<Vec<Document>> {
        let mut docs = self.load_documents(ids).await?;
        Ok(ids.iter().filter_map(|id| docs.remove(id)).collect())
    }

    async fn write_documents(&self, docs: &[Document]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for doc in docs {
            let meta_json = serde_json::to_string(&doc.meta)?;
            sqlx::query(
                r#"
                INSERT INTO documents (id, content, meta_json, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    content = excluded.content,
                    meta_json = excluded.meta_json,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&doc.id)
            .bind(&doc.content)
            .bind(&meta_json)
            .bind(to_millis(doc.updated_at))
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM embeddings WHERE document_id = ?")
                .bind(&doc.id)
                .execute(&mut *tx)
                .await?;

            for (slot, vector) in &doc.embeddings {
                sqlx::query(
                    "INSERT INTO embeddings (document_id, slot, dims, vector) VALUES (?, ?, ?, ?)",
                )
                .bind(&doc.id)
                .bind(slot.as_str())
                .bind(vector.len() as i64)
                .bind(vec_to_blob(vector))
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn write_embeddings(
        &self,
        slot: EmbeddingSlot,
        vectors: &[(String, Vec<f32>)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (id, vector) in vectors {
            sqlx::query(
                r#"
                INSERT INTO embeddings (document_id, slot, dims, vector)
                SELECT ?, ?, ?, ?
                WHERE EXISTS (SELECT 1 FROM documents WHERE id = ?)
                ON CONFLICT(document_id, slot) DO UPDATE SET
                    dims = excluded.dims,
                    vector = excluded.vector
                "#,
            )
            .bind(id)
            .bind(slot.as_str())
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_documents_meta(&self, patches: &[MetaPatch]) -> Result<BatchReport> {
        let now = to_millis(Utc::now());
        let mut report = BatchReport::new();

        // One statement per record; a failing record does not roll back the others.
        for patch in patches {
            let result = sqlx::query(
                r#"
                UPDATE documents
                SET meta_json = json_set(meta_json, ?, ?, ?, ?),
                    sim_updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(format!("$.sim_score_{}", patch.rank))
            .bind(patch.score as f64)
            .bind(format!("$.similar_to_{}", patch.rank))
            .bind(&patch.similar_to)
            .bind(now)
            .bind(&patch.document_id)
            .execute(&self.pool)
            .await;

            match result {
                Ok(r) if r.rows_affected() > 0 => report.record_ok(),
                Ok(_) => report.record_skip(&patch.document_id, "document not found"),
                Err(e) => report.record_skip(&patch.document_id, e),
            }
        }

        debug!(
            applied = report.processed,
            skipped = report.skipped.len(),
            "metadata chunk applied"
        );
        Ok(report)
    }

    async fn similar_documents_by_threshold(
        &self,
        threshold: f32,
        since: DateTime<Utc>,
    ) -> Result<Vec<SimilarPair>> {
        let rows = sqlx::query(
            "SELECT id, content, meta_json, updated_at FROM documents WHERE sim_updated_at >= ? ORDER BY id",
        )
        .bind(to_millis(since))
        .fetch_all(&self.pool)
        .await?;
        let annotated: Vec<Document> = rows.iter().filter_map(readable_document).collect();

        let targets: Vec<String> = annotated
            .iter()
            .flat_map(|d| d.similarity_annotations())
            .filter(|a| a.score > threshold)
            .map(|a| a.similar_to)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let resolved = self.load_documents(&targets).await?;

        Ok(pairs_above_threshold(&annotated, threshold, |id| {
            resolved.get(id).cloned()
        }))
    }

    async fn delete_all_documents(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM embeddings").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM documents").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn existing_sim_ids(&self) -> Result<HashSet<String>> {
        if !self.relation_exists().await? {
            return Ok(HashSet::new());
        }
        let ids: Vec<String> = sqlx::query_scalar("SELECT DISTINCT sim_id FROM similar_docs")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn append_similar_docs(&self, rows: &[SimilarDocRow]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS similar_docs (
                document_id_a TEXT NOT NULL,
                document_id_b TEXT NOT NULL,
                domain_a TEXT,
                domain_b TEXT,
                url_a TEXT,
                url_b TEXT,
                publish_date_a TEXT,
                publish_date_b TEXT,
                title_a TEXT,
                title_b TEXT,
                sim_score REAL NOT NULL,
                sim_id TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO similar_docs (document_id_a, document_id_b, domain_a, domain_b,
                                          url_a, url_b, publish_date_a, publish_date_b,
                                          title_a, title_b, sim_score, sim_id)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.document_id_a)
            .bind(&row.document_id_b)
            .bind(&row.domain_a)
            .bind(&row.domain_b)
            .bind(&row.url_a)
            .bind(&row.url_b)
            .bind(&row.publish_date_a)
            .bind(&row.publish_date_b)
            .bind(&row.title_a)
            .bind(&row.title_b)
            .bind(row.sim_score as f64)
            .bind(&row.sim_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(rows.len())
    }

    async fn ensure_sim_id_key(&self) -> Result<()> {
        if !self.relation_exists().await? {
            return Ok(());
        }
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_similar_docs_sim_id ON similar_docs(sim_id)",
        )
        .execute(&self.pool)
        .await
        .context("adding unique key on similar_docs.sim_id")?;
        Ok(())
    }
}

/// Opens a [`SqliteStore`] at a fixed path, creating the schema if needed.
pub struct SqliteConnector {
    name: String,
    path: PathBuf,
    settings: PoolSettings,
}

impl SqliteConnector {
    pub fn new(name: impl Into<String>, path: PathBuf, settings: PoolSettings) -> Self {
        Self {
            name: name.into(),
            path,
            settings,
        }
    }
}

#[async_trait]
impl StoreConnector for SqliteConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<Arc<dyn DocumentStore>> {
        let pool = db::connect(&self.path, &self.settings).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Arc::new(SqliteStore::new(pool)))
    }
}
