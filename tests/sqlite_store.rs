//! Integration tests for the SQLite `DocumentStore` adapter.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tempfile::TempDir;

use topdup::db::{self, PoolSettings};
use topdup::migrate;
use topdup::sqlite_store::{SqliteConnector, SqliteStore};
use topdup_core::connection::Connection;
use topdup_core::models::{Document, EmbeddingSlot, MetaPatch, SimilarDocRow};
use topdup_core::similarity::sim_id;
use topdup_core::store::DocumentStore;

fn settings() -> PoolSettings {
    PoolSettings {
        timeout: std::time::Duration::from_secs(5),
        max_connections: 2,
    }
}

async fn open_store(tmp: &TempDir) -> SqliteStore {
    let pool = db::connect(&tmp.path().join("store.db"), &settings())
        .await
        .unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    SqliteStore::new(pool)
}

fn patch(id: &str, score: f32, to: &str) -> MetaPatch {
    MetaPatch {
        document_id: id.to_string(),
        rank: 1,
        score,
        similar_to: to.to_string(),
    }
}

fn row(a: &str, b: &str) -> SimilarDocRow {
    SimilarDocRow {
        document_id_a: a.to_string(),
        document_id_b: b.to_string(),
        domain_a: Some("vnexpress.net".to_string()),
        domain_b: None,
        url_a: None,
        url_b: None,
        publish_date_a: None,
        publish_date_b: None,
        title_a: None,
        title_b: None,
        sim_score: 0.91,
        sim_id: sim_id(a, b),
    }
}

#[tokio::test]
async fn test_documents_roundtrip_in_request_order() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;

    let mut a = Document::new("a", "Giá vàng hôm nay")
        .with_meta("domain", "vnexpress.net")
        .with_meta("publish_date", json!(null));
    a.embeddings
        .insert(EmbeddingSlot::Candidate, vec![0.5, -0.25, 1.0]);
    let b = Document::new("b", "Thời tiết Hà Nội");
    store.write_documents(&[a.clone(), b]).await.unwrap();

    let docs = store
        .documents_by_id(&["b".to_string(), "ghost".to_string(), "a".to_string()])
        .await
        .unwrap();
    let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);

    let got = &docs[1];
    assert_eq!(got.content, "Giá vàng hôm nay");
    assert_eq!(got.meta["domain"], "vnexpress.net");
    assert!(got.meta["publish_date"].is_null());
    assert_eq!(
        got.embedding(EmbeddingSlot::Candidate),
        Some(&[0.5, -0.25, 1.0][..])
    );
    assert_eq!(
        got.updated_at.timestamp_millis(),
        a.updated_at.timestamp_millis()
    );
}

#[tokio::test]
async fn test_document_ids_since() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    let now = Utc::now();
    store
        .write_documents(&[
            Document::new("old", "x").with_updated_at(now - Duration::days(10)),
            Document::new("new", "y").with_updated_at(now),
        ])
        .await
        .unwrap();

    let recent = store
        .document_ids(Some(now - Duration::minutes(3)))
        .await
        .unwrap();
    assert_eq!(recent.into_iter().collect::<Vec<_>>(), vec!["new"]);
    assert_eq!(store.document_ids(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_write_embeddings_ignores_unknown_documents() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    store
        .write_documents(&[Document::new("a", "x")])
        .await
        .unwrap();

    store
        .write_embeddings(
            EmbeddingSlot::Retriever,
            &[("a".to_string(), vec![1.0, 2.0]), ("ghost".to_string(), vec![3.0])],
        )
        .await
        .unwrap();
    store
        .write_embeddings(EmbeddingSlot::Retriever, &[("a".to_string(), vec![4.0, 5.0])])
        .await
        .unwrap();

    let doc = store
        .documents_by_id(&["a".to_string()])
        .await
        .unwrap()
        .remove(0);
    assert_eq!(doc.embedding(EmbeddingSlot::Retriever), Some(&[4.0, 5.0][..]));
    assert_eq!(doc.embedding(EmbeddingSlot::Candidate), None);
}

#[tokio::test]
async fn test_meta_patches_merge_and_report_missing() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    store
        .write_documents(&[
            Document::new("a", "x").with_meta("title", "Tiêu đề"),
            Document::new("b", "y"),
        ])
        .await
        .unwrap();

    let report = store
        .update_documents_meta(&[patch("ghost", 0.9, "a"), patch("a", 0.9, "b")])
        .await
        .unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].id, "ghost");

    let a = store
        .documents_by_id(&["a".to_string()])
        .await
        .unwrap()
        .remove(0);
    assert_eq!(a.meta["title"], "Tiêu đề");
    assert_eq!(a.meta["similar_to_1"], "b");
    assert!((a.meta["sim_score_1"].as_f64().unwrap() - 0.9).abs() < 1e-6);
}

#[tokio::test]
async fn test_similar_documents_threshold_is_exclusive() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    store
        .write_documents(&[
            Document::new("a", "x").with_meta("url", "https://a.vn"),
            Document::new("b", "y"),
            Document::new("c", "z"),
        ])
        .await
        .unwrap();
    store
        .update_documents_meta(&[patch("a", 0.8, "b"), patch("c", 0.95, "a")])
        .await
        .unwrap();

    let pairs = store
        .similar_documents_by_threshold(0.8, Utc::now() - Duration::minutes(3))
        .await
        .unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].source.id, "c");
    assert_eq!(pairs[0].target.id, "a");
    assert_eq!(pairs[0].target.meta["url"], "https://a.vn");

    let later = store
        .similar_documents_by_threshold(0.8, Utc::now() + Duration::minutes(1))
        .await
        .unwrap();
    assert!(later.is_empty());
}

#[tokio::test]
async fn test_malformed_metadata_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    store
        .write_documents(&[
            Document::new("a", "x").with_meta("domain", "vnexpress.net"),
            Document::new("b", "y").with_meta("domain", "d.vn"),
        ])
        .await
        .unwrap();
    sqlx::query("UPDATE documents SET meta_json = ? WHERE id = 'b'")
        .bind(r#"{"domain": "d.vn", bad"#)
        .execute(store.pool())
        .await
        .unwrap();
    store
        .update_documents_meta(&[patch("a", 0.9, "b")])
        .await
        .unwrap();

    let docs = store
        .documents_by_id(&["a".to_string(), "b".to_string()])
        .await
        .unwrap();
    let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["a"]);

    // The pair pointing at the unreadable document is never produced.
    let pairs = store
        .similar_documents_by_threshold(0.8, Utc::now() - Duration::minutes(3))
        .await
        .unwrap();
    assert!(pairs.is_empty());
}

#[tokio::test]
async fn test_similar_docs_relation_lifecycle() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;

    // No relation yet: both reads and key healing are no-ops.
    assert!(store.existing_sim_ids().await.unwrap().is_empty());
    store.ensure_sim_id_key().await.unwrap();

    assert_eq!(store.append_similar_docs(&[row("a", "b")]).await.unwrap(), 1);
    store.ensure_sim_id_key().await.unwrap();
    store.ensure_sim_id_key().await.unwrap();

    let ids = store.existing_sim_ids().await.unwrap();
    assert!(ids.contains(&sim_id("a", "b")));

    // Keyed relation rejects a duplicate sim_id.
    assert!(store.append_similar_docs(&[row("a", "b")]).await.is_err());
    assert_eq!(store.existing_sim_ids().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_key_healing_fails_on_duplicate_rows() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    store
        .append_similar_docs(&[row("a", "b"), row("a", "b")])
        .await
        .unwrap();
    assert!(store.ensure_sim_id_key().await.is_err());
}

#[tokio::test]
async fn test_delete_all_keeps_relation() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp).await;
    store
        .write_documents(&[Document::new("a", "x")])
        .await
        .unwrap();
    store.append_similar_docs(&[row("a", "b")]).await.unwrap();

    store.delete_all_documents().await.unwrap();
    assert!(store.document_ids(None).await.unwrap().is_empty());
    assert_eq!(store.existing_sim_ids().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_connector_creates_schema() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("nested").join("remote.db");
    let conn = Connection::new(Box::new(SqliteConnector::new(
        "remote",
        path.clone(),
        settings(),
    )));

    let store: Arc<dyn DocumentStore> = conn.acquire().await.unwrap();
    assert!(path.exists());
    assert!(store.document_ids(None).await.unwrap().is_empty());
    assert_eq!(conn.name(), "remote");
}
