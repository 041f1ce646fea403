//! # TopDup Core
//!
//! Near-duplicate detection for news articles: document model, store
//! abstraction, vectorizer and vector index traits, the two-stage
//! retriever, and the sync and consolidation engines that drive them.
//!
//! This crate contains no database driver or configuration loading. Store
//! backends plug in through [`store::DocumentStore`] and
//! [`connection::StoreConnector`]; [`store::memory::InMemoryStore`] is
//! bundled for tests and embedding.

pub mod connection;
pub mod consolidate;
pub mod embedding;
pub mod error;
pub mod guard;
pub mod index;
pub mod models;
pub mod report;
pub mod retriever;
pub mod similarity;
pub mod store;
pub mod sync;
pub mod vectorizer;
