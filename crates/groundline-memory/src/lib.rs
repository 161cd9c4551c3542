//! Retrieval layer of the grounding engine.
//!
//! Provides text embeddings with a local fallback, an in-memory vector
//! store of named collections with JSON snapshots, keyword scoring,
//! hybrid (vector + keyword) search, rule-based query expansion, and a
//! multi-signal reranker.
//!
//! # Main types
//!
//! - [`EmbeddingProvider`] — Trait for turning text into fixed-length vectors.
//! - [`FallbackEmbedder`] — Wraps a primary model and degrades to [`LocalEmbedding`].
//! - [`VectorStore`] — Named [`Collection`]s of [`Record`]s with cosine search.
//! - [`HybridRetriever`] — Merges vector and keyword search across collections.
//! - [`Reranker`] — Rescores candidates on semantic, lexical, recency, and importance signals.
//! - [`EnhancedRetriever`] — Expansion, hybrid search, rerank, and relevance cut in one call.

/// Embedding provider trait, local embedding and fallback wrapper.
pub mod embedding;
/// Query expansion for improved recall.
pub mod expansion;
/// Hybrid search combining vector similarity and keyword scores.
pub mod hybrid;
/// Keyword scoring of texts against a query.
pub mod keyword;
/// Multi-signal reranking of retrieval candidates.
pub mod rerank;
/// The full retrieval pipeline.
pub mod retrieval;
/// JSON snapshots of the vector store.
pub mod snapshot;
/// In-memory vector store.
pub mod store;

/// Embedding model served over HTTP.
#[cfg(feature = "http-embeddings")]
pub mod http;

pub use embedding::{
    cosine_similarity, EmbeddingProvider, FallbackEmbedder, LocalEmbedding, DEFAULT_DIMENSION,
};
pub use expansion::{QueryExpander, RuleBasedExpander};
#[cfg(feature = "http-embeddings")]
pub use http::HttpEmbedding;
pub use hybrid::{Candidate, HybridOptions, HybridRetriever};
pub use keyword::{lexical_overlap, KeywordQuery};
pub use rerank::{RankedCandidate, RerankOptions, RerankWeights, Reranker};
pub use retrieval::{EnhancedRetriever, RetrievalOptions};
pub use snapshot::CollectionSnapshot;
pub use store::{AccessStats, Collection, Record, ScoredRecord, SimilarityQuery, VectorStore};
