use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use groundline_core::GroundingResult;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;
use crate::keyword::KeywordQuery;
use crate::store::{SimilarityQuery, VectorStore};

/// Minimum cosine similarity for a vector hit.
pub const VECTOR_SCORE_THRESHOLD: f32 = 0.3;
/// Maximum vector hits taken from each collection.
pub const VECTOR_LIMIT_PER_COLLECTION: usize = 20;

/// A retrieval result. Lives only for the duration of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub content: String,
    /// Collection the record came from.
    pub collection: String,
    pub vector_score: f32,
    pub lexical_score: f32,
    pub combined_score: f32,
    /// Set once the candidate went through the reranker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Candidate {
    /// The most refined score available: rerank score if present,
    /// otherwise the combined retrieval score.
    pub fn score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.combined_score)
    }
}

/// Options of a hybrid search.
///
/// The weights are meant to sum to 1.0 but this is not enforced; the
/// combined score is just the weighted sum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HybridOptions {
    pub limit: usize,
    pub vector_weight: f32,
    pub keyword_weight: f32,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            vector_weight: 0.7,
            keyword_weight: 0.3,
        }
    }
}

/// Hybrid retriever combining dense vector search with keyword search over
/// one or more collections.
///
/// Results of the two modalities are merged by exact text equality:
/// - present in both: `vector_weight * vector_score + keyword_weight * keyword_score`
/// - present in one: that modality's score
///
/// A failing vector search degrades to keyword-only results.
pub struct HybridRetriever {
    store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl HybridRetriever {
    /// Create a retriever over `store`.
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Run both searches and merge. Never fails.
    pub async fn search(
        &self,
        query: &str,
        collections: &[String],
        options: HybridOptions,
    ) -> Vec<Candidate> {
        let vector_results = match self.vector_search(query, collections).await {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "Vector search failed, using keyword results only");
                Vec::new()
            }
        };
        let keyword_results = self.keyword_search(query, collections).await;

        debug!(
            vector_hits = vector_results.len(),
            keyword_hits = keyword_results.len(),
            "Hybrid search candidates"
        );

        merge(vector_results, keyword_results, options)
    }

    /// Embed the query and query every collection concurrently
    /// (threshold 0.3, at most 20 hits per collection).
    pub async fn vector_search(
        &self,
        query: &str,
        collections: &[String],
    ) -> GroundingResult<Vec<Candidate>> {
        let embedding = self.embedder.embed(query).await?;

        let query = SimilarityQuery {
            limit: VECTOR_LIMIT_PER_COLLECTION,
            score_threshold: VECTOR_SCORE_THRESHOLD,
        };
        let searches = collections.iter().map(|name| {
            let collection = self.store.collection(name);
            let embedding = &embedding;
            async move { (name, collection.find_similar(embedding, query).await) }
        });

        let mut candidates = Vec::new();
        for (name, result) in join_all(searches).await {
            for hit in result? {
                candidates.push(Candidate {
                    content: hit.record.text.clone(),
                    collection: name.clone(),
                    vector_score: hit.score,
                    lexical_score: 0.0,
                    combined_score: hit.score,
                    rerank_score: None,
                    metadata: hit.record.metadata.clone(),
                });
            }
        }
        Ok(candidates)
    }

    /// Score every record of every collection against the query tokens.
    /// Records without any matching token are excluded.
    pub async fn keyword_search(&self, query: &str, collections: &[String]) -> Vec<Candidate> {
        let keywords = KeywordQuery::new(query);
        if keywords.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for name in collections {
            for record in self.store.collection(name).records().await {
                let score = keywords.score(&record.text);
                if score > 0.0 {
                    candidates.push(Candidate {
                        content: record.text.clone(),
                        collection: name.clone(),
                        vector_score: 0.0,
                        lexical_score: score,
                        combined_score: score,
                        rerank_score: None,
                        metadata: record.metadata.clone(),
                    });
                }
            }
        }
        candidates
    }
}

#[derive(Default)]
struct Merged {
    candidate: Option<Candidate>,
    vector: Option<f32>,
    keyword: Option<f32>,
}

/// Merge vector and keyword results by exact text, compute combined
/// scores, sort descending (stable), and keep the top `limit`.
///
/// When the same text shows up more than once within one modality (e.g. in
/// two collections) the highest score is kept.
pub fn merge(
    vector_results: Vec<Candidate>,
    keyword_results: Vec<Candidate>,
    options: HybridOptions,
) -> Vec<Candidate> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, Merged> = HashMap::new();

    for (candidate, is_vector) in vector_results
        .into_iter()
        .map(|c| (c, true))
        .chain(keyword_results.into_iter().map(|c| (c, false)))
    {
        let slot = merged.entry(candidate.content.clone()).or_insert_with(|| {
            order.push(candidate.content.clone());
            Merged::default()
        });
        let (score, best) = if is_vector {
            (candidate.vector_score, &mut slot.vector)
        } else {
            (candidate.lexical_score, &mut slot.keyword)
        };
        *best = Some(best.map_or(score, |b| b.max(score)));
        if slot.candidate.is_none() {
            slot.candidate = Some(candidate);
        }
    }

    let mut results: Vec<Candidate> = order
        .into_iter()
        .filter_map(|content| merged.remove(&content))
        .filter_map(|m| {
            let mut candidate = m.candidate?;
            candidate.vector_score = m.vector.unwrap_or(0.0);
            candidate.lexical_score = m.keyword.unwrap_or(0.0);
            candidate.combined_score = match (m.vector, m.keyword) {
                (Some(v), Some(k)) => options.vector_weight * v + options.keyword_weight * k,
                (Some(v), None) => v,
                (None, Some(k)) => k,
                (None, None) => 0.0,
            };
            Some(candidate)
        })
        .collect();

    results.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(options.limit);
    results
}
