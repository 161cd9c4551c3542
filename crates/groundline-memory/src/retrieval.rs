use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::expansion::{QueryExpander, RuleBasedExpander};
use crate::hybrid::{Candidate, HybridOptions, HybridRetriever};
use crate::rerank::{RerankOptions, Reranker};

/// Options of [`EnhancedRetriever::retrieve`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalOptions {
    /// Maximum number of candidates returned.
    pub limit: usize,
    /// Merge vector and keyword search; otherwise vector search only.
    pub use_hybrid_search: bool,
    /// Search expanded query variants too.
    pub use_query_expansion: bool,
    /// Run the reranker over the merged candidates.
    pub rerank: bool,
    /// Candidates scoring below this are dropped.
    pub relevance_threshold: f32,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub rerank_options: RerankOptions,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            use_hybrid_search: true,
            use_query_expansion: false,
            rerank: true,
            relevance_threshold: 0.3,
            vector_weight: 0.7,
            keyword_weight: 0.3,
            rerank_options: RerankOptions::default(),
        }
    }
}

/// Full retrieval path: expansion, hybrid search, rerank, relevance cut.
pub struct EnhancedRetriever {
    hybrid: HybridRetriever,
    reranker: Reranker,
    expander: Arc<dyn QueryExpander>,
}

impl EnhancedRetriever {
    /// Create a retriever with the rule-based expander.
    pub fn new(hybrid: HybridRetriever, reranker: Reranker) -> Self {
        Self {
            hybrid,
            reranker,
            expander: Arc::new(RuleBasedExpander::new()),
        }
    }

    /// Replace the query expander. Chainable builder method.
    pub fn with_expander(mut self, expander: Arc<dyn QueryExpander>) -> Self {
        self.expander = expander;
        self
    }

    /// The hybrid retriever used for first-stage search.
    pub fn hybrid(&self) -> &HybridRetriever {
        &self.hybrid
    }

    /// Retrieve candidates for `query` from `collections`. Never fails; an
    /// empty list means nothing relevant was found or every backend failed.
    pub async fn retrieve(
        &self,
        query: &str,
        collections: &[String],
        options: &RetrievalOptions,
    ) -> Vec<Candidate> {
        let queries = if options.use_query_expansion {
            self.expander.expand(query)
        } else {
            vec![query.to_string()]
        };

        let hybrid_options = HybridOptions {
            // Over-fetch so reranking has something to reorder
            limit: options.limit.max(1) * 3,
            vector_weight: options.vector_weight,
            keyword_weight: if options.use_hybrid_search {
                options.keyword_weight
            } else {
                0.0
            },
        };

        let mut per_query = Vec::with_capacity(queries.len());
        for q in &queries {
            let results = if options.use_hybrid_search {
                self.hybrid.search(q, collections, hybrid_options).await
            } else {
                self.hybrid
                    .vector_search(q, collections)
                    .await
                    .unwrap_or_default()
            };
            per_query.push(results);
        }
        let mut candidates = merge_variants(per_query);

        if options.rerank {
            // The reranker must not cut below the requested limit.
            let rerank_options = RerankOptions {
                top_k: options.limit.max(options.rerank_options.top_k),
                ..options.rerank_options
            };
            candidates = self
                .reranker
                .rerank(query, candidates, &rerank_options)
                .await
                .into_iter()
                .map(|r| r.candidate)
                .collect();
        } else {
            candidates.sort_by(|a, b| {
                b.combined_score
                    .partial_cmp(&a.combined_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        candidates.retain(|c| c.score() >= options.relevance_threshold);
        candidates.truncate(options.limit);
        debug!(
            query_variants = queries.len(),
            returned = candidates.len(),
            "Enhanced retrieval complete"
        );
        candidates
    }
}

/// Merge results of several query variants by text, keeping the
/// best-scoring copy and first-seen order.
fn merge_variants(per_query: Vec<Vec<Candidate>>) -> Vec<Candidate> {
    let mut order: Vec<String> = Vec::new();
    let mut best: HashMap<String, Candidate> = HashMap::new();
    for candidate in per_query.into_iter().flatten() {
        match best.get(&candidate.content) {
            Some(existing) if existing.combined_score >= candidate.combined_score => {}
            Some(_) => {
                best.insert(candidate.content.clone(), candidate);
            }
            None => {
                order.push(candidate.content.clone());
                best.insert(candidate.content.clone(), candidate);
            }
        }
    }
    order
        .into_iter()
        .filter_map(|content| best.remove(&content))
        .collect()
}
