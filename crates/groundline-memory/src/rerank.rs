//! Second-pass rescoring of retrieval candidates.
//!
//! Four signals are blended:
//! - semantic: cosine similarity of query and candidate embeddings
//! - lexical: share of query tokens present in the candidate
//! - recency: `exp(-0.03 * age_hours)` from metadata `timestamp`, 0.5 if absent
//! - importance: metadata `importance`, 0.5 if absent

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::future::join_all;
use groundline_core::GroundingResult;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::hybrid::Candidate;
use crate::keyword::lexical_overlap;

/// Decay rate per hour of age.
const RECENCY_DECAY_PER_HOUR: f64 = 0.03;
/// Recency of candidates without a timestamp.
const NEUTRAL_RECENCY: f32 = 0.5;
/// Importance of candidates without a stored value.
const DEFAULT_IMPORTANCE: f32 = 0.5;

/// Metadata key holding the record timestamp.
pub const TIMESTAMP_KEY: &str = "timestamp";
/// Metadata key holding the record importance.
pub const IMPORTANCE_KEY: &str = "importance";

/// Weights of the four rerank signals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RerankWeights {
    pub semantic: f32,
    pub lexical: f32,
    pub recency: f32,
    pub importance: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            semantic: 0.6,
            lexical: 0.2,
            recency: 0.1,
            importance: 0.1,
        }
    }
}

/// Options of a rerank pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankOptions {
    pub weights: RerankWeights,
    pub top_k: usize,
    pub min_score: f32,
    pub require_minimum_score: bool,
}

impl Default for RerankOptions {
    fn default() -> Self {
        Self {
            weights: RerankWeights::default(),
            top_k: 5,
            min_score: 0.3,
            require_minimum_score: false,
        }
    }
}

/// A candidate with its individual signals and final score.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub candidate: Candidate,
    pub semantic: f32,
    pub lexical: f32,
    pub recency: f32,
    pub importance: f32,
    pub final_score: f32,
}

/// Reranker embedding query and candidates with the shared provider.
pub struct Reranker {
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Reranker {
    /// Create a reranker.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder }
    }

    /// Rerank relative to the current time.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        options: &RerankOptions,
    ) -> Vec<RankedCandidate> {
        self.rerank_at(query, candidates, options, Utc::now()).await
    }

    /// Rerank with an explicit "now" for recency.
    ///
    /// If any embedding fails, the full candidate set is returned ordered
    /// by stored importance alone (no minimum-score filtering, no
    /// truncation).
    pub async fn rerank_at(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        options: &RerankOptions,
        now: DateTime<Utc>,
    ) -> Vec<RankedCandidate> {
        if candidates.is_empty() {
            return Vec::new();
        }

        match self.semantic_scores(query, &candidates).await {
            Ok(semantic) => {
                let mut ranked: Vec<RankedCandidate> = candidates
                    .into_iter()
                    .zip(semantic)
                    .map(|(candidate, semantic)| score(query, candidate, semantic, options, now))
                    .filter(|r| !options.require_minimum_score || r.final_score >= options.min_score)
                    .collect();
                sort_desc(&mut ranked, |r| r.final_score);
                ranked.truncate(options.top_k);
                debug!(kept = ranked.len(), "Rerank complete");
                ranked
            }
            Err(e) => {
                warn!(error = %e, "Rerank embedding failed, ordering by importance");
                importance_fallback(candidates)
            }
        }
    }

    /// Cosine similarity of the query against every candidate, clamped to
    /// `[0, 1]`. Candidate embeddings are computed concurrently.
    async fn semantic_scores(
        &self,
        query: &str,
        candidates: &[Candidate],
    ) -> GroundingResult<Vec<f32>> {
        let query_vec = self.embedder.embed(query).await?;
        let embeddings = join_all(
            candidates
                .iter()
                .map(|c| self.embedder.embed(&c.content)),
        )
        .await;

        embeddings
            .into_iter()
            .map(|e| e.map(|v| cosine_similarity(&query_vec, &v).clamp(0.0, 1.0)))
            .collect()
    }
}

fn score(
    query: &str,
    mut candidate: Candidate,
    semantic: f32,
    options: &RerankOptions,
    now: DateTime<Utc>,
) -> RankedCandidate {
    let w = &options.weights;
    let lexical = lexical_overlap(query, &candidate.content);
    let recency = recency_score(&candidate, now);
    let importance = importance_of(&candidate);

    let final_score = (w.semantic * semantic
        + w.lexical * lexical
        + w.recency * recency
        + w.importance * importance)
        .clamp(0.0, 1.0);
    candidate.rerank_score = Some(final_score);

    RankedCandidate {
        candidate,
        semantic,
        lexical,
        recency,
        importance,
        final_score,
    }
}

fn importance_fallback(candidates: Vec<Candidate>) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = candidates
        .into_iter()
        .map(|mut candidate| {
            let importance = importance_of(&candidate);
            candidate.rerank_score = Some(importance);
            RankedCandidate {
                candidate,
                semantic: 0.0,
                lexical: 0.0,
                recency: NEUTRAL_RECENCY,
                importance,
                final_score: importance,
            }
        })
        .collect();
    sort_desc(&mut ranked, |r| r.importance);
    ranked
}

fn sort_desc(ranked: &mut [RankedCandidate], key: impl Fn(&RankedCandidate) -> f32) {
    ranked.sort_by(|a, b| {
        key(b)
            .partial_cmp(&key(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Stored importance clamped to `[0, 1]`, or 0.5.
pub fn importance_of(candidate: &Candidate) -> f32 {
    candidate
        .metadata
        .get(IMPORTANCE_KEY)
        .and_then(serde_json::Value::as_f64)
        .map_or(DEFAULT_IMPORTANCE, |v| (v as f32).clamp(0.0, 1.0))
}

/// Exponential recency decay, or 0.5 without a parseable timestamp.
pub fn recency_score(candidate: &Candidate, now: DateTime<Utc>) -> f32 {
    let Some(ts) = candidate.metadata.get(TIMESTAMP_KEY).and_then(parse_timestamp) else {
        return NEUTRAL_RECENCY;
    };
    let age_hours = ((now - ts).num_seconds() as f64 / 3600.0).max(0.0);
    (-RECENCY_DECAY_PER_HOUR * age_hours).exp() as f32
}

/// Accepts RFC 3339 strings and epoch milliseconds.
fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}
