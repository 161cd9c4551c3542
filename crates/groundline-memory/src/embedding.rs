use async_trait::async_trait;
use groundline_core::{GroundingError, GroundingResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Default embedding dimension, matching the small sentence-transformer
/// models the engine is usually paired with.
pub const DEFAULT_DIMENSION: usize = 384;

/// Trait for computing text embeddings (vector representations).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute embedding vector for a single text.
    async fn embed(&self, text: &str) -> GroundingResult<Vec<f32>>;

    /// Compute embeddings for a batch of texts.
    async fn embed_batch(&self, texts: &[&str]) -> GroundingResult<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Dimension of the embedding vectors produced by this provider.
    fn dimension(&self) -> usize;

    /// Short provider name for logs.
    fn name(&self) -> &str;
}

/// Deterministic simulated embedding used whenever no model is available.
///
/// The vector mixes two signals: character-code frequencies (a coarse
/// spelling fingerprint) and hashed token frequencies (a bag of words).
/// The result is L2-normalized. Empty or symbol-only text yields the zero
/// vector, which has similarity 0 with everything.
#[derive(Debug, Clone)]
pub struct LocalEmbedding {
    dimension: usize,
}

/// Weight of the character-code component relative to the token component.
const CHAR_WEIGHT: f32 = 0.35;

impl LocalEmbedding {
    /// Create a local embedding of the given dimension (at least 1).
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Compute the vector synchronously. Never fails.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();

        let chars: Vec<char> = lowered.chars().filter(|c| c.is_alphanumeric()).collect();
        if !chars.is_empty() {
            let share = CHAR_WEIGHT / chars.len() as f32;
            for c in &chars {
                vector[(*c as u32 as usize) % self.dimension] += share;
            }
        }

        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 1)
            .collect();

        let mut freq: HashMap<&str, f32> = HashMap::new();
        for word in &words {
            *freq.entry(word).or_insert(0.0) += 1.0;
        }

        let total = words.len() as f32;
        if total > 0.0 {
            // Hash each word to several dimensions for better distribution
            for (word, count) in &freq {
                let tf = count / total;
                let hash1 = simple_hash(word.as_bytes()) as usize;
                let hash2 = simple_hash(&[word.as_bytes(), &[1u8]].concat()) as usize;
                let hash3 = simple_hash(&[word.as_bytes(), &[2u8]].concat()) as usize;

                vector[hash1 % self.dimension] += tf;
                vector[hash2 % self.dimension] += tf * 0.7;
                vector[hash3 % self.dimension] += tf * 0.5;
            }
        }

        normalize(&mut vector);
        vector
    }
}

impl Default for LocalEmbedding {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, text: &str) -> GroundingResult<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Embedding provider that prefers a model and falls back to
/// [`LocalEmbedding`] whenever the model errors or returns a vector of the
/// wrong dimension.
///
/// The current mode is tracked so callers can tell whether high-quality
/// embeddings are actually being served (see [`FallbackEmbedder::is_ready`]).
pub struct FallbackEmbedder {
    primary: Option<Arc<dyn EmbeddingProvider>>,
    fallback: LocalEmbedding,
    in_fallback: AtomicBool,
}

impl FallbackEmbedder {
    /// Wrap a model-backed provider. The fallback uses the same dimension.
    pub fn new(primary: Arc<dyn EmbeddingProvider>) -> Self {
        let fallback = LocalEmbedding::new(primary.dimension());
        Self {
            primary: Some(primary),
            fallback,
            in_fallback: AtomicBool::new(false),
        }
    }

    /// No model at all: permanently in fallback mode.
    pub fn local_only(dimension: usize) -> Self {
        Self {
            primary: None,
            fallback: LocalEmbedding::new(dimension),
            in_fallback: AtomicBool::new(true),
        }
    }

    /// `true` while the model-backed provider is serving embeddings.
    pub fn is_ready(&self) -> bool {
        !self.is_fallback()
    }

    /// `true` while embeddings come from the deterministic fallback.
    pub fn is_fallback(&self) -> bool {
        self.in_fallback.load(Ordering::Relaxed)
    }

    fn enter_fallback(&self, provider: &str, reason: &str) {
        if !self.in_fallback.swap(true, Ordering::Relaxed) {
            warn!(provider, reason, "Embedding model unavailable, using local fallback");
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FallbackEmbedder {
    async fn embed(&self, text: &str) -> GroundingResult<Vec<f32>> {
        let Some(primary) = &self.primary else {
            return Ok(self.fallback.embed_text(text));
        };

        match primary.embed(text).await {
            Ok(vector) if vector.len() == self.fallback.dimension => {
                if self.in_fallback.swap(false, Ordering::Relaxed) {
                    info!(provider = primary.name(), "Embedding model recovered");
                }
                Ok(vector)
            }
            Ok(vector) => {
                let reason = format!(
                    "expected dimension {}, got {}",
                    self.fallback.dimension,
                    vector.len()
                );
                self.enter_fallback(primary.name(), &reason);
                Ok(self.fallback.embed_text(text))
            }
            Err(e) => {
                self.enter_fallback(primary.name(), &e.to_string());
                Ok(self.fallback.embed_text(text))
            }
        }
    }

    fn dimension(&self) -> usize {
        self.fallback.dimension
    }

    fn name(&self) -> &str {
        match &self.primary {
            Some(p) if !self.is_fallback() => p.name(),
            _ => self.fallback.name(),
        }
    }
}

/// Cosine similarity between two vectors, in `[-1, 1]`.
///
/// Returns 0 when either vector is empty, the lengths differ, or either
/// magnitude is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        (dot / (na * nb)).clamp(-1.0, 1.0)
    }
}

/// Reject vectors containing NaN or infinite components.
pub fn validate_vector(vector: &[f32]) -> GroundingResult<()> {
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(GroundingError::Embedding(
            "vector contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Simple deterministic hash function (FNV-1a).
fn simple_hash(data: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct BrokenModel;

    #[async_trait]
    impl EmbeddingProvider for BrokenModel {
        async fn embed(&self, _text: &str) -> GroundingResult<Vec<f32>> {
            Err(GroundingError::Embedding("model offline".to_string()))
        }
        fn dimension(&self) -> usize {
            64
        }
        fn name(&self) -> &str {
            "broken"
        }
    }

    struct WrongDimension;

    #[async_trait]
    impl EmbeddingProvider for WrongDimension {
        async fn embed(&self, _text: &str) -> GroundingResult<Vec<f32>> {
            Ok(vec![1.0; 3])
        }
        fn dimension(&self) -> usize {
            8
        }
        fn name(&self) -> &str {
            "wrong-dim"
        }
    }

    #[tokio::test]
    async fn test_local_embedding_dimension() {
        let emb = LocalEmbedding::new(128);
        assert_eq!(emb.dimension(), 128);
        let vec = emb.embed("hello world").await.unwrap();
        assert_eq!(vec.len(), 128);
    }

    #[tokio::test]
    async fn test_local_embedding_normalized() {
        let emb = LocalEmbedding::default();
        let vec = emb.embed("the quick brown fox jumps").await.unwrap();
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_local_embedding_similar_texts() {
        let emb = LocalEmbedding::default();
        let v1 = emb.embed("rust programming language").await.unwrap();
        let v2 = emb.embed("rust programming systems").await.unwrap();
        let v3 = emb.embed("cooking recipes for dinner").await.unwrap();

        let sim_12 = cosine_similarity(&v1, &v2);
        let sim_13 = cosine_similarity(&v1, &v3);

        assert!(
            sim_12 > sim_13,
            "sim(rust-rust)={sim_12} should be > sim(rust-cooking)={sim_13}"
        );
    }

    #[tokio::test]
    async fn test_local_embedding_empty_is_zero_vector() {
        let emb = LocalEmbedding::new(16);
        let vec = emb.embed("").await.unwrap();
        assert_eq!(vec, vec![0.0; 16]);
    }

    #[tokio::test]
    async fn test_local_embedding_deterministic() {
        let emb = LocalEmbedding::default();
        let v1 = emb.embed("test input").await.unwrap();
        let v2 = emb.embed("test input").await.unwrap();
        assert_eq!(v1, v2);
    }

    #[tokio::test]
    async fn test_embed_batch() {
        let emb = LocalEmbedding::default();
        let vecs = emb.embed_batch(&["hello", "world"]).await.unwrap();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[0].len(), DEFAULT_DIMENSION);
    }

    #[tokio::test]
    async fn test_fallback_on_model_error() {
        let emb = FallbackEmbedder::new(Arc::new(BrokenModel));
        assert!(emb.is_ready());

        let vec = emb.embed("feeling anxious").await.unwrap();
        assert_eq!(vec.len(), 64);
        assert!(emb.is_fallback());
        assert!(!emb.is_ready());
        assert_eq!(emb.name(), "local");
        assert_eq!(vec, LocalEmbedding::new(64).embed_text("feeling anxious"));
    }

    #[tokio::test]
    async fn test_fallback_on_wrong_dimension() {
        let emb = FallbackEmbedder::new(Arc::new(WrongDimension));
        let vec = emb.embed("anything").await.unwrap();
        assert_eq!(vec.len(), 8);
        assert!(emb.is_fallback());
    }

    #[tokio::test]
    async fn test_local_only_is_never_ready() {
        let emb = FallbackEmbedder::local_only(32);
        assert!(!emb.is_ready());
        assert_eq!(emb.embed("x y").await.unwrap().len(), 32);
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let v = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_validate_vector() {
        assert!(validate_vector(&[0.1, 0.2]).is_ok());
        assert!(validate_vector(&[f32::NAN]).is_err());
    }
}
