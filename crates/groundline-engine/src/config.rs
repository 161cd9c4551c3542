use std::path::{Path, PathBuf};

use groundline_core::{GroundingError, GroundingResult};
use groundline_memory::{RerankOptions, RetrievalOptions, DEFAULT_DIMENSION};
use groundline_verify::{DetectorConfig, DEDUPE_THRESHOLD};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Collection holding reference knowledge.
pub const KNOWLEDGE_COLLECTION: &str = "knowledge";
/// Collection holding captured conversation exchanges.
pub const MEMORY_COLLECTION: &str = "conversation_memory";

/// Top-level engine configuration, usually read from `groundline.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Embedding backend.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Vector store persistence.
    #[serde(default)]
    pub store: StoreConfig,
    /// Default pipeline options.
    #[serde(default)]
    pub pipeline: PipelineOptions,
    /// Detector and corrector tunables.
    #[serde(default)]
    pub detection: DetectionConfig,
}

impl EngineConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> GroundingResult<Self> {
        toml::from_str(s).map_err(|e| GroundingError::Config(e.to_string()))
    }

    /// Read a TOML file. A missing file yields the defaults.
    pub async fn load(path: &Path) -> GroundingResult<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(s) => Self::from_toml_str(&s).map_err(|e| {
                GroundingError::Config(format!("{}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Deterministic local vectors only.
    #[default]
    Local,
    /// OpenAI-compatible HTTP model with local fallback.
    Http,
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend kind.
    #[serde(default)]
    pub provider: EmbeddingBackend,
    /// Vector dimension of every collection.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Base URL of the model server (`http` provider).
    #[serde(default)]
    pub url: Option<String>,
    /// Model name sent to the server.
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::default(),
            dimension: default_dimension(),
            url: None,
            model: default_model(),
            api_key_env: None,
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory for warm-start snapshots. No snapshots when unset.
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
}

/// `[pipeline]` section: the options bag of the hallucination-prevention
/// pipeline and of enhanced retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Launch the background grounding lookup.
    #[serde(default = "default_true")]
    pub enable_rag: bool,
    /// Run the claim verifier.
    #[serde(default = "default_true")]
    pub enable_reasoning: bool,
    /// Run the hallucination detector and corrector.
    #[serde(default = "default_true")]
    pub enable_detection: bool,
    /// Claims below this confidence make a reply unsound.
    #[serde(default = "default_reasoning_threshold")]
    pub reasoning_threshold: f32,
    /// Rerank retrieval candidates.
    #[serde(default = "default_true")]
    pub rerank: bool,
    /// Combine vector and keyword search.
    #[serde(default = "default_true")]
    pub use_hybrid_search: bool,
    /// Search with rule-based query variants too.
    #[serde(default)]
    pub use_query_expansion: bool,
    /// Candidates scoring below this are dropped.
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,
    /// Maximum candidates per retrieval.
    #[serde(default = "default_retrieval_limit")]
    pub retrieval_limit: usize,
    /// Collections searched when no topics are given.
    #[serde(default = "default_grounding_collections")]
    pub grounding_collections: Vec<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            enable_rag: true,
            enable_reasoning: true,
            enable_detection: true,
            reasoning_threshold: default_reasoning_threshold(),
            rerank: true,
            use_hybrid_search: true,
            use_query_expansion: false,
            relevance_threshold: default_relevance_threshold(),
            retrieval_limit: default_retrieval_limit(),
            grounding_collections: default_grounding_collections(),
        }
    }
}

impl PipelineOptions {
    /// The retrieval part of the options.
    pub fn retrieval_options(&self) -> RetrievalOptions {
        RetrievalOptions {
            limit: self.retrieval_limit,
            use_hybrid_search: self.use_hybrid_search,
            use_query_expansion: self.use_query_expansion,
            rerank: self.rerank,
            relevance_threshold: self.relevance_threshold,
            rerank_options: RerankOptions {
                top_k: self.retrieval_limit,
                ..RerankOptions::default()
            },
            ..RetrievalOptions::default()
        }
    }
}

/// `[detection]` section: detector tunables plus the corrector's
/// duplicate-sentence threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Detector thresholds.
    #[serde(flatten)]
    pub detector: DetectorConfig,
    /// Token overlap above which two sentences count as duplicates.
    #[serde(default = "default_dedupe_threshold")]
    pub dedupe_threshold: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            dedupe_threshold: default_dedupe_threshold(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_dimension() -> usize {
    DEFAULT_DIMENSION
}
fn default_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}
fn default_reasoning_threshold() -> f32 {
    0.7
}
fn default_relevance_threshold() -> f32 {
    0.3
}
fn default_retrieval_limit() -> usize {
    5
}
fn default_grounding_collections() -> Vec<String> {
    vec![
        KNOWLEDGE_COLLECTION.to_string(),
        MEMORY_COLLECTION.to_string(),
    ]
}
fn default_dedupe_threshold() -> f32 {
    DEDUPE_THRESHOLD
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.embedding.provider, EmbeddingBackend::Local);
        assert_eq!(config.embedding.dimension, DEFAULT_DIMENSION);
        assert!(config.store.snapshot_dir.is_none());
        assert!(config.pipeline.enable_rag);
        assert!(!config.pipeline.use_query_expansion);
        assert!((config.pipeline.reasoning_threshold - 0.7).abs() < 1e-6);
        assert_eq!(config.detection.detector.new_conversation_turns, 2);
        assert!((config.detection.dedupe_threshold - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [embedding]
            provider = "http"
            url = "http://localhost:8080"
            dimension = 8
            api_key_env = "EMBEDDING_API_KEY"

            [store]
            snapshot_dir = "./data/snapshots"

            [pipeline]
            enable_reasoning = false
            use_query_expansion = true
            grounding_collections = ["knowledge"]

            [detection]
            new_conversation_turns = 4
            evidence_threshold = 0.5
            dedupe_threshold = 0.9
            "#,
        )
        .unwrap();
        assert_eq!(config.embedding.provider, EmbeddingBackend::Http);
        assert_eq!(config.embedding.dimension, 8);
        assert_eq!(
            config.store.snapshot_dir,
            Some(PathBuf::from("./data/snapshots"))
        );
        assert!(!config.pipeline.enable_reasoning);
        assert!(config.pipeline.enable_detection);
        assert_eq!(config.pipeline.grounding_collections, vec!["knowledge"]);
        assert_eq!(config.detection.detector.new_conversation_turns, 4);
        assert_eq!(config.detection.detector.recent_response_window, 3);
        assert!((config.detection.dedupe_threshold - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_document_is_config_error() {
        let err = EngineConfig::from_toml_str("[pipeline]\nenable_rag = \"sometimes\"").unwrap_err();
        assert!(matches!(err, GroundingError::Config(_)));
    }

    #[test]
    fn test_retrieval_options_follow_pipeline() {
        let options = PipelineOptions {
            use_hybrid_search: false,
            retrieval_limit: 3,
            ..PipelineOptions::default()
        };
        let retrieval = options.retrieval_options();
        assert!(!retrieval.use_hybrid_search);
        assert_eq!(retrieval.limit, 3);
        assert_eq!(retrieval.rerank_options.top_k, 3);
        assert!((retrieval.relevance_threshold - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join("absent.toml")).await.unwrap();
        assert!(config.pipeline.enable_detection);
    }
}
