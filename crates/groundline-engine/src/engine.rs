use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use groundline_core::{ConversationTurn, GroundingResult};
use groundline_memory::{
    Candidate, EmbeddingProvider, EnhancedRetriever, FallbackEmbedder, HybridRetriever, Record,
    Reranker, RetrievalOptions, VectorStore,
};
use groundline_verify::{
    ClaimChecker, Corrector, DetectionReport, EvidenceContext, HallucinationDetector,
    HallucinationScanner,
};
use tracing::{debug, info, warn};

use crate::config::{EmbeddingBackend, EmbeddingConfig, EngineConfig, KNOWLEDGE_COLLECTION, MEMORY_COLLECTION};

/// Importance given to captured exchanges.
const EXCHANGE_IMPORTANCE: f64 = 0.5;
/// Memory snippets handed to the detector as evidence.
const MAX_MEMORY_SNIPPETS: usize = 10;

/// The grounding engine: one explicitly constructed instance owning the
/// store, the embedder and every pipeline stage.
///
/// Construct it, call [`GroundingEngine::init`] once, then share it (it is
/// `Send + Sync`; wrap it in an `Arc` to hand it to several tasks).
pub struct GroundingEngine {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<VectorStore>,
    pub(crate) embedder: Arc<FallbackEmbedder>,
    pub(crate) retriever: Arc<EnhancedRetriever>,
    /// Custom claim checker; the built-in verifier is used when unset.
    pub(crate) checker: Option<Arc<dyn ClaimChecker>>,
    /// Custom scanner; the built-in detector is used when unset.
    pub(crate) scanner: Option<Arc<dyn HallucinationScanner>>,
    pub(crate) detector: HallucinationDetector,
    pub(crate) corrector: Corrector,
}

impl GroundingEngine {
    /// Build an engine from configuration. Fails only when the configured
    /// embedding model client cannot be created.
    pub fn new(config: EngineConfig) -> GroundingResult<Self> {
        let embedder = build_embedder(&config.embedding)?;
        Ok(Self::assemble(config, Arc::new(embedder)))
    }

    /// Build an engine around a caller-supplied embedding model. The model
    /// is wrapped in a [`FallbackEmbedder`] of the same dimension.
    pub fn with_embedding_model(config: EngineConfig, model: Arc<dyn EmbeddingProvider>) -> Self {
        Self::assemble(config, Arc::new(FallbackEmbedder::new(model)))
    }

    fn assemble(config: EngineConfig, embedder: Arc<FallbackEmbedder>) -> Self {
        let store = Arc::new(VectorStore::new());
        let provider: Arc<dyn EmbeddingProvider> = embedder.clone();
        let hybrid = HybridRetriever::new(Arc::clone(&store), Arc::clone(&provider));
        let retriever = Arc::new(EnhancedRetriever::new(hybrid, Reranker::new(provider)));
        let detector = HallucinationDetector::with_config(config.detection.detector.clone());
        let corrector = Corrector::new().with_dedupe_threshold(config.detection.dedupe_threshold);
        Self {
            config,
            store,
            embedder,
            retriever,
            checker: None,
            scanner: None,
            detector,
            corrector,
        }
    }

    /// Replace the built-in claim verifier. Chainable builder method.
    pub fn with_claim_checker(mut self, checker: Arc<dyn ClaimChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Replace the built-in hallucination detector. Chainable builder method.
    pub fn with_scanner(mut self, scanner: Arc<dyn HallucinationScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    /// Create the default collections and load the warm-start snapshot when
    /// one is configured. Returns the number of restored records.
    pub async fn init(&self) -> usize {
        self.store.collection(KNOWLEDGE_COLLECTION);
        self.store.collection(MEMORY_COLLECTION);

        let restored = match &self.config.store.snapshot_dir {
            Some(dir) => self.store.load_snapshot(dir).await,
            None => 0,
        };
        info!(
            restored,
            embedder = self.embedder.name(),
            collections = self.store.collection_names().len(),
            "Grounding engine initialized"
        );
        restored
    }

    /// Write a snapshot when a snapshot directory is configured. Returns the
    /// number of collection files written.
    pub async fn persist(&self) -> GroundingResult<usize> {
        let Some(dir) = &self.config.store.snapshot_dir else {
            return Ok(0);
        };
        let written = self.store.save_snapshot(dir).await?;
        info!(dir = %dir.display(), collections = written, "Snapshot written");
        Ok(written)
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The vector store.
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// `true` while the embedding model (not the local fallback) is serving.
    pub fn embedder_ready(&self) -> bool {
        self.embedder.is_ready()
    }

    /// Embed `text` and store it in `collection`. Returns the record id.
    pub async fn add_knowledge(
        &self,
        collection: &str,
        text: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> GroundingResult<String> {
        let vector = self.embedder.embed(text).await?;
        let mut record = Record::new(text, vector);
        record.metadata.extend(metadata);
        let id = record.id.clone();
        self.store.insert(collection, record).await?;
        debug!(collection, id = %id, "Record added");
        Ok(id)
    }

    /// Store a user/assistant exchange in the conversation memory.
    pub async fn capture_exchange(&self, input: &str, reply: &str) -> GroundingResult<String> {
        let text = format!("User: {input}\nAssistant: {reply}");
        let metadata = HashMap::from([
            (
                "timestamp".to_string(),
                serde_json::Value::String(Utc::now().to_rfc3339()),
            ),
            ("importance".to_string(), serde_json::json!(EXCHANGE_IMPORTANCE)),
            ("kind".to_string(), serde_json::Value::String("exchange".to_string())),
        ]);
        self.add_knowledge(MEMORY_COLLECTION, &text, metadata).await
    }

    /// Retrieve grounding candidates for `query` from the `topics`
    /// collections (the configured grounding collections when empty).
    pub async fn retrieve_enhanced(
        &self,
        query: &str,
        topics: &[String],
        options: &RetrievalOptions,
    ) -> Vec<Candidate> {
        let collections = if topics.is_empty() {
            self.config.pipeline.grounding_collections.as_slice()
        } else {
            topics
        };
        self.retriever.retrieve(query, collections, options).await
    }

    /// Scan `reply` with the configured scanner, using the conversation
    /// memory as evidence. A failing scanner counts as "no issue found".
    pub async fn detect_hallucinations(
        &self,
        reply: &str,
        input: &str,
        history: &[ConversationTurn],
    ) -> DetectionReport {
        let evidence = self.memory_evidence(reply).await;
        self.scan(reply, input, history, &evidence)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Hallucination detection failed, treating reply as clean");
                DetectionReport::clean()
            })
    }

    pub(crate) fn scan(
        &self,
        reply: &str,
        input: &str,
        history: &[ConversationTurn],
        evidence: &EvidenceContext,
    ) -> GroundingResult<DetectionReport> {
        match &self.scanner {
            Some(scanner) => scanner.scan(reply, input, history, evidence),
            None => Ok(self.detector.detect(reply, input, history, evidence)),
        }
    }

    /// Conversation-memory snippets sharing keywords with `reply`.
    pub(crate) async fn memory_evidence(&self, reply: &str) -> EvidenceContext {
        let mut hits = self
            .retriever
            .hybrid()
            .keyword_search(reply, &[MEMORY_COLLECTION.to_string()])
            .await;
        hits.sort_by(|a, b| {
            b.lexical_score
                .partial_cmp(&a.lexical_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        EvidenceContext::with_memory(
            hits.into_iter()
                .take(MAX_MEMORY_SNIPPETS)
                .map(|c| c.content)
                .collect(),
        )
    }
}

/// Build the embedder described by `config`.
fn build_embedder(config: &EmbeddingConfig) -> GroundingResult<FallbackEmbedder> {
    match config.provider {
        EmbeddingBackend::Local => Ok(FallbackEmbedder::local_only(config.dimension)),
        EmbeddingBackend::Http => http_embedder(config),
    }
}

#[cfg(feature = "http-embeddings")]
fn http_embedder(config: &EmbeddingConfig) -> GroundingResult<FallbackEmbedder> {
    use groundline_memory::HttpEmbedding;

    let Some(url) = &config.url else {
        warn!("HTTP embedding provider configured without a url, using local embeddings");
        return Ok(FallbackEmbedder::local_only(config.dimension));
    };
    let mut model = HttpEmbedding::new(url.as_str(), config.model.as_str(), config.dimension)?;
    if let Some(var) = &config.api_key_env {
        match std::env::var(var) {
            Ok(key) => model = model.with_api_key(key),
            Err(_) => warn!(var = %var, "Embedding API key variable not set"),
        }
    }
    info!(url = %url, model = %config.model, "Using HTTP embedding model");
    Ok(FallbackEmbedder::new(Arc::new(model)))
}

#[cfg(not(feature = "http-embeddings"))]
fn http_embedder(config: &EmbeddingConfig) -> GroundingResult<FallbackEmbedder> {
    warn!("Built without the http-embeddings feature, using local embeddings");
    Ok(FallbackEmbedder::local_only(config.dimension))
}
