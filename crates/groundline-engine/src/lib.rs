//! The Groundline grounding engine.
//!
//! Wires the retrieval layer ([`groundline_memory`]) and the verification
//! layer ([`groundline_verify`]) into one explicitly constructed
//! [`GroundingEngine`] and runs the hallucination-prevention pipeline over
//! draft replies.
//!
//! # Main types
//!
//! - [`EngineConfig`] — TOML configuration with `[embedding]`, `[store]`, `[pipeline]`, `[detection]`.
//! - [`GroundingEngine`] — Owns the store, embedder and pipeline stages.
//! - [`PipelineOptions`] — Per-call switches and thresholds of the pipeline.
//! - [`PipelineResult`] — Final reply, revision flag, confidence and issue trail.

/// Engine configuration.
pub mod config;
/// The engine instance.
pub mod engine;
/// The hallucination-prevention pipeline.
pub mod pipeline;

pub use config::{
    DetectionConfig, EmbeddingBackend, EmbeddingConfig, EngineConfig, PipelineOptions,
    StoreConfig, KNOWLEDGE_COLLECTION, MEMORY_COLLECTION,
};
pub use engine::GroundingEngine;
pub use pipeline::PipelineResult;
