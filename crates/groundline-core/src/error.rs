use thiserror::Error;

/// A convenience `Result` alias using [`GroundingError`].
pub type GroundingResult<T> = Result<T, GroundingError>;

/// Top-level error type for the Groundline engine.
///
/// Each variant corresponds to a subsystem that can produce errors. None of
/// them is ever surfaced to the caller of the hallucination-prevention
/// pipeline; stages degrade instead.
#[derive(Error, Debug)]
pub enum GroundingError {
    /// The embedding model failed or returned an unusable vector.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// A vector store operation was rejected (duplicate id, dimension mismatch).
    #[error("Store error: {0}")]
    Store(String),

    /// A retrieval backend failed.
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Claim verification failed internally.
    #[error("Verification error: {0}")]
    Verification(String),

    /// Hallucination detection failed internally.
    #[error("Detection error: {0}")]
    Detection(String),

    /// Correction failed internally.
    #[error("Correction error: {0}")]
    Correction(String),

    /// Configuration could not be parsed or is invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from an outbound HTTP request (remote embedding model).
    #[error("HTTP error: {0}")]
    Http(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
