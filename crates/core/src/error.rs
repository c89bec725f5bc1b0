use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failures raised by the embedding and completion providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl ProviderError {
    /// True for transient failures that should trip the circuit breaker and
    /// route query-time search to the keyword fallback.
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, ProviderError::DimensionMismatch { .. })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("embedding dimension mismatch: store holds {expected}-wide vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding count {embeddings} doesn't match chunk count {chunks}")]
    CountMismatch { chunks: usize, embeddings: usize },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("policy {policy_id} is at version {actual}, expected {expected}")]
    VersionConflict {
        policy_id: String,
        expected: u32,
        actual: u32,
    },

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Pipeline stage an ingestion failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Input,
    Chunking,
    Embedding,
    Storage,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestStage::Input => "input",
            IngestStage::Chunking => "chunking",
            IngestStage::Embedding => "embedding",
            IngestStage::Storage => "storage",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid chunking config: {0}")]
    InvalidConfiguration(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("unsupported policy file: {0}")]
    UnsupportedFile(String),

    #[error("embedding stage failed: {0}")]
    Embedding(#[from] ProviderError),

    #[error("storage stage failed: {0}")]
    Storage(#[from] StoreError),

    #[error("policy not found: {0}")]
    NotFound(String),

    #[error(
        "policy {policy_id} changed concurrently (expected version {expected}, found {actual})"
    )]
    VersionConflict {
        policy_id: String,
        expected: u32,
        actual: u32,
    },
}

impl IngestError {
    pub fn stage(&self) -> IngestStage {
        match self {
            IngestError::InvalidConfiguration(_) | IngestError::RegexError(_) => {
                IngestStage::Chunking
            }
            IngestError::Embedding(_) => IngestStage::Embedding,
            IngestError::Storage(_) | IngestError::VersionConflict { .. } => IngestStage::Storage,
            IngestError::InvalidArgument(_)
            | IngestError::Io(_)
            | IngestError::PdfParse(_)
            | IngestError::MissingFileName(_)
            | IngestError::UnsupportedFile(_)
            | IngestError::NotFound(_) => IngestStage::Input,
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Request(String),

    #[error("invalid search configuration: {0}")]
    InvalidConfiguration(String),

    #[error("store error: {0}")]
    Storage(#[from] StoreError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_errors_name_their_stage() {
        let embedding = IngestError::from(ProviderError::Unavailable("quota".to_string()));
        assert_eq!(embedding.stage(), IngestStage::Embedding);
        assert!(embedding.to_string().starts_with("embedding stage failed"));

        let storage = IngestError::from(StoreError::NotFound("policy-1".to_string()));
        assert_eq!(storage.stage(), IngestStage::Storage);
        assert!(storage.to_string().starts_with("storage stage failed"));

        let config = IngestError::InvalidConfiguration("overlap".to_string());
        assert_eq!(config.stage(), IngestStage::Chunking);
    }

    #[test]
    fn dimension_mismatch_is_not_an_outage() {
        let drift = ProviderError::DimensionMismatch {
            expected: 4,
            actual: 8,
        };
        assert!(!drift.is_unavailable());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_unavailable());
    }
}
