pub mod assembler;
pub mod chunking;
pub mod circuit;
pub mod completion;
pub mod embeddings;
pub mod error;
pub mod extract;
pub mod lifecycle;
pub mod models;
pub mod providers;
pub mod search;
pub mod store;
pub mod stores;
pub mod traits;

#[cfg(test)]
mod test_support;

pub use assembler::{
    fallback_answer, render_prompt, AssembledContext, AssemblerOptions, Citation, QueryAssembler,
};
pub use chunking::{chunk_text, normalize_whitespace, reassemble, ChunkingOptions};
pub use circuit::{BreakerReset, CircuitBreaker};
pub use completion::{complete_with_fallback, CompletionModel, CompletionOutcome};
pub use embeddings::{
    cosine_similarity, CharacterNgramEmbedder, EmbeddingModel, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IngestError, IngestStage, ProviderError, SearchError, StoreError};
pub use extract::{discover_policy_files, load_policy_file, PolicySource};
pub use lifecycle::{ImportReport, LifecycleOptions, PolicyLifecycle, SkippedFile};
pub use models::{
    Category, ChunkDraft, ChunkMetadata, IngestReceipt, NewPolicy, PolicyChunk, PolicyDocument,
    PolicyMetadata, PolicySearchQuery, PolicyStatus, PolicySummary, PolicyWithChunks, SearchMode,
    SearchOutcome, SimilarityResult,
};
pub use providers::{HttpCompletionModel, HttpEmbedder, HttpProviderConfig};
pub use search::{group_by_policy, PolicyHitGroup, SearchOptions, SimilaritySearchEngine};
pub use stores::{MemoryStore, SqliteStore};
pub use traits::{ChunkStore, PolicyStore};
