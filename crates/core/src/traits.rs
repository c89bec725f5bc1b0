use crate::error::StoreError;
use crate::models::{
    CandidateChunk, CandidateFilter, Category, ChunkDraft, PolicyChunk, PolicyDocument,
    PolicyFilter, PolicyRevision, PolicyStatus,
};
use async_trait::async_trait;

/// Persistence for chunk rows and their embeddings.
///
/// Chunks are written under a generation id. Readers only see the generation
/// the owning document currently points at, and only for ACTIVE documents in
/// the case of [`ChunkStore::scan_candidates`].
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Width every stored embedding must have.
    fn vector_width(&self) -> usize;

    /// Insert `chunks` with their `embeddings` under `generation`, all or nothing.
    async fn create_chunks(
        &self,
        policy_id: &str,
        generation: &str,
        chunks: &[ChunkDraft],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<PolicyChunk>, StoreError>;

    /// Current-generation chunks ordered by `chunk_index`.
    async fn get_chunks_for_policy(&self, policy_id: &str) -> Result<Vec<PolicyChunk>, StoreError>;

    /// Remove every chunk of the policy. Returns the number of rows deleted.
    async fn delete_chunks_for_policy(&self, policy_id: &str) -> Result<u64, StoreError>;

    /// Delete and recreate the current generation in one atomic step,
    /// provided the policy is still at `expected_version`.
    async fn replace_chunks(
        &self,
        policy_id: &str,
        expected_version: u32,
        chunks: &[ChunkDraft],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<PolicyChunk>, StoreError>;

    /// Drop the chunks written under `generation`.
    async fn discard_generation(
        &self,
        policy_id: &str,
        generation: &str,
    ) -> Result<u64, StoreError>;

    /// Drop every generation of the policy except `keep`.
    async fn prune_generations(&self, policy_id: &str, keep: &str) -> Result<u64, StoreError>;

    /// Searchable chunks joined with their owning document, in storage order.
    async fn scan_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<CandidateChunk>, StoreError>;
}

/// Persistence for policy documents and their categories.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Return the category named `name`, creating it on first use. A
    /// concurrent creation of the same name resolves to the stored row.
    async fn find_or_create_category(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Category, StoreError>;

    async fn list_categories(&self) -> Result<Vec<Category>, StoreError>;

    async fn insert_policy(&self, policy: &PolicyDocument) -> Result<(), StoreError>;

    async fn get_policy(&self, policy_id: &str) -> Result<Option<PolicyDocument>, StoreError>;

    async fn list_policies(&self, filter: &PolicyFilter) -> Result<Vec<PolicyDocument>, StoreError>;

    /// Swap in new content, bump the version and flip the chunk generation
    /// pointer, provided the stored version still equals `expected_version`.
    async fn commit_revision(
        &self,
        revision: &PolicyRevision,
    ) -> Result<PolicyDocument, StoreError>;

    async fn set_status(
        &self,
        policy_id: &str,
        status: PolicyStatus,
    ) -> Result<PolicyDocument, StoreError>;

    /// Delete the policy and cascade to its chunks. Returns false if absent.
    async fn delete_policy(&self, policy_id: &str) -> Result<bool, StoreError>;
}
