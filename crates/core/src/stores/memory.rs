//! In-memory store for tests and single-process deployments.
//!
//! All state sits behind one `tokio::sync::RwLock`, so every mutation is
//! atomic with respect to concurrent readers. Candidates are scanned in
//! insertion order.

use crate::error::StoreError;
use crate::models::{
    CandidateChunk, CandidateFilter, Category, ChunkDraft, PolicyChunk, PolicyDocument,
    PolicyFilter, PolicyRevision, PolicyStatus,
};
use crate::store::{materialize_chunks, validate_embeddings};
use crate::traits::{ChunkStore, PolicyStore};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    categories: Vec<Category>,
    policies: Vec<PolicyDocument>,
    chunks: Vec<PolicyChunk>,
}

impl MemoryState {
    fn policy(&self, policy_id: &str) -> Option<&PolicyDocument> {
        self.policies.iter().find(|policy| policy.id == policy_id)
    }

    fn policy_mut(&mut self, policy_id: &str) -> Result<&mut PolicyDocument, StoreError> {
        self.policies
            .iter_mut()
            .find(|policy| policy.id == policy_id)
            .ok_or_else(|| StoreError::NotFound(format!("policy {policy_id}")))
    }

    fn remove_chunks<F>(&mut self, predicate: F) -> u64
    where
        F: Fn(&PolicyChunk) -> bool,
    {
        let before = self.chunks.len();
        self.chunks.retain(|chunk| !predicate(chunk));
        (before - self.chunks.len()) as u64
    }
}

pub struct MemoryStore {
    vector_width: usize,
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new(vector_width: usize) -> Self {
        Self {
            vector_width,
            state: RwLock::new(MemoryState::default()),
        }
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    fn vector_width(&self) -> usize {
        self.vector_width
    }

    async fn create_chunks(
        &self,
        policy_id: &str,
        generation: &str,
        chunks: &[ChunkDraft],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<PolicyChunk>, StoreError> {
        validate_embeddings(self.vector_width, chunks.len(), embeddings)?;
        let mut state = self.state.write().await;
        if state.policy(policy_id).is_none() {
            return Err(StoreError::NotFound(format!("policy {policy_id}")));
        }

        let rows = materialize_chunks(policy_id, generation, chunks, embeddings);
        state.chunks.extend(rows.iter().cloned());
        Ok(rows)
    }

    async fn get_chunks_for_policy(&self, policy_id: &str) -> Result<Vec<PolicyChunk>, StoreError> {
        let state = self.state.read().await;
        let Some(policy) = state.policy(policy_id) else {
            return Ok(Vec::new());
        };

        let mut chunks: Vec<PolicyChunk> = state
            .chunks
            .iter()
            .filter(|chunk| {
                chunk.policy_id == policy_id && chunk.generation == policy.chunk_generation
            })
            .cloned()
            .collect();
        chunks.sort_by_key(|chunk| chunk.chunk_index);
        Ok(chunks)
    }

    async fn delete_chunks_for_policy(&self, policy_id: &str) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        Ok(state.remove_chunks(|chunk| chunk.policy_id == policy_id))
    }

    async fn replace_chunks(
        &self,
        policy_id: &str,
        expected_version: u32,
        chunks: &[ChunkDraft],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<PolicyChunk>, StoreError> {
        validate_embeddings(self.vector_width, chunks.len(), embeddings)?;
        let mut state = self.state.write().await;
        let policy = state.policy_mut(policy_id)?;
        if policy.version != expected_version {
            return Err(StoreError::VersionConflict {
                policy_id: policy_id.to_string(),
                expected: expected_version,
                actual: policy.version,
            });
        }
        policy.updated_at = Utc::now();
        let generation = policy.chunk_generation.clone();

        state.remove_chunks(|chunk| chunk.policy_id == policy_id && chunk.generation == generation);
        let rows = materialize_chunks(policy_id, &generation, chunks, embeddings);
        state.chunks.extend(rows.iter().cloned());
        Ok(rows)
    }

    async fn discard_generation(
        &self,
        policy_id: &str,
        generation: &str,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        Ok(state.remove_chunks(|chunk| {
            chunk.policy_id == policy_id && chunk.generation == generation
        }))
    }

    async fn prune_generations(&self, policy_id: &str, keep: &str) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        Ok(state.remove_chunks(|chunk| chunk.policy_id == policy_id && chunk.generation != keep))
    }

    async fn scan_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<CandidateChunk>, StoreError> {
        let state = self.state.read().await;
        let mut candidates = Vec::new();

        for policy in state.policies.iter().filter(|policy| {
            policy.status == PolicyStatus::Active
                && filter
                    .tenant_id
                    .as_ref()
                    .map_or(true, |tenant| &policy.tenant_id == tenant)
                && filter
                    .category
                    .as_ref()
                    .map_or(true, |category| policy.category_name.eq_ignore_ascii_case(category))
        }) {
            let mut chunks: Vec<&PolicyChunk> = state
                .chunks
                .iter()
                .filter(|chunk| {
                    chunk.policy_id == policy.id && chunk.generation == policy.chunk_generation
                })
                .collect();
            chunks.sort_by_key(|chunk| chunk.chunk_index);

            let summary = policy.summary_view();
            candidates.extend(chunks.into_iter().map(|chunk| CandidateChunk {
                chunk: chunk.clone(),
                policy: summary.clone(),
            }));
        }

        Ok(candidates)
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn find_or_create_category(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Category, StoreError> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .categories
            .iter()
            .find(|category| category.name.eq_ignore_ascii_case(name))
        {
            return Ok(existing.clone());
        }

        let category = Category {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.map(str::to_string),
        };
        state.categories.push(category.clone());
        Ok(category)
    }

    async fn list_categories(&self) -> Result<Vec<Category>, StoreError> {
        let state = self.state.read().await;
        let mut categories = state.categories.clone();
        categories.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(categories)
    }

    async fn insert_policy(&self, policy: &PolicyDocument) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.policy(&policy.id).is_some() {
            return Err(StoreError::Corrupt(format!("duplicate policy id {}", policy.id)));
        }
        state.policies.push(policy.clone());
        Ok(())
    }

    async fn get_policy(&self, policy_id: &str) -> Result<Option<PolicyDocument>, StoreError> {
        Ok(self.state.read().await.policy(policy_id).cloned())
    }

    async fn list_policies(
        &self,
        filter: &PolicyFilter,
    ) -> Result<Vec<PolicyDocument>, StoreError> {
        let state = self.state.read().await;
        let mut policies: Vec<PolicyDocument> = state
            .policies
            .iter()
            .filter(|policy| policy.tenant_id == filter.tenant_id)
            .filter(|policy| {
                filter
                    .category
                    .as_ref()
                    .map_or(true, |category| policy.category_name.eq_ignore_ascii_case(category))
            })
            .cloned()
            .collect();
        policies.sort_by(|left, right| left.title.cmp(&right.title));
        Ok(policies)
    }

    async fn commit_revision(
        &self,
        revision: &PolicyRevision,
    ) -> Result<PolicyDocument, StoreError> {
        let mut state = self.state.write().await;
        let policy = state.policy_mut(&revision.policy_id)?;
        if policy.version != revision.expected_version {
            return Err(StoreError::VersionConflict {
                policy_id: revision.policy_id.clone(),
                expected: revision.expected_version,
                actual: policy.version,
            });
        }

        policy.content = revision.content.clone();
        policy.summary = revision.summary.clone();
        policy.version += 1;
        policy.chunk_generation = revision.chunk_generation.clone();
        if let Some(metadata) = &revision.metadata {
            policy.metadata = metadata.clone();
        }
        policy.updated_at = Utc::now();
        Ok(policy.clone())
    }

    async fn set_status(
        &self,
        policy_id: &str,
        status: PolicyStatus,
    ) -> Result<PolicyDocument, StoreError> {
        let mut state = self.state.write().await;
        let policy = state.policy_mut(policy_id)?;
        policy.status = status;
        policy.updated_at = Utc::now();
        Ok(policy.clone())
    }

    async fn delete_policy(&self, policy_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let before = state.policies.len();
        state.policies.retain(|policy| policy.id != policy_id);
        if state.policies.len() == before {
            return Ok(false);
        }
        state.remove_chunks(|chunk| chunk.policy_id == policy_id);
        Ok(true)
    }
}
