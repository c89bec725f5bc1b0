use crate::error::StoreError;
use crate::models::{ChunkDraft, PolicyChunk};
use chrono::Utc;
use uuid::Uuid;

/// Check that `embeddings` pairs one-to-one with `chunk_count` chunks and
/// that every vector has the store's width.
pub fn validate_embeddings(
    vector_width: usize,
    chunk_count: usize,
    embeddings: &[Vec<f32>],
) -> Result<(), StoreError> {
    if chunk_count != embeddings.len() {
        return Err(StoreError::CountMismatch {
            chunks: chunk_count,
            embeddings: embeddings.len(),
        });
    }

    if let Some(bad) = embeddings.iter().find(|vector| vector.len() != vector_width) {
        return Err(StoreError::DimensionMismatch {
            expected: vector_width,
            actual: bad.len(),
        });
    }

    Ok(())
}

/// Assign ids and timestamps to drafts about to be written.
pub fn materialize_chunks(
    policy_id: &str,
    generation: &str,
    chunks: &[ChunkDraft],
    embeddings: &[Vec<f32>],
) -> Vec<PolicyChunk> {
    let created_at = Utc::now();
    chunks
        .iter()
        .zip(embeddings.iter())
        .map(|(draft, embedding)| PolicyChunk {
            id: Uuid::new_v4().to_string(),
            policy_id: policy_id.to_string(),
            generation: generation.to_string(),
            chunk_index: draft.chunk_index,
            content: draft.content.clone(),
            start_index: draft.start_index,
            end_index: draft.end_index,
            metadata: draft.metadata.clone(),
            embedding: embedding.clone(),
            created_at,
        })
        .collect()
}

pub fn new_generation() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_count_and_width_mismatches() {
        let count = validate_embeddings(3, 2, &[vec![0.0; 3]]).unwrap_err();
        assert!(matches!(count, StoreError::CountMismatch { chunks: 2, embeddings: 1 }));

        let width = validate_embeddings(3, 2, &[vec![0.0; 3], vec![0.0; 4]]).unwrap_err();
        assert!(matches!(width, StoreError::DimensionMismatch { expected: 3, actual: 4 }));

        assert!(validate_embeddings(3, 0, &[]).is_ok());
    }
}
