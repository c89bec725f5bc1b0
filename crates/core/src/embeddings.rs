use crate::error::ProviderError;
use async_trait::async_trait;
use std::time::Duration;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Text-to-vector capability with a fixed output width.
///
/// The width is fixed per deployment: stores, the search engine and the
/// lifecycle manager compare against [`EmbeddingModel::dimensions`] once at
/// construction instead of checking each call site.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("empty embedding response".to_string()))
    }
}

/// Embed `texts` in batches of `batch_size`, bounding every provider call by
/// `timeout` and verifying the count and width of what comes back.
pub async fn embed_all<E>(
    model: &E,
    texts: &[String],
    batch_size: usize,
    timeout: Duration,
) -> Result<Vec<Vec<f32>>, ProviderError>
where
    E: EmbeddingModel + ?Sized,
{
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let embedded = tokio::time::timeout(timeout, model.embed_batch(batch))
            .await
            .map_err(|_| ProviderError::Timeout(timeout))??;

        if embedded.len() != batch.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "expected {} embeddings, provider returned {}",
                batch.len(),
                embedded.len()
            )));
        }
        for vector in &embedded {
            check_width(model.dimensions(), vector)?;
        }
        vectors.extend(embedded);
    }
    Ok(vectors)
}

/// Embed a single query under `timeout`, verifying its width.
pub async fn embed_one<E>(
    model: &E,
    text: &str,
    timeout: Duration,
) -> Result<Vec<f32>, ProviderError>
where
    E: EmbeddingModel + ?Sized,
{
    let vector = tokio::time::timeout(timeout, model.embed(text))
        .await
        .map_err(|_| ProviderError::Timeout(timeout))??;
    check_width(model.dimensions(), &vector)?;
    Ok(vector)
}

fn check_width(expected: usize, vector: &[f32]) -> Result<(), ProviderError> {
    if vector.len() != expected {
        return Err(ProviderError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Deterministic local embedder hashing character trigrams into buckets.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingModel for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        "char-trigram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|text| self.embed_sync(text)).collect())
    }
}

/// Cosine similarity `dot(a, b) / (|a| * |b|)`.
///
/// Zero-norm, empty or mismatched vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

/// Encode a vector as little-endian `f32` bytes.
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailingEmbedder, TopicEmbedder};

    #[tokio::test]
    async fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Parental leave eligibility").await.unwrap();
        let second = embedder.embed("Parental leave eligibility").await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        assert_eq!(embedder.embed_sync("abc").len(), 32);
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn blob_encoding_preserves_values() {
        let vector = vec![0.25f32, -1.5, 3.0];
        let blob = vec_to_blob(&vector);
        assert_eq!(blob.len(), 12);
        assert_eq!(blob_to_vec(&blob), vector);
    }

    #[tokio::test]
    async fn embed_all_batches_and_checks_width() {
        let embedder = TopicEmbedder::default();
        let texts: Vec<String> = (0..5).map(|n| format!("home office {n}")).collect();
        let vectors = embed_all(&embedder, &texts, 2, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(vectors.len(), 5);
        assert!(vectors.iter().all(|v| v.len() == embedder.dimensions()));
    }

    #[tokio::test]
    async fn embed_one_reports_width_drift() {
        let embedder = TopicEmbedder::with_reported_dimensions(8);
        let error = embed_one(&embedder, "home", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            ProviderError::DimensionMismatch { expected: 8, .. }
        ));
    }

    #[tokio::test]
    async fn embed_all_surfaces_provider_outage() {
        let error = embed_all(
            &FailingEmbedder::default(),
            &["text".to_string()],
            8,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(error.is_unavailable());
    }
}
