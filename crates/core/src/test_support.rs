use crate::embeddings::EmbeddingModel;
use crate::error::ProviderError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

const TOPICS: [&[&str]; 4] = [
    &["home", "office", "remote", "remotely", "telework", "hybrid"],
    &["conduct", "harassment", "ethics", "respect", "behaviour", "behavior"],
    &["leave", "vacation", "holiday", "parental", "sick", "pto"],
    &["benefits", "insurance", "health", "dental", "pension", "retirement"],
];

/// Bag-of-topics embedder: one dimension per topic, unknown words ignored.
#[derive(Debug, Default)]
pub struct TopicEmbedder {
    reported_dimensions: Option<usize>,
}

impl TopicEmbedder {
    /// Advertise a width that disagrees with the vectors actually produced.
    pub fn with_reported_dimensions(dimensions: usize) -> Self {
        Self {
            reported_dimensions: Some(dimensions),
        }
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; TOPICS.len()];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
        {
            for (dimension, words) in TOPICS.iter().enumerate() {
                if words.contains(&token.as_str()) {
                    vector[dimension] += 1.0;
                }
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingModel for TopicEmbedder {
    fn model_name(&self) -> &str {
        "topic-test"
    }

    fn dimensions(&self) -> usize {
        self.reported_dimensions.unwrap_or(TOPICS.len())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        // Lets joined futures interleave between batches.
        tokio::task::yield_now().await;
        Ok(texts.iter().map(|text| Self::vector(text)).collect())
    }
}

#[derive(Debug, Default)]
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingModel for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing-test"
    }

    fn dimensions(&self) -> usize {
        TOPICS.len()
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::Unavailable("quota exhausted".to_string()))
    }
}

/// Succeeds for the first `healthy_calls` batches, then fails.
#[derive(Debug)]
pub struct FlakyEmbedder {
    healthy_calls: usize,
    calls: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn new(healthy_calls: usize) -> Self {
        Self {
            healthy_calls,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingModel for FlakyEmbedder {
    fn model_name(&self) -> &str {
        "flaky-test"
    }

    fn dimensions(&self) -> usize {
        TOPICS.len()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.healthy_calls {
            return Err(ProviderError::Unavailable("connection reset".to_string()));
        }
        Ok(texts.iter().map(|text| TopicEmbedder::vector(text)).collect())
    }
}
