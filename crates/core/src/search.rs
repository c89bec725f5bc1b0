use crate::circuit::CircuitBreaker;
use crate::embeddings::{cosine_similarity, embed_one, EmbeddingModel};
use crate::error::{SearchError, StoreError};
use crate::models::{
    CandidateChunk, CandidateFilter, PolicySearchQuery, PolicySummary, SearchMode, SearchOutcome,
    SimilarityResult, DEFAULT_SEARCH_LIMIT, DEFAULT_SIMILARITY_THRESHOLD,
};
use crate::traits::ChunkStore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub threshold: f32,
    pub embed_timeout: Duration,
    pub store_timeout: Duration,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_SEARCH_LIMIT,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            embed_timeout: Duration::from_secs(10),
            store_timeout: Duration::from_secs(10),
        }
    }
}

/// Ranks stored chunks against a query by cosine similarity, dropping to
/// keyword overlap while the embedding provider is unavailable.
pub struct SimilaritySearchEngine<S, E>
where
    S: ChunkStore,
    E: EmbeddingModel + ?Sized,
{
    store: Arc<S>,
    embedder: Arc<E>,
    breaker: Arc<CircuitBreaker>,
    options: SearchOptions,
}

impl<S, E> SimilaritySearchEngine<S, E>
where
    S: ChunkStore,
    E: EmbeddingModel + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        embedder: Arc<E>,
        breaker: Arc<CircuitBreaker>,
        options: SearchOptions,
    ) -> Result<Self, SearchError> {
        if store.vector_width() != embedder.dimensions() {
            return Err(SearchError::InvalidConfiguration(format!(
                "store holds {}-wide vectors but {} produces {}",
                store.vector_width(),
                embedder.model_name(),
                embedder.dimensions()
            )));
        }
        if !(-1.0..=1.0).contains(&options.threshold) {
            return Err(SearchError::InvalidConfiguration(format!(
                "default threshold {} outside [-1, 1]",
                options.threshold
            )));
        }

        Ok(Self {
            store,
            embedder,
            breaker,
            options,
        })
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Query carrying the engine's default limit and threshold.
    pub fn query(&self, text: impl Into<String>) -> PolicySearchQuery {
        PolicySearchQuery {
            limit: self.options.limit,
            threshold: self.options.threshold,
            ..PolicySearchQuery::new(text)
        }
    }

    pub async fn search(&self, query: &PolicySearchQuery) -> Result<SearchOutcome, SearchError> {
        if query.text.trim().is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }
        if query.limit == 0 {
            return Err(SearchError::Request("limit must be at least 1".to_string()));
        }
        if !(-1.0..=1.0).contains(&query.threshold) {
            return Err(SearchError::Request(format!(
                "threshold {} outside [-1, 1]",
                query.threshold
            )));
        }

        let filter = CandidateFilter {
            tenant_id: query.tenant_id.clone(),
            category: query.category.clone(),
        };

        let query_vector = if self.breaker.is_open() {
            debug!(breaker = self.breaker.name(), "breaker open, skipping embedding");
            None
        } else {
            match embed_one(self.embedder.as_ref(), &query.text, self.options.embed_timeout).await {
                Ok(vector) => Some(vector),
                Err(error) if error.is_unavailable() => {
                    self.breaker.trip(&error.to_string());
                    warn!(model = self.embedder.model_name(), %error, "query embedding failed");
                    None
                }
                Err(error) => return Err(error.into()),
            }
        };

        let candidates = self.scan(&filter).await?;
        let (mode, results) = match query_vector {
            Some(vector) => (
                SearchMode::Semantic,
                rank_by_similarity(&vector, candidates, query.threshold, query.limit),
            ),
            None => {
                warn!(query = %query.text, "serving keyword fallback results");
                (
                    SearchMode::KeywordFallback,
                    rank_by_keyword_overlap(&query.terms(), candidates, query.limit),
                )
            }
        };

        debug!(?mode, hits = results.len(), "search finished");
        Ok(SearchOutcome {
            query: query.text.clone(),
            mode,
            results,
        })
    }

    async fn scan(&self, filter: &CandidateFilter) -> Result<Vec<CandidateChunk>, SearchError> {
        let timeout = self.options.store_timeout;
        let candidates = tokio::time::timeout(timeout, self.store.scan_candidates(filter))
            .await
            .map_err(|_| StoreError::Timeout(timeout))??;
        Ok(candidates)
    }
}

/// Score every candidate by cosine similarity, keep those at or above
/// `threshold`, and return the best `limit` in descending order. Equal
/// scores keep their storage order.
pub fn rank_by_similarity(
    query_vector: &[f32],
    candidates: Vec<CandidateChunk>,
    threshold: f32,
    limit: usize,
) -> Vec<SimilarityResult> {
    let scored = candidates
        .into_iter()
        .map(|candidate| {
            let score = cosine_similarity(query_vector, &candidate.chunk.embedding);
            (score, candidate)
        })
        .filter(|(score, _)| *score >= threshold)
        .collect();
    top_k(scored, limit)
}

/// Degraded ranking: share of distinct query terms present in the chunk.
pub fn rank_by_keyword_overlap(
    terms: &[String],
    candidates: Vec<CandidateChunk>,
    limit: usize,
) -> Vec<SimilarityResult> {
    if terms.is_empty() {
        return Vec::new();
    }

    let scored = candidates
        .into_iter()
        .filter_map(|candidate| {
            let text = candidate.chunk.content.to_lowercase();
            let matched = terms.iter().filter(|term| text.contains(term.as_str())).count();
            (matched > 0).then(|| (matched as f32 / terms.len() as f32, candidate))
        })
        .collect();
    top_k(scored, limit)
}

fn top_k(mut scored: Vec<(f32, CandidateChunk)>, limit: usize) -> Vec<SimilarityResult> {
    scored.sort_by(|left, right| right.0.total_cmp(&left.0));
    scored
        .into_iter()
        .take(limit)
        .map(|(similarity, candidate)| SimilarityResult {
            chunk_id: candidate.chunk.id,
            chunk_index: candidate.chunk.chunk_index,
            content: candidate.chunk.content,
            start_index: candidate.chunk.start_index,
            end_index: candidate.chunk.end_index,
            section: candidate.chunk.metadata.section,
            similarity,
            policy: candidate.policy,
        })
        .collect()
}

/// Results folded per owning document.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyHitGroup {
    pub policy: PolicySummary,
    /// Highest chunk similarity in the group.
    pub relevance: f32,
    /// Distinct chunk texts in chunk order, blank-line separated.
    pub text: String,
    pub chunk_count: usize,
}

/// Group hits by document, keeping the order of each document's best hit.
pub fn group_by_policy(results: &[SimilarityResult]) -> Vec<PolicyHitGroup> {
    let mut order: Vec<&str> = Vec::new();
    for result in results {
        if !order.contains(&result.policy.id.as_str()) {
            order.push(&result.policy.id);
        }
    }

    order
        .into_iter()
        .map(|policy_id| {
            let mut hits: Vec<&SimilarityResult> = results
                .iter()
                .filter(|result| result.policy.id == policy_id)
                .collect();
            let relevance = hits
                .iter()
                .map(|hit| hit.similarity)
                .fold(f32::NEG_INFINITY, f32::max);
            hits.sort_by_key(|hit| hit.chunk_index);

            let mut seen = HashSet::new();
            let texts: Vec<&str> = hits
                .iter()
                .map(|hit| hit.content.trim())
                .filter(|text| seen.insert(*text))
                .collect();

            PolicyHitGroup {
                policy: hits[0].policy.clone(),
                relevance,
                chunk_count: texts.len(),
                text: texts.join("\n\n"),
            }
        })
        .collect()
}
