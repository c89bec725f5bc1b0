use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyStatus {
    Active,
    Archived,
}

impl PolicyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyStatus::Active => "ACTIVE",
            PolicyStatus::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(PolicyStatus::Active),
            "ARCHIVED" => Ok(PolicyStatus::Archived),
            other => Err(format!("unknown policy status: {other}")),
        }
    }
}

/// Free-form document metadata persisted as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyDocument {
    pub id: String,
    pub title: String,
    pub category_id: String,
    pub category_name: String,
    pub tenant_id: String,
    pub author_id: String,
    pub content: String,
    pub summary: Option<String>,
    pub status: PolicyStatus,
    pub version: u32,
    /// Generation of the chunk set readers should see.
    pub chunk_generation: String,
    pub effective_date: Option<NaiveDate>,
    pub metadata: PolicyMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PolicyDocument {
    pub fn summary_view(&self) -> PolicySummary {
        PolicySummary {
            id: self.id.clone(),
            title: self.title.clone(),
            category: self.category_name.clone(),
        }
    }
}

/// Overlap window and location hints stored alongside each chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub overlap_start: usize,
    pub overlap_end: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// Chunker output, before ids and embeddings are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub chunk_index: u32,
    pub content: String,
    /// Character offsets into the source text, `[start_index, end_index)`.
    pub start_index: usize,
    pub end_index: usize,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyChunk {
    pub id: String,
    pub policy_id: String,
    pub generation: String,
    pub chunk_index: u32,
    pub content: String,
    pub start_index: usize,
    pub end_index: usize,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// Minimal projection of the owning document joined onto search hits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PolicySummary {
    pub id: String,
    pub title: String,
    pub category: String,
}

/// A searchable chunk together with its owning document, in storage order.
#[derive(Debug, Clone)]
pub struct CandidateChunk {
    pub chunk: PolicyChunk,
    pub policy: PolicySummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateFilter {
    pub tenant_id: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyFilter {
    pub tenant_id: String,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SearchMode {
    Semantic,
    KeywordFallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarityResult {
    pub chunk_id: String,
    pub chunk_index: u32,
    pub content: String,
    pub start_index: usize,
    pub end_index: usize,
    pub section: Option<String>,
    pub similarity: f32,
    pub policy: PolicySummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub query: String,
    pub mode: SearchMode,
    pub results: Vec<SimilarityResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicySearchQuery {
    pub text: String,
    pub tenant_id: Option<String>,
    pub category: Option<String>,
    pub limit: usize,
    pub threshold: f32,
}

impl PolicySearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tenant_id: None,
            category: None,
            limit: DEFAULT_SEARCH_LIMIT,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }

    /// Lowercase alphanumeric terms longer than two characters, deduplicated.
    pub fn terms(&self) -> Vec<String> {
        let mut terms: Vec<String> = Vec::new();
        for token in self
            .text
            .split(|c: char| !c.is_alphanumeric())
            .map(|token| token.to_lowercase())
            .filter(|token| token.chars().count() > 2)
        {
            if !terms.contains(&token) {
                terms.push(token);
            }
        }
        terms
    }
}

pub const DEFAULT_SEARCH_LIMIT: usize = 5;
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;

/// Input to [`crate::PolicyLifecycle::ingest`].
#[derive(Debug, Clone, Default)]
pub struct NewPolicy {
    pub title: String,
    pub content: String,
    pub category: String,
    pub tenant_id: String,
    pub author_id: String,
    pub effective_date: Option<NaiveDate>,
    pub metadata: PolicyMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestReceipt {
    pub policy_id: String,
    pub version: u32,
    pub chunk_count: usize,
}

/// Content replacement committed against an expected version.
#[derive(Debug, Clone)]
pub struct PolicyRevision {
    pub policy_id: String,
    pub expected_version: u32,
    pub content: String,
    pub summary: Option<String>,
    pub chunk_generation: String,
    pub metadata: Option<PolicyMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyWithChunks {
    pub policy: PolicyDocument,
    pub chunks: Vec<PolicyChunk>,
}
