use crate::chunking::{normalize_whitespace, truncate_chars};
use crate::embeddings::EmbeddingModel;
use crate::error::SearchError;
use crate::models::{PolicySearchQuery, SearchMode};
use crate::search::{group_by_policy, PolicyHitGroup, SimilaritySearchEngine};
use crate::traits::ChunkStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AssemblerOptions {
    pub limit: usize,
    pub threshold: f32,
    /// Maximum characters of a citation snippet.
    pub snippet_chars: usize,
    pub separator: String,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        Self {
            limit: 3,
            threshold: 0.6,
            snippet_chars: 200,
            separator: "\n\n---\n\n".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub policy_id: String,
    pub title: String,
    pub category: String,
    pub relevance: f32,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledContext {
    /// Full text of the retrieved chunks, one block per policy. Empty when
    /// nothing cleared the threshold.
    pub prompt_context: String,
    pub citations: Vec<Citation>,
    pub mode: SearchMode,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }
}

/// Turns a question into prompt-ready policy context.
pub struct QueryAssembler<S, E>
where
    S: ChunkStore,
    E: EmbeddingModel + ?Sized,
{
    engine: Arc<SimilaritySearchEngine<S, E>>,
    options: AssemblerOptions,
}

impl<S, E> QueryAssembler<S, E>
where
    S: ChunkStore,
    E: EmbeddingModel + ?Sized,
{
    pub fn new(engine: Arc<SimilaritySearchEngine<S, E>>, options: AssemblerOptions) -> Self {
        Self { engine, options }
    }

    /// Retrieve context for `question` within `tenant_id`. A category hint
    /// narrows the search first and is dropped if it finds nothing.
    pub async fn assemble(
        &self,
        question: &str,
        tenant_id: &str,
        category_hint: Option<&str>,
    ) -> Result<AssembledContext, SearchError> {
        let mut query = PolicySearchQuery {
            tenant_id: Some(tenant_id.to_string()),
            category: category_hint.map(str::to_string),
            limit: self.options.limit,
            threshold: self.options.threshold,
            ..PolicySearchQuery::new(question)
        };

        let mut outcome = self.engine.search(&query).await?;
        if outcome.results.is_empty() && query.category.is_some() {
            debug!(category = ?query.category, "no hits within category hint, widening");
            query.category = None;
            outcome = self.engine.search(&query).await?;
        }

        let groups = group_by_policy(&outcome.results);
        Ok(AssembledContext {
            prompt_context: format_blocks(&groups, &self.options.separator),
            citations: groups
                .iter()
                .map(|group| Citation {
                    policy_id: group.policy.id.clone(),
                    title: group.policy.title.clone(),
                    category: group.policy.category.clone(),
                    relevance: group.relevance,
                    snippet: truncate_chars(
                        &normalize_whitespace(&group.text),
                        self.options.snippet_chars,
                    ),
                })
                .collect(),
            mode: outcome.mode,
        })
    }
}

fn format_blocks(groups: &[PolicyHitGroup], separator: &str) -> String {
    groups
        .iter()
        .map(|group| {
            format!(
                "Policy: {}\nCategory: {}\n\n{}",
                group.policy.title, group.policy.category, group.text
            )
        })
        .collect::<Vec<_>>()
        .join(separator)
}

/// Wrap assembled context and the question into a completion prompt.
pub fn render_prompt(question: &str, context: &AssembledContext) -> String {
    if context.is_empty() {
        return format!(
            "No company policy matched this question. Say so and suggest contacting HR.\n\n\
             Question: {question}"
        );
    }

    format!(
        "Answer the employee's question using only the company policies below. \
Cite policy titles.\n\n{}\n\nQuestion: {question}",
        context.prompt_context
    )
}

/// Answer assembled from citations alone, used while the completion
/// provider is unavailable.
pub fn fallback_answer(context: &AssembledContext) -> String {
    if context.is_empty() {
        return "No matching policy was found. Please contact HR.".to_string();
    }

    let mut answer = String::from("The following policies look relevant:\n");
    for citation in &context.citations {
        answer.push_str(&format!(
            "\n- {} ({}): {}",
            citation.title, citation.category, citation.snippet
        ));
    }
    answer
}
