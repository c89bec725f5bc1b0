//! Document lifecycle: ingestion, content revisions and retirement.
//!
//! Every write embeds before it touches storage, so a provider failure never
//! leaves a document pointing at a partial chunk set. Revisions are written
//! under a fresh chunk generation and become visible only when the document
//! row commits against the version it was read at.

use crate::chunking::{chunk_text, excerpt, ChunkingOptions};
use crate::embeddings::{embed_all, EmbeddingModel};
use crate::error::{IngestError, StoreError};
use crate::extract::{discover_policy_files, load_policy_file};
use crate::models::{
    Category, ChunkDraft, IngestReceipt, NewPolicy, PolicyDocument, PolicyFilter, PolicyRevision,
    PolicyStatus, PolicyWithChunks,
};
use crate::store::new_generation;
use crate::traits::{ChunkStore, PolicyStore};
use chrono::Utc;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const SUMMARY_CHARS: usize = 280;

#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub chunking: ChunkingOptions,
    pub embed_batch_size: usize,
    pub embed_timeout: Duration,
    pub store_timeout: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingOptions::default(),
            embed_batch_size: 64,
            embed_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub ingested: Vec<IngestReceipt>,
    pub skipped: Vec<SkippedFile>,
}

pub struct PolicyLifecycle<S, E>
where
    S: PolicyStore + ChunkStore,
    E: EmbeddingModel + ?Sized,
{
    store: Arc<S>,
    embedder: Arc<E>,
    options: LifecycleOptions,
}

impl<S, E> PolicyLifecycle<S, E>
where
    S: PolicyStore + ChunkStore,
    E: EmbeddingModel + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        embedder: Arc<E>,
        options: LifecycleOptions,
    ) -> Result<Self, IngestError> {
        options.chunking.validate()?;
        if options.embed_batch_size == 0 {
            return Err(IngestError::InvalidConfiguration(
                "embedding batch size must be positive".to_string(),
            ));
        }
        if store.vector_width() != embedder.dimensions() {
            return Err(StoreError::DimensionMismatch {
                expected: store.vector_width(),
                actual: embedder.dimensions(),
            }
            .into());
        }

        Ok(Self {
            store,
            embedder,
            options,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Create a version 1 ACTIVE document and its chunks.
    pub async fn ingest(&self, input: &NewPolicy) -> Result<IngestReceipt, IngestError> {
        for (field, value) in [
            ("title", &input.title),
            ("content", &input.content),
            ("category", &input.category),
            ("tenant_id", &input.tenant_id),
            ("author_id", &input.author_id),
        ] {
            if value.trim().is_empty() {
                return Err(IngestError::InvalidArgument(format!("{field} is empty")));
            }
        }

        let (drafts, embeddings) = self.prepare(&input.content, &self.options.chunking).await?;
        let category = self
            .bounded(self.store.find_or_create_category(input.category.trim(), None))
            .await?;

        let now = Utc::now();
        let document = PolicyDocument {
            id: Uuid::new_v4().to_string(),
            title: input.title.trim().to_string(),
            category_id: category.id,
            category_name: category.name,
            tenant_id: input.tenant_id.clone(),
            author_id: input.author_id.clone(),
            content: input.content.clone(),
            summary: Some(excerpt(&input.content, SUMMARY_CHARS)),
            status: PolicyStatus::Active,
            version: 1,
            chunk_generation: new_generation(),
            effective_date: input.effective_date,
            metadata: input.metadata.clone(),
            created_at: now,
            updated_at: now,
        };
        self.bounded(self.store.insert_policy(&document)).await?;

        let written = self
            .bounded(self.store.create_chunks(
                &document.id,
                &document.chunk_generation,
                &drafts,
                &embeddings,
            ))
            .await;
        if let Err(error) = written {
            warn!(policy_id = %document.id, %error, "chunk write failed, removing document");
            if let Err(cleanup) = self.bounded(self.store.delete_policy(&document.id)).await {
                warn!(policy_id = %document.id, error = %cleanup, "could not remove document");
            }
            return Err(error.into());
        }

        info!(
            policy_id = %document.id,
            tenant_id = %document.tenant_id,
            category = %document.category_name,
            chunks = drafts.len(),
            "policy ingested"
        );
        Ok(IngestReceipt {
            policy_id: document.id,
            version: document.version,
            chunk_count: drafts.len(),
        })
    }

    /// Replace a document's content and its whole chunk set.
    ///
    /// `expected_version` defaults to the version read at the start of the
    /// call. A concurrent revision that commits first makes this one fail
    /// with [`IngestError::VersionConflict`], leaving the winner intact.
    pub async fn reingest(
        &self,
        policy_id: &str,
        content: &str,
        expected_version: Option<u32>,
    ) -> Result<IngestReceipt, IngestError> {
        if content.trim().is_empty() {
            return Err(IngestError::InvalidArgument("content is empty".to_string()));
        }

        let current = self.require_policy(policy_id).await?;
        let expected = expected_version.unwrap_or(current.version);
        if expected != current.version {
            return Err(IngestError::VersionConflict {
                policy_id: policy_id.to_string(),
                expected,
                actual: current.version,
            });
        }

        let (drafts, embeddings) = self.prepare(content, &self.options.chunking).await?;
        let generation = new_generation();
        self.bounded(self.store.create_chunks(policy_id, &generation, &drafts, &embeddings))
            .await?;

        let revision = PolicyRevision {
            policy_id: policy_id.to_string(),
            expected_version: expected,
            content: content.to_string(),
            summary: Some(excerpt(content, SUMMARY_CHARS)),
            chunk_generation: generation.clone(),
            metadata: None,
        };
        let committed = match self.bounded(self.store.commit_revision(&revision)).await {
            Ok(committed) => committed,
            Err(error) => self.settle_failed_commit(policy_id, &generation, error).await?,
        };

        match self
            .bounded(self.store.prune_generations(policy_id, &generation))
            .await
        {
            Ok(pruned) => info!(
                policy_id,
                version = committed.version,
                chunks = drafts.len(),
                pruned,
                "policy reingested"
            ),
            Err(error) => warn!(policy_id, %error, "old chunk generations left behind"),
        }

        Ok(IngestReceipt {
            policy_id: committed.id,
            version: committed.version,
            chunk_count: drafts.len(),
        })
    }

    /// Re-split unchanged content with different chunking options.
    ///
    /// The chunk set is swapped only if the document is still at the version
    /// that was chunked; a revision committed meanwhile wins.
    pub async fn rechunk(
        &self,
        policy_id: &str,
        chunking: &ChunkingOptions,
    ) -> Result<IngestReceipt, IngestError> {
        let policy = self.require_policy(policy_id).await?;
        let (drafts, embeddings) = self.prepare(&policy.content, chunking).await?;
        let written = self
            .bounded(self.store.replace_chunks(
                policy_id,
                policy.version,
                &drafts,
                &embeddings,
            ))
            .await
            .map_err(revision_error)?;

        info!(policy_id, chunks = written.len(), "policy rechunked");
        Ok(IngestReceipt {
            policy_id: policy.id,
            version: policy.version,
            chunk_count: written.len(),
        })
    }

    /// Retire a document from search. Its chunks stay readable by id.
    pub async fn archive(&self, policy_id: &str) -> Result<PolicyDocument, IngestError> {
        let archived = self
            .bounded(self.store.set_status(policy_id, PolicyStatus::Archived))
            .await
            .map_err(|error| not_found_or(error, policy_id))?;
        info!(policy_id, "policy archived");
        Ok(archived)
    }

    pub async fn get_policy(&self, policy_id: &str) -> Result<PolicyWithChunks, IngestError> {
        let policy = self.require_policy(policy_id).await?;
        let chunks = self
            .bounded(self.store.get_chunks_for_policy(policy_id))
            .await?;
        Ok(PolicyWithChunks { policy, chunks })
    }

    pub async fn list_policies(
        &self,
        tenant_id: &str,
        category: Option<&str>,
    ) -> Result<Vec<PolicyDocument>, IngestError> {
        let filter = PolicyFilter {
            tenant_id: tenant_id.to_string(),
            category: category.map(str::to_string),
        };
        Ok(self.bounded(self.store.list_policies(&filter)).await?)
    }

    pub async fn list_categories(&self) -> Result<Vec<Category>, IngestError> {
        Ok(self.bounded(self.store.list_categories()).await?)
    }

    pub async fn delete_policy(&self, policy_id: &str) -> Result<(), IngestError> {
        if !self.bounded(self.store.delete_policy(policy_id)).await? {
            return Err(IngestError::NotFound(policy_id.to_string()));
        }
        info!(policy_id, "policy deleted");
        Ok(())
    }

    /// Ingest every policy file under `folder`. Files that fail to load or
    /// ingest are reported and skipped.
    pub async fn import_folder(
        &self,
        folder: &Path,
        category: &str,
        tenant_id: &str,
        author_id: &str,
    ) -> Result<ImportReport, IngestError> {
        let files = discover_policy_files(folder);
        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no policy files found in {}",
                folder.display()
            )));
        }

        let mut report = ImportReport::default();
        for path in files {
            let loaded = tokio::task::spawn_blocking({
                let path = path.clone();
                move || load_policy_file(&path)
            })
            .await
            .map_err(|error| IngestError::Io(std::io::Error::other(error)))
            .and_then(|loaded| loaded);

            let outcome = match loaded {
                Ok(source) => {
                    let input = NewPolicy {
                        title: source.title.clone(),
                        content: source.text.clone(),
                        category: category.to_string(),
                        tenant_id: tenant_id.to_string(),
                        author_id: author_id.to_string(),
                        effective_date: None,
                        metadata: source.metadata(),
                    };
                    self.ingest(&input).await
                }
                Err(error) => Err(error),
            };

            match outcome {
                Ok(receipt) => report.ingested.push(receipt),
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        stage = %error.stage(),
                        %error,
                        "skipping policy file"
                    );
                    report.skipped.push(SkippedFile {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        info!(
            folder = %folder.display(),
            ingested = report.ingested.len(),
            skipped = report.skipped.len(),
            "import finished"
        );
        Ok(report)
    }

    /// Decide what a failed revision commit left behind.
    ///
    /// The commit may have landed before the error surfaced, so the stored
    /// row decides: if it points at `generation` the revision is live and its
    /// chunks stay. Otherwise the unused generation is discarded.
    async fn settle_failed_commit(
        &self,
        policy_id: &str,
        generation: &str,
        error: StoreError,
    ) -> Result<PolicyDocument, IngestError> {
        match self.bounded(self.store.get_policy(policy_id)).await {
            Ok(Some(stored)) if stored.chunk_generation == generation => {
                warn!(policy_id, generation, %error, "revision committed despite store error");
                return Ok(stored);
            }
            Ok(_) => {
                let discarded = self
                    .bounded(self.store.discard_generation(policy_id, generation))
                    .await;
                if let Err(cleanup) = discarded {
                    warn!(
                        policy_id,
                        generation,
                        error = %cleanup,
                        "could not discard chunk generation"
                    );
                }
            }
            Err(lookup) => warn!(
                policy_id,
                generation,
                error = %lookup,
                "revision outcome unknown, keeping its chunks"
            ),
        }
        Err(revision_error(error))
    }

    async fn require_policy(&self, policy_id: &str) -> Result<PolicyDocument, IngestError> {
        self.bounded(self.store.get_policy(policy_id))
            .await?
            .ok_or_else(|| IngestError::NotFound(policy_id.to_string()))
    }

    async fn prepare(
        &self,
        content: &str,
        chunking: &ChunkingOptions,
    ) -> Result<(Vec<ChunkDraft>, Vec<Vec<f32>>), IngestError> {
        let drafts = chunk_text(content, chunking)?;
        let texts: Vec<String> = drafts.iter().map(|draft| draft.content.clone()).collect();
        let embeddings = embed_all(
            self.embedder.as_ref(),
            &texts,
            self.options.embed_batch_size,
            self.options.embed_timeout,
        )
        .await?;
        Ok((drafts, embeddings))
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let timeout = self.options.store_timeout;
        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| StoreError::Timeout(timeout))?
    }
}

fn revision_error(error: StoreError) -> IngestError {
    match error {
        StoreError::VersionConflict {
            policy_id,
            expected,
            actual,
        } => IngestError::VersionConflict {
            policy_id,
            expected,
            actual,
        },
        other => other.into(),
    }
}

fn not_found_or(error: StoreError, policy_id: &str) -> IngestError {
    match error {
        StoreError::NotFound(_) => IngestError::NotFound(policy_id.to_string()),
        other => other.into(),
    }
}
