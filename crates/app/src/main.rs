use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use policy_rag_core::{
    complete_with_fallback, fallback_answer, load_policy_file, render_prompt, AssemblerOptions,
    CharacterNgramEmbedder, ChunkingOptions, CircuitBreaker, EmbeddingModel,
    HttpCompletionModel, HttpEmbedder, HttpProviderConfig, LifecycleOptions, NewPolicy,
    PolicyLifecycle, QueryAssembler, SearchOptions, SimilaritySearchEngine,
    SqliteStore, DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Lifecycle = PolicyLifecycle<SqliteStore, dyn EmbeddingModel>;
type Engine = SimilaritySearchEngine<SqliteStore, dyn EmbeddingModel>;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmbedderKind {
    /// Deterministic local character-trigram hashing.
    Ngram,
    /// OpenAI-compatible `/embeddings` endpoint.
    Http,
}

#[derive(Parser)]
#[command(name = "policy-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database file
    #[arg(long, env = "POLICY_RAG_DATABASE", default_value = "policy-rag.db")]
    database: PathBuf,

    /// Embedding provider
    #[arg(long, env = "POLICY_RAG_EMBEDDER", value_enum, default_value = "ngram")]
    embedder: EmbedderKind,

    /// Base URL of the OpenAI-compatible provider
    #[arg(long, env = "POLICY_RAG_ENDPOINT")]
    endpoint: Option<String>,

    /// Provider API key
    #[arg(long, env = "POLICY_RAG_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Embedding model name
    #[arg(long, env = "POLICY_RAG_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,

    /// Embedding width; must match the width the database was created with
    #[arg(long, env = "POLICY_RAG_DIMENSIONS")]
    dimensions: Option<usize>,

    /// Chat completion model used by `ask`
    #[arg(long, env = "POLICY_RAG_COMPLETION_MODEL", default_value = "gpt-4o-mini")]
    completion_model: String,

    /// Chunk size in characters
    #[arg(long, env = "POLICY_RAG_CHUNK_SIZE", default_value = "1000")]
    chunk_size: usize,

    /// Characters shared by neighbouring chunks
    #[arg(long, env = "POLICY_RAG_CHUNK_OVERLAP", default_value = "200")]
    chunk_overlap: usize,

    /// Provider call timeout in seconds
    #[arg(long, env = "POLICY_RAG_TIMEOUT_SECS", default_value = "30")]
    timeout_secs: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one policy file (.txt, .md or .pdf).
    Ingest {
        #[arg(long)]
        file: PathBuf,
        /// Title; defaults to the file name
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        category: String,
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        author: String,
        /// Effective date, YYYY-MM-DD
        #[arg(long)]
        effective_date: Option<NaiveDate>,
    },
    /// Ingest every policy file in a folder, skipping unreadable ones.
    Import {
        #[arg(long)]
        folder: PathBuf,
        #[arg(long)]
        category: String,
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        author: String,
    },
    /// Replace a policy's content from a file.
    Reingest {
        #[arg(long)]
        id: String,
        #[arg(long)]
        file: PathBuf,
        /// Fail unless the policy is still at this version
        #[arg(long)]
        expected_version: Option<u32>,
    },
    /// Re-split a policy with the configured chunk size and overlap.
    Rechunk {
        #[arg(long)]
        id: String,
    },
    /// Rank policy chunks against a query.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// Defaults to 5
        #[arg(long)]
        limit: Option<usize>,
        /// Defaults to 0.7
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Print the prompt context assembled for a question.
    Context {
        #[arg(long)]
        question: String,
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        category: Option<String>,
    },
    /// Answer a question from the tenant's policies.
    Ask {
        #[arg(long)]
        question: String,
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        category: Option<String>,
    },
    /// List a tenant's policies.
    List {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        category: Option<String>,
    },
    /// Show one policy and its chunks.
    Get {
        #[arg(long)]
        id: String,
        #[arg(long, default_value_t = false)]
        show_chunks: bool,
    },
    /// Delete a policy and its chunks.
    Delete {
        #[arg(long)]
        id: String,
    },
    /// Exclude a policy from search.
    Archive {
        #[arg(long)]
        id: String,
    },
    /// List policy categories.
    Categories,
}

impl Cli {
    fn provider_config(&self, model: &str) -> anyhow::Result<HttpProviderConfig> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            bail!("--endpoint (or POLICY_RAG_ENDPOINT) is required for the http provider");
        };
        let mut config = HttpProviderConfig::new(endpoint, model)?;
        config.api_key = self.api_key.clone();
        config.timeout = Duration::from_secs(self.timeout_secs);
        if let Some(dimensions) = self.dimensions {
            config.dimensions = dimensions;
        }
        Ok(config)
    }

    fn embedding_model(&self) -> anyhow::Result<Arc<dyn EmbeddingModel>> {
        let model: Arc<dyn EmbeddingModel> = match self.embedder {
            EmbedderKind::Ngram => Arc::new(CharacterNgramEmbedder {
                dimensions: self.dimensions.unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
            }),
            EmbedderKind::Http => {
                Arc::new(HttpEmbedder::new(self.provider_config(&self.embedding_model)?)?)
            }
        };
        Ok(model)
    }

    fn chunking(&self) -> ChunkingOptions {
        ChunkingOptions {
            chunk_size: self.chunk_size,
            overlap: self.chunk_overlap,
            ..ChunkingOptions::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let embedder = cli.embedding_model()?;
    let store = Arc::new(
        SqliteStore::connect(&cli.database, embedder.dimensions())
            .await
            .with_context(|| format!("opening {}", cli.database.display()))?,
    );
    let breaker = Arc::new(CircuitBreaker::default());
    let timeout = Duration::from_secs(cli.timeout_secs);

    let lifecycle: Lifecycle = PolicyLifecycle::new(
        store.clone(),
        embedder.clone(),
        LifecycleOptions {
            chunking: cli.chunking(),
            embed_timeout: timeout,
            ..LifecycleOptions::default()
        },
    )?;
    let engine: Arc<Engine> = Arc::new(SimilaritySearchEngine::new(
        store,
        embedder.clone(),
        breaker.clone(),
        SearchOptions {
            embed_timeout: timeout,
            ..SearchOptions::default()
        },
    )?);

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        database = %cli.database.display(),
        embedder = embedder.model_name(),
        dimensions = embedder.dimensions(),
        "policy-rag boot"
    );

    match &cli.command {
        Command::Ingest {
            file,
            title,
            category,
            tenant,
            author,
            effective_date,
        } => {
            let source = load_policy_file(file)?;
            let receipt = lifecycle
                .ingest(&NewPolicy {
                    title: title.clone().unwrap_or_else(|| source.title.clone()),
                    content: source.text.clone(),
                    category: category.clone(),
                    tenant_id: tenant.clone(),
                    author_id: author.clone(),
                    effective_date: *effective_date,
                    metadata: source.metadata(),
                })
                .await?;
            println!(
                "ingested policy={} version={} chunks={}",
                receipt.policy_id, receipt.version, receipt.chunk_count
            );
        }
        Command::Import {
            folder,
            category,
            tenant,
            author,
        } => {
            let report = lifecycle
                .import_folder(folder, category, tenant, author)
                .await?;
            for receipt in &report.ingested {
                println!("ingested policy={} chunks={}", receipt.policy_id, receipt.chunk_count);
            }
            if !report.skipped.is_empty() {
                warn!(
                    skipped = report.skipped.len(),
                    folder = %folder.display(),
                    "some files were skipped"
                );
                for skipped in &report.skipped {
                    println!("skipped {}: {}", skipped.path.display(), skipped.reason);
                }
            }
        }
        Command::Reingest {
            id,
            file,
            expected_version,
        } => {
            let source = load_policy_file(file)?;
            let receipt = lifecycle.reingest(id, &source.text, *expected_version).await?;
            println!(
                "reingested policy={} version={} chunks={}",
                receipt.policy_id, receipt.version, receipt.chunk_count
            );
        }
        Command::Rechunk { id } => {
            let receipt = lifecycle.rechunk(id, &cli.chunking()).await?;
            println!("rechunked policy={} chunks={}", receipt.policy_id, receipt.chunk_count);
        }
        Command::Search {
            query,
            tenant,
            category,
            limit,
            threshold,
        } => {
            let mut search = engine.query(query.as_str());
            search.tenant_id = tenant.clone();
            search.category = category.clone();
            if let Some(limit) = limit {
                search.limit = *limit;
            }
            if let Some(threshold) = threshold {
                search.threshold = *threshold;
            }
            let outcome = engine.search(&search).await?;

            println!("query: {} mode={:?}", outcome.query, outcome.mode);
            for hit in outcome.results {
                println!(
                    "score={:.4} policy={} title={:?} chunk={} span={}..{}",
                    hit.similarity,
                    hit.policy.id,
                    hit.policy.title,
                    hit.chunk_index,
                    hit.start_index,
                    hit.end_index
                );
                if let Some(section) = &hit.section {
                    println!("  section={section}");
                }
                println!("  {}", policy_rag_core::normalize_whitespace(&hit.content));
            }
        }
        Command::Context {
            question,
            tenant,
            category,
        } => {
            let assembler = QueryAssembler::new(engine.clone(), AssemblerOptions::default());
            let context = assembler
                .assemble(question, tenant, category.as_deref())
                .await?;
            for citation in &context.citations {
                println!(
                    "[{:.3}] {} ({}) {}",
                    citation.relevance, citation.title, citation.category, citation.policy_id
                );
            }
            println!("{}", context.prompt_context);
        }
        Command::Ask {
            question,
            tenant,
            category,
        } => {
            let assembler = QueryAssembler::new(engine.clone(), AssemblerOptions::default());
            let context = assembler
                .assemble(question, tenant, category.as_deref())
                .await?;
            let prompt = render_prompt(question, &context);

            let answer = if cli.endpoint.is_some() {
                let model = HttpCompletionModel::new(cli.provider_config(&cli.completion_model)?)?;
                complete_with_fallback(&model, &breaker, &prompt, timeout, || {
                    fallback_answer(&context)
                })
                .await?
                .text
            } else {
                fallback_answer(&context)
            };
            println!("{answer}");
            for citation in &context.citations {
                println!("source: {} ({})", citation.title, citation.policy_id);
            }
        }
        Command::List { tenant, category } => {
            for policy in lifecycle.list_policies(tenant, category.as_deref()).await? {
                println!(
                    "{} v{} {} [{}] {:?}",
                    policy.id, policy.version, policy.status, policy.category_name, policy.title
                );
            }
        }
        Command::Get { id, show_chunks } => {
            let loaded = lifecycle.get_policy(id).await?;
            let policy = &loaded.policy;
            println!("id: {}", policy.id);
            println!("title: {}", policy.title);
            println!("category: {}", policy.category_name);
            println!("tenant: {}", policy.tenant_id);
            println!("status: {} version: {}", policy.status, policy.version);
            if let Some(date) = policy.effective_date {
                println!("effective: {date}");
            }
            if let Some(summary) = &policy.summary {
                println!("summary: {summary}");
            }
            println!("chunks: {}", loaded.chunks.len());
            if *show_chunks {
                for chunk in &loaded.chunks {
                    println!(
                        "[{}] {}..{} {}",
                        chunk.chunk_index,
                        chunk.start_index,
                        chunk.end_index,
                        policy_rag_core::normalize_whitespace(&chunk.content)
                    );
                }
            }
        }
        Command::Delete { id } => {
            lifecycle.delete_policy(id).await?;
            println!("deleted policy={id}");
        }
        Command::Archive { id } => {
            let archived = lifecycle.archive(id).await?;
            println!("archived policy={} version={}", archived.id, archived.version);
        }
        Command::Categories => {
            for category in lifecycle.list_categories().await? {
                match &category.description {
                    Some(description) => {
                        println!("{} {} - {description}", category.id, category.name)
                    }
                    None => println!("{} {}", category.id, category.name),
                }
            }
        }
    }

    Ok(())
}
