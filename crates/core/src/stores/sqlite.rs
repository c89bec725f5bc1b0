//! SQLite-backed store.
//!
//! Tables follow the logical layout `policy_categories`, `policies`,
//! `policy_chunks`, plus `store_settings` which pins the vector width the
//! database was created with. Embeddings are little-endian `f32` BLOBs and
//! similarity is computed by the search engine over scanned candidates.

use crate::embeddings::{blob_to_vec, vec_to_blob};
use crate::error::StoreError;
use crate::models::{
    CandidateChunk, CandidateFilter, Category, ChunkDraft, ChunkMetadata, PolicyChunk,
    PolicyDocument, PolicyFilter, PolicyMetadata, PolicyRevision, PolicyStatus, PolicySummary,
};
use crate::store::{materialize_chunks, validate_embeddings};
use crate::traits::{ChunkStore, PolicyStore};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

const SCHEMA: [&str; 6] = [
    r#"
    CREATE TABLE IF NOT EXISTS store_settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS policy_categories (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE COLLATE NOCASE,
        description TEXT,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS policies (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        category_id TEXT NOT NULL REFERENCES policy_categories(id),
        tenant_id TEXT NOT NULL,
        author_id TEXT NOT NULL,
        content TEXT NOT NULL,
        summary TEXT,
        status TEXT NOT NULL,
        version INTEGER NOT NULL,
        chunk_generation TEXT NOT NULL,
        effective_date TEXT,
        metadata TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_policies_tenant ON policies (tenant_id, status)",
    r#"
    CREATE TABLE IF NOT EXISTS policy_chunks (
        id TEXT PRIMARY KEY,
        policy_id TEXT NOT NULL REFERENCES policies(id) ON DELETE CASCADE,
        generation TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        content TEXT NOT NULL,
        start_index INTEGER NOT NULL,
        end_index INTEGER NOT NULL,
        metadata TEXT NOT NULL,
        embedding BLOB NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE (policy_id, generation, chunk_index)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_policy_chunks_generation
    ON policy_chunks (policy_id, generation)
    "#,
];

const POLICY_COLUMNS: &str = r#"
    SELECT p.id, p.title, p.category_id, c.name AS category_name, p.tenant_id, p.author_id,
           p.content, p.summary, p.status, p.version, p.chunk_generation, p.effective_date,
           p.metadata, p.created_at, p.updated_at
    FROM policies p
    JOIN policy_categories c ON c.id = p.category_id
"#;

pub struct SqliteStore {
    pool: SqlitePool,
    vector_width: usize,
}

impl SqliteStore {
    /// Open (creating if missing) a database file in WAL mode.
    pub async fn connect(path: &Path, vector_width: usize) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::from_pool(pool, vector_width).await
    }

    /// Private in-memory database held on a single pooled connection.
    pub async fn connect_in_memory(vector_width: usize) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::from_pool(pool, vector_width).await
    }

    pub async fn from_pool(pool: SqlitePool, vector_width: usize) -> Result<Self, StoreError> {
        let store = Self { pool, vector_width };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        sqlx::query("INSERT OR IGNORE INTO store_settings (key, value) VALUES ('vector_width', ?)")
            .bind(self.vector_width.to_string())
            .execute(&self.pool)
            .await?;

        let stored: String =
            sqlx::query_scalar("SELECT value FROM store_settings WHERE key = 'vector_width'")
                .fetch_one(&self.pool)
                .await?;
        let stored = stored
            .parse::<usize>()
            .map_err(|_| StoreError::Corrupt(format!("vector_width setting {stored:?}")))?;

        if stored != self.vector_width {
            return Err(StoreError::DimensionMismatch {
                expected: stored,
                actual: self.vector_width,
            });
        }

        debug!(vector_width = stored, "sqlite schema ready");
        Ok(())
    }

    async fn insert_chunk_rows(
        tx: &mut Transaction<'_, Sqlite>,
        rows: &[PolicyChunk],
    ) -> Result<(), StoreError> {
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO policy_chunks (id, policy_id, generation, chunk_index, content,
                                           start_index, end_index, metadata, embedding, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.id)
            .bind(&row.policy_id)
            .bind(&row.generation)
            .bind(i64::from(row.chunk_index))
            .bind(&row.content)
            .bind(row.start_index as i64)
            .bind(row.end_index as i64)
            .bind(serde_json::to_string(&row.metadata)?)
            .bind(vec_to_blob(&row.embedding))
            .bind(row.created_at.timestamp_millis())
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    fn chunk_from_row(&self, row: &SqliteRow) -> Result<PolicyChunk, StoreError> {
        let blob: Vec<u8> = row.try_get("embedding")?;
        let embedding = blob_to_vec(&blob);
        if embedding.len() != self.vector_width {
            return Err(StoreError::DimensionMismatch {
                expected: self.vector_width,
                actual: embedding.len(),
            });
        }

        let metadata: String = row.try_get("metadata")?;
        Ok(PolicyChunk {
            id: row.try_get("id")?,
            policy_id: row.try_get("policy_id")?,
            generation: row.try_get("generation")?,
            chunk_index: to_u32(row.try_get("chunk_index")?, "chunk_index")?,
            content: row.try_get("content")?,
            start_index: to_usize(row.try_get("start_index")?, "start_index")?,
            end_index: to_usize(row.try_get("end_index")?, "end_index")?,
            metadata: serde_json::from_str::<ChunkMetadata>(&metadata)?,
            embedding,
            created_at: from_millis(row.try_get("created_at")?)?,
        })
    }

    /// Explain why a version-guarded update matched no row.
    async fn revision_refused(
        tx: &mut Transaction<'_, Sqlite>,
        policy_id: &str,
        expected_version: u32,
    ) -> StoreError {
        let current: Result<Option<i64>, sqlx::Error> =
            sqlx::query_scalar("SELECT version FROM policies WHERE id = ?")
                .bind(policy_id)
                .fetch_optional(&mut **tx)
                .await;
        match current {
            Ok(Some(actual)) => match to_u32(actual, "version") {
                Ok(actual) => StoreError::VersionConflict {
                    policy_id: policy_id.to_string(),
                    expected: expected_version,
                    actual,
                },
                Err(error) => error,
            },
            Ok(None) => StoreError::NotFound(format!("policy {policy_id}")),
            Err(error) => error.into(),
        }
    }
}

fn policy_from_row(row: &SqliteRow) -> Result<PolicyDocument, StoreError> {
    let status: String = row.try_get("status")?;
    let metadata: String = row.try_get("metadata")?;
    let effective_date: Option<String> = row.try_get("effective_date")?;

    Ok(PolicyDocument {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        category_id: row.try_get("category_id")?,
        category_name: row.try_get("category_name")?,
        tenant_id: row.try_get("tenant_id")?,
        author_id: row.try_get("author_id")?,
        content: row.try_get("content")?,
        summary: row.try_get("summary")?,
        status: status.parse::<PolicyStatus>().map_err(StoreError::Corrupt)?,
        version: to_u32(row.try_get("version")?, "version")?,
        chunk_generation: row.try_get("chunk_generation")?,
        effective_date: effective_date
            .map(|value| {
                NaiveDate::parse_from_str(&value, "%Y-%m-%d")
                    .map_err(|_| StoreError::Corrupt(format!("effective_date {value:?}")))
            })
            .transpose()?,
        metadata: serde_json::from_str::<PolicyMetadata>(&metadata)?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

fn category_from_row(row: &SqliteRow) -> Result<Category, StoreError> {
    Ok(Category {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
    })
}

fn to_u32(value: i64, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} = {value}")))
}

fn to_usize(value: i64, column: &str) -> Result<usize, StoreError> {
    usize::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} = {value}")))
}

fn from_millis(value: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {value}")))
}

#[async_trait]
impl ChunkStore for SqliteStore {
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
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM policies WHERE id = ?")
            .bind(policy_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!("policy {policy_id}")));
        }

        let rows = materialize_chunks(policy_id, generation, chunks, embeddings);
        Self::insert_chunk_rows(&mut tx, &rows).await?;
        tx.commit().await?;
        Ok(rows)
    }

    async fn get_chunks_for_policy(&self, policy_id: &str) -> Result<Vec<PolicyChunk>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT ch.*
            FROM policy_chunks ch
            JOIN policies p ON p.id = ch.policy_id AND p.chunk_generation = ch.generation
            WHERE ch.policy_id = ?
            ORDER BY ch.chunk_index ASC
            "#,
        )
        .bind(policy_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.chunk_from_row(row)).collect()
    }

    async fn delete_chunks_for_policy(&self, policy_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM policy_chunks WHERE policy_id = ?")
            .bind(policy_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn replace_chunks(
        &self,
        policy_id: &str,
        expected_version: u32,
        chunks: &[ChunkDraft],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<PolicyChunk>, StoreError> {
        validate_embeddings(self.vector_width, chunks.len(), embeddings)?;
        let mut tx = self.pool.begin().await?;

        // Writing first takes the write lock before the generation is read.
        let claimed = sqlx::query("UPDATE policies SET updated_at = ? WHERE id = ? AND version = ?")
            .bind(Utc::now().timestamp_millis())
            .bind(policy_id)
            .bind(i64::from(expected_version))
            .execute(&mut *tx)
            .await?;
        if claimed.rows_affected() == 0 {
            return Err(Self::revision_refused(&mut tx, policy_id, expected_version).await);
        }

        let generation: String =
            sqlx::query_scalar("SELECT chunk_generation FROM policies WHERE id = ?")
                .bind(policy_id)
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM policy_chunks WHERE policy_id = ? AND generation = ?")
            .bind(policy_id)
            .bind(&generation)
            .execute(&mut *tx)
            .await?;

        let rows = materialize_chunks(policy_id, &generation, chunks, embeddings);
        Self::insert_chunk_rows(&mut tx, &rows).await?;
        tx.commit().await?;
        Ok(rows)
    }

    async fn discard_generation(
        &self,
        policy_id: &str,
        generation: &str,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM policy_chunks WHERE policy_id = ? AND generation = ?")
            .bind(policy_id)
            .bind(generation)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn prune_generations(&self, policy_id: &str, keep: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM policy_chunks WHERE policy_id = ? AND generation <> ?",
        )
        .bind(policy_id)
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn scan_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<CandidateChunk>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT ch.*, p.title AS policy_title, c.name AS category_name
            FROM policy_chunks ch
            JOIN policies p ON p.id = ch.policy_id AND p.chunk_generation = ch.generation
            JOIN policy_categories c ON c.id = p.category_id
            WHERE p.status = 'ACTIVE'
              AND (?1 IS NULL OR p.tenant_id = ?1)
              AND (?2 IS NULL OR c.name = ?2)
            ORDER BY p.rowid ASC, ch.chunk_index ASC
            "#,
        )
        .bind(filter.tenant_id.as_deref())
        .bind(filter.category.as_deref())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<CandidateChunk, StoreError> {
                let chunk = self.chunk_from_row(row)?;
                Ok(CandidateChunk {
                    policy: PolicySummary {
                        id: chunk.policy_id.clone(),
                        title: row.try_get("policy_title")?,
                        category: row.try_get("category_name")?,
                    },
                    chunk,
                })
            })
            .collect()
    }
}

#[async_trait]
impl PolicyStore for SqliteStore {
    async fn find_or_create_category(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Category, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO policy_categories (id, name, description, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(description)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT id, name, description FROM policy_categories WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        category_from_row(&row)
    }

    async fn list_categories(&self) -> Result<Vec<Category>, StoreError> {
        let rows = sqlx::query("SELECT id, name, description FROM policy_categories ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(category_from_row).collect()
    }

    async fn insert_policy(&self, policy: &PolicyDocument) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO policies (id, title, category_id, tenant_id, author_id, content, summary,
                                  status, version, chunk_generation, effective_date, metadata,
                                  created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&policy.id)
        .bind(&policy.title)
        .bind(&policy.category_id)
        .bind(&policy.tenant_id)
        .bind(&policy.author_id)
        .bind(&policy.content)
        .bind(&policy.summary)
        .bind(policy.status.as_str())
        .bind(i64::from(policy.version))
        .bind(&policy.chunk_generation)
        .bind(policy.effective_date.map(|date| date.format("%Y-%m-%d").to_string()))
        .bind(serde_json::to_string(&policy.metadata)?)
        .bind(policy.created_at.timestamp_millis())
        .bind(policy.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_policy(&self, policy_id: &str) -> Result<Option<PolicyDocument>, StoreError> {
        let row = sqlx::query(&format!("{POLICY_COLUMNS} WHERE p.id = ?"))
            .bind(policy_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(policy_from_row).transpose()
    }

    async fn list_policies(
        &self,
        filter: &PolicyFilter,
    ) -> Result<Vec<PolicyDocument>, StoreError> {
        let rows = sqlx::query(&format!(
            "{POLICY_COLUMNS} WHERE p.tenant_id = ?1 AND (?2 IS NULL OR c.name = ?2) \
             ORDER BY p.title"
        ))
        .bind(&filter.tenant_id)
        .bind(filter.category.as_deref())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(policy_from_row).collect()
    }

    async fn commit_revision(
        &self,
        revision: &PolicyRevision,
    ) -> Result<PolicyDocument, StoreError> {
        let metadata = revision
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE policies
            SET content = ?, summary = ?, version = version + 1, chunk_generation = ?,
                metadata = COALESCE(?, metadata), updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&revision.content)
        .bind(&revision.summary)
        .bind(&revision.chunk_generation)
        .bind(metadata)
        .bind(Utc::now().timestamp_millis())
        .bind(&revision.policy_id)
        .bind(i64::from(revision.expected_version))
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(
                Self::revision_refused(&mut tx, &revision.policy_id, revision.expected_version)
                    .await,
            );
        }

        let row = sqlx::query(&format!("{POLICY_COLUMNS} WHERE p.id = ?"))
            .bind(&revision.policy_id)
            .fetch_one(&mut *tx)
            .await?;
        let committed = policy_from_row(&row)?;
        tx.commit().await?;
        Ok(committed)
    }

    async fn set_status(
        &self,
        policy_id: &str,
        status: PolicyStatus,
    ) -> Result<PolicyDocument, StoreError> {
        let result = sqlx::query("UPDATE policies SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().timestamp_millis())
            .bind(policy_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("policy {policy_id}")));
        }

        self.get_policy(policy_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("policy {policy_id}")))
    }

    async fn delete_policy(&self, policy_id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM policy_chunks WHERE policy_id = ?")
            .bind(policy_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM policies WHERE id = ?")
            .bind(policy_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
