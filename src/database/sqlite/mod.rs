use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{ConnectOptions, Connection, Pool, Sqlite, SqliteConnection};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::sqlite::models::{
    ChunkHit, DocumentHit, DocumentInfo, NewRootEntry, order_by_rank,
};
use crate::database::sqlite::queries::{ChunkQueries, RootQueries};
use crate::{EngineError, Result, validate_document_id};


pub mod models;
pub mod queries;

pub use models::*;

pub type DbPool = Pool<Sqlite>;

const CHUNK_DB_EXT: &str = "db";

/// Relational side of the engine: one pooled root database mapping root vector ids
/// to documents, plus one single-file chunk database per document.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    pool: DbPool,
    sub_index_path: PathBuf,
}

impl MetadataStore {
    #[inline]
    pub async fn open(config: &Config) -> Result<Self> {
        Self::new(
            config.root_metadata_path(),
            config.sub_index_path(),
            config.storage.max_connections,
        )
        .await
    }

    pub async fn new<P: AsRef<Path>>(
        root_db_path: P,
        sub_index_path: PathBuf,
        max_connections: u32,
    ) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(root_db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| EngineError::Database(format!("Failed to open root metadata: {e}")))?;

        std::fs::create_dir_all(&sub_index_path)?;

        let store = Self {
            pool,
            sub_index_path,
        };
        store.run_migrations().await?;

        Ok(store)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running root metadata migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EngineError::Database(format!("Failed to run schema migration: {e}")))?;

        debug!("Root metadata migrations completed");
        Ok(())
    }

    #[inline]
    pub async fn has_document(&self, content_hash: &str) -> Result<bool> {
        Ok(RootQueries::exists_by_hash(&self.pool, content_hash).await?)
    }

    #[inline]
    pub async fn has_document_id(&self, document_id: &str) -> Result<bool> {
        Ok(RootQueries::exists_by_document_id(&self.pool, document_id).await?)
    }

    /// Insert the root row for a document. The UNIQUE constraints on hash and id make
    /// the duplicate check and the insert a single atomic statement.
    ///
    /// A clash on `root_vector_id` alone is not a duplicate upload and is reported as
    /// [`EngineError::Database`].
    pub async fn add_root_entry(&self, entry: &NewRootEntry) -> Result<()> {
        match RootQueries::insert(&self.pool, entry).await {
            Ok(()) => {
                debug!(
                    "Added root metadata for {} (root id {})",
                    entry.document_id, entry.root_vector_id
                );
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => {
                if self.has_document(&entry.content_hash).await? {
                    Err(EngineError::DuplicateDocument(entry.content_hash.clone()))
                } else if self.has_document_id(&entry.document_id).await? {
                    Err(EngineError::DuplicateDocument(entry.document_id.clone()))
                } else {
                    Err(EngineError::Database(format!(
                        "Root vector id {} already has a metadata row: {e}",
                        entry.root_vector_id
                    )))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a document's root row, returning `(root_vector_id, filename)`.
    pub async fn remove_root_entry(&self, document_id: &str) -> Result<(i64, String)> {
        RootQueries::take_by_document_id(&self.pool, document_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(document_id.to_string()))
    }

    /// Translate root vector ids into hits, keeping the given rank order.
    /// Ids without a row (deleted since the vector search) are skipped.
    pub async fn query_root(&self, root_vector_ids: &[i64]) -> Result<Vec<DocumentHit>> {
        let rows = RootQueries::hits_by_vector_ids(&self.pool, root_vector_ids).await?;
        Ok(order_by_rank(root_vector_ids, rows, |row| row.root_vector_id)
            .into_iter()
            .map(DocumentHit::from)
            .collect())
    }

    pub async fn add_chunks(
        &self,
        document_id: &str,
        local_vector_ids: &[i64],
        page_numbers: &[i64],
        texts: &[String],
    ) -> Result<()> {
        validate_document_id(document_id)?;
        if local_vector_ids.len() != page_numbers.len() || local_vector_ids.len() != texts.len()
        {
            return Err(EngineError::ArityMismatch {
                ids: local_vector_ids.len(),
                pages: page_numbers.len(),
                texts: texts.len(),
            });
        }

        let mut conn = self.connect_chunks(document_id, true).await?;
        ChunkQueries::create_table(&mut conn).await?;
        let inserted =
            ChunkQueries::insert_batch(&mut conn, local_vector_ids, page_numbers, texts).await;
        close_quietly(conn).await;
        let inserted = inserted?;

        debug!("Added {} chunk rows for {}", inserted, document_id);
        Ok(())
    }

    /// Look up chunks by local vector id, keeping rank order. Unknown ids and a
    /// missing chunk database both yield fewer results rather than an error.
    pub async fn query_chunks(
        &self,
        document_id: &str,
        local_vector_ids: &[i64],
    ) -> Result<Vec<ChunkHit>> {
        validate_document_id(document_id)?;
        if local_vector_ids.is_empty() || !self.has_chunks(document_id) {
            return Ok(Vec::new());
        }

        let mut conn = self.connect_chunks(document_id, false).await?;
        let rows = ChunkQueries::by_local_ids(&mut conn, local_vector_ids).await;
        close_quietly(conn).await;

        Ok(order_by_rank(local_vector_ids, rows?, |row| row.local_id)
            .into_iter()
            .map(ChunkHit::from)
            .collect())
    }

    /// Number of chunk rows stored for a document, `None` when it has no chunk database
    pub async fn count_chunks(&self, document_id: &str) -> Result<Option<i64>> {
        validate_document_id(document_id)?;
        if !self.has_chunks(document_id) {
            return Ok(None);
        }

        let mut conn = self.connect_chunks(document_id, false).await?;
        ChunkQueries::create_table(&mut conn).await?;
        let count = ChunkQueries::count(&mut conn).await;
        close_quietly(conn).await;

        Ok(Some(count?))
    }

    #[inline]
    pub fn has_chunks(&self, document_id: &str) -> bool {
        self.chunk_db_path(document_id).is_file()
    }

    /// Delete a document's chunk database file. Returns whether anything was removed.
    /// Anything at that path that is not a regular file is left alone.
    pub async fn remove_chunks(&self, document_id: &str) -> Result<bool> {
        validate_document_id(document_id)?;
        let path = self.chunk_db_path(document_id);
        let removed = self.has_chunks(document_id) && remove_file_if_exists(&path)?;
        remove_file_if_exists(&path.with_extension(format!("{CHUNK_DB_EXT}-journal")))?;

        if removed {
            debug!("Removed chunk database for {}", document_id);
        }
        Ok(removed)
    }

    /// Document ids that currently own a chunk database file
    pub fn list_chunk_documents(&self) -> Result<Vec<String>> {
        let mut documents = Vec::new();
        for entry in std::fs::read_dir(&self.sub_index_path)? {
            let path = entry?.path();
            if path.is_file()
                && path.extension().and_then(|ext| ext.to_str()) == Some(CHUNK_DB_EXT)
            {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    documents.push(stem.to_string());
                }
            }
        }
        documents.sort_unstable();
        Ok(documents)
    }

    #[inline]
    pub async fn clear_root(&self) -> Result<()> {
        let removed = RootQueries::clear(&self.pool).await?;
        info!("Cleared {} root metadata rows", removed);
        Ok(())
    }

    /// Remove every per-document chunk database
    pub async fn clear_chunks(&self) -> Result<usize> {
        let documents = self.list_chunk_documents()?;
        for document_id in &documents {
            self.remove_chunks(document_id).await?;
        }
        Ok(documents.len())
    }

    #[inline]
    pub async fn list_documents(&self) -> Result<Vec<DocumentInfo>> {
        Ok(RootQueries::list_all(&self.pool).await?)
    }

    #[inline]
    pub async fn get_document(&self, document_id: &str) -> Result<DocumentInfo> {
        RootQueries::get_by_document_id(&self.pool, document_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(document_id.to_string()))
    }

    #[inline]
    pub async fn list_root_vector_ids(&self) -> Result<Vec<i64>> {
        Ok(RootQueries::list_vector_ids(&self.pool).await?)
    }

    #[inline]
    pub async fn document_count(&self) -> Result<i64> {
        Ok(RootQueries::count(&self.pool).await?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Root metadata pool closed");
    }

    fn chunk_db_path(&self, document_id: &str) -> PathBuf {
        self.sub_index_path
            .join(format!("{document_id}.{CHUNK_DB_EXT}"))
    }

    async fn connect_chunks(&self, document_id: &str, create: bool) -> Result<SqliteConnection> {
        SqliteConnectOptions::new()
            .filename(self.chunk_db_path(document_id))
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Delete)
            .synchronous(SqliteSynchronous::Full)
            .connect()
            .await
            .map_err(|e| {
                EngineError::Database(format!(
                    "Failed to open chunk database for {document_id}: {e}"
                ))
            })
    }
}

fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .is_some_and(|e| e.is_unique_violation())
}

fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn close_quietly(conn: SqliteConnection) {
    if let Err(e) = conn.close().await {
        warn!("Failed to close chunk database connection: {}", e);
    }
}
