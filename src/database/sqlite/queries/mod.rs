
use super::models::*;
use anyhow::{Context, Result};
use chrono::Utc;
use itertools::Itertools;
use sqlx::{Connection, SqliteConnection, SqlitePool};
use tracing::debug;

const DOCUMENT_COLUMNS: &str =
    "document_id, content_hash, filename, summary, root_vector_id, added_date";

fn placeholders(count: usize) -> String {
    std::iter::repeat_n("?", count).join(", ")
}

pub struct RootQueries;

impl RootQueries {
    #[inline]
    pub async fn insert(pool: &SqlitePool, entry: &NewRootEntry) -> Result<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            "INSERT INTO documents (root_vector_id, document_id, content_hash, filename, summary, added_date) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.root_vector_id)
        .bind(&entry.document_id)
        .bind(&entry.content_hash)
        .bind(&entry.filename)
        .bind(&entry.summary)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to insert root metadata")?;

        Ok(())
    }

    #[inline]
    pub async fn exists_by_hash(pool: &SqlitePool, content_hash: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM documents WHERE content_hash = ?)",
        )
        .bind(content_hash)
        .fetch_one(pool)
        .await
        .context("Failed to check document hash")?;

        Ok(exists)
    }

    #[inline]
    pub async fn exists_by_document_id(pool: &SqlitePool, document_id: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM documents WHERE document_id = ?)",
        )
        .bind(document_id)
        .fetch_one(pool)
        .await
        .context("Failed to check document id")?;

        Ok(exists)
    }

    #[inline]
    pub async fn get_by_document_id(
        pool: &SqlitePool,
        document_id: &str,
    ) -> Result<Option<DocumentInfo>> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE document_id = ?");
        let document = sqlx::query_as::<_, DocumentInfo>(&query)
            .bind(document_id)
            .fetch_optional(pool)
            .await
            .context("Failed to get document by id")?;

        Ok(document)
    }

    /// Delete a document's row, returning its root vector id and filename.
    /// The lookup and the delete run in one transaction.
    #[inline]
    pub async fn take_by_document_id(
        pool: &SqlitePool,
        document_id: &str,
    ) -> Result<Option<(i64, String)>> {
        let mut tx = pool.begin().await.context("Failed to begin transaction")?;

        let found = sqlx::query_as::<_, (i64, String)>(
            "SELECT root_vector_id, filename FROM documents WHERE document_id = ?",
        )
        .bind(document_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to look up document for removal")?;

        if found.is_some() {
            sqlx::query("DELETE FROM documents WHERE document_id = ?")
                .bind(document_id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete root metadata")?;
        }

        tx.commit()
            .await
            .context("Failed to commit root metadata removal")?;

        Ok(found)
    }

    #[inline]
    pub async fn hits_by_vector_ids(
        pool: &SqlitePool,
        root_vector_ids: &[i64],
    ) -> Result<Vec<RootHitRow>> {
        if root_vector_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT root_vector_id, document_id, summary FROM documents WHERE root_vector_id IN ({})",
            placeholders(root_vector_ids.len())
        );
        let mut query = sqlx::query_as::<_, RootHitRow>(&query);
        for id in root_vector_ids {
            query = query.bind(id);
        }

        let rows = query
            .fetch_all(pool)
            .await
            .context("Failed to query root metadata by vector ids")?;

        debug!(
            "Resolved {} of {} root vector ids",
            rows.len(),
            root_vector_ids.len()
        );
        Ok(rows)
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<DocumentInfo>> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY root_vector_id");
        let documents = sqlx::query_as::<_, DocumentInfo>(&query)
            .fetch_all(pool)
            .await
            .context("Failed to list documents")?;

        Ok(documents)
    }

    #[inline]
    pub async fn list_vector_ids(pool: &SqlitePool) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT root_vector_id FROM documents ORDER BY root_vector_id",
        )
        .fetch_all(pool)
        .await
        .context("Failed to list root vector ids")?;

        Ok(ids)
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM documents")
            .fetch_one(pool)
            .await
            .context("Failed to count documents")?;

        Ok(count)
    }

    #[inline]
    pub async fn clear(pool: &SqlitePool) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents")
            .execute(pool)
            .await
            .context("Failed to clear root metadata")?;

        Ok(result.rows_affected())
    }
}

/// Queries against a single document's chunk database
pub struct ChunkQueries;

impl ChunkQueries {
    #[inline]
    pub async fn create_table(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunks (
                local_id INTEGER PRIMARY KEY NOT NULL,
                page_number INTEGER NOT NULL,
                text TEXT NOT NULL
            )",
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create chunk table")?;

        Ok(())
    }

    /// Insert all chunks in one transaction; either every row lands or none do.
    #[inline]
    pub async fn insert_batch(
        conn: &mut SqliteConnection,
        local_ids: &[i64],
        page_numbers: &[i64],
        texts: &[String],
    ) -> Result<u64> {
        let mut tx = conn.begin().await.context("Failed to begin transaction")?;
        let mut inserted = 0;

        for ((local_id, page_number), text) in local_ids.iter().zip(page_numbers).zip(texts) {
            sqlx::query("INSERT INTO chunks (local_id, page_number, text) VALUES (?, ?, ?)")
                .bind(local_id)
                .bind(page_number)
                .bind(text)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to insert chunk {local_id}"))?;
            inserted += 1;
        }

        tx.commit().await.context("Failed to commit chunk insert")?;
        Ok(inserted)
    }

    #[inline]
    pub async fn by_local_ids(
        conn: &mut SqliteConnection,
        local_ids: &[i64],
    ) -> Result<Vec<ChunkRow>> {
        if local_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT local_id, page_number, text FROM chunks WHERE local_id IN ({})",
            placeholders(local_ids.len())
        );
        let mut query = sqlx::query_as::<_, ChunkRow>(&query);
        for id in local_ids {
            query = query.bind(id);
        }

        let rows = query
            .fetch_all(&mut *conn)
            .await
            .context("Failed to query chunks by local ids")?;

        Ok(rows)
    }

    #[inline]
    pub async fn count(conn: &mut SqliteConnection) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chunks")
            .fetch_one(&mut *conn)
            .await
            .context("Failed to count chunks")?;

        Ok(count)
    }
}
