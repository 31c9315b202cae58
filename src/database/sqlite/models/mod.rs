#[cfg(test)]
mod tests;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Root metadata row describing one indexed document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DocumentInfo {
    pub document_id: String,
    pub content_hash: String,
    pub filename: String,
    pub summary: String,
    pub root_vector_id: i64,
    pub added_date: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRootEntry {
    pub root_vector_id: i64,
    pub document_id: String,
    pub content_hash: String,
    pub filename: String,
    pub summary: String,
}

/// Document-level retrieval result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHit {
    pub document_id: String,
    pub summary: String,
}

/// Chunk-level retrieval result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkHit {
    pub page_number: i64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RootHitRow {
    pub root_vector_id: i64,
    pub document_id: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ChunkRow {
    pub local_id: i64,
    pub page_number: i64,
    pub text: String,
}

impl From<RootHitRow> for DocumentHit {
    #[inline]
    fn from(row: RootHitRow) -> Self {
        Self {
            document_id: row.document_id,
            summary: row.summary,
        }
    }
}

impl From<ChunkRow> for ChunkHit {
    #[inline]
    fn from(row: ChunkRow) -> Self {
        Self {
            page_number: row.page_number,
            text: row.text,
        }
    }
}

/// Reorder rows to follow the rank order of `ranked_ids`, dropping ids with no row.
///
/// SQL `IN` lookups return rows in storage order, while callers need nearest-first.
pub fn order_by_rank<R, F>(ranked_ids: &[i64], rows: Vec<R>, key: F) -> Vec<R>
where
    F: Fn(&R) -> i64,
{
    let mut slots: Vec<Option<R>> = ranked_ids.iter().map(|_| None).collect();
    for row in rows {
        let id = key(&row);
        if let Some(position) = ranked_ids.iter().position(|ranked| *ranked == id) {
            slots[position] = Some(row);
        }
    }
    slots.into_iter().flatten().collect()
}
