// Cross-store consistency validation
// Detects torn documents between the vector index and the metadata store

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

use super::RetrievalEngine;
use crate::Result;

/// Consistency check results between the vector index and the metadata store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Number of vectors in the root index
    pub root_vectors: usize,
    /// Number of root metadata rows
    pub root_documents: usize,
    /// Root vector ids referenced by a metadata row but absent from the root index
    pub missing_root_vectors: Vec<i64>,
    /// Root vector ids with no metadata row
    pub orphaned_root_vectors: Vec<i64>,
    /// Sub-indexes whose document has no root row
    pub orphaned_subindexes: Vec<String>,
    /// Chunk tables whose document has no root row
    pub orphaned_chunk_tables: Vec<String>,
    /// Indexed documents whose sub-index and chunk table disagree
    pub inconsistent_documents: Vec<DocumentConsistencyIssue>,
    pub is_consistent: bool,
}

/// Consistency issue for a single indexed document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentConsistencyIssue {
    pub document_id: String,
    /// Vectors in the sub-index, `None` when it is missing
    pub chunk_vectors: Option<usize>,
    /// Rows in the chunk table, `None` when it is missing
    pub chunk_rows: Option<usize>,
}

/// What [`ConsistencyValidator::repair`] removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairStats {
    pub removed_root_vectors: usize,
    pub removed_subindexes: usize,
    pub removed_chunk_tables: usize,
}

impl RepairStats {
    #[inline]
    pub fn total(&self) -> usize {
        self.removed_root_vectors + self.removed_subindexes + self.removed_chunk_tables
    }
}

pub struct ConsistencyValidator<'a> {
    engine: &'a RetrievalEngine,
}

impl<'a> ConsistencyValidator<'a> {
    #[inline]
    pub fn new(engine: &'a RetrievalEngine) -> Self {
        Self { engine }
    }

    /// Compare both stores while adds and deletes are held off
    pub async fn validate_consistency(&self) -> Result<ConsistencyReport> {
        let _root_guard = self.engine.root_lock.lock().await;
        self.inspect().await
    }

    /// Remove everything that belongs to no indexed document: orphaned root vectors,
    /// sub-indexes and chunk tables. Documents with a root row but missing or
    /// mismatched chunks are reported, not touched; deleting them is the caller's call.
    ///
    /// Returns the report taken before the repair together with what was removed.
    pub async fn repair(&self) -> Result<(ConsistencyReport, RepairStats)> {
        let _root_guard = self.engine.root_lock.lock().await;
        let report = self.inspect().await?;
        let mut stats = RepairStats::default();

        if !report.orphaned_root_vectors.is_empty() {
            self.engine
                .vectors
                .remove_from_root(&report.orphaned_root_vectors)
                .await?;
            stats.removed_root_vectors = report.orphaned_root_vectors.len();
            info!(
                "Removed {} orphaned root vectors",
                stats.removed_root_vectors
            );
        }

        for document_id in &report.orphaned_subindexes {
            let _document_guard = self.engine.document_locks.write(document_id).await;
            match self.engine.vectors.delete_subindex(document_id).await {
                Ok(true) => {
                    stats.removed_subindexes += 1;
                    debug!("Removed orphaned sub-index {}", document_id);
                }
                Ok(false) => {}
                Err(e) => error!("Failed to remove orphaned sub-index {}: {}", document_id, e),
            }
        }

        for document_id in &report.orphaned_chunk_tables {
            let _document_guard = self.engine.document_locks.write(document_id).await;
            match self.engine.metadata.remove_chunks(document_id).await {
                Ok(true) => {
                    stats.removed_chunk_tables += 1;
                    debug!("Removed orphaned chunk table {}", document_id);
                }
                Ok(false) => {}
                Err(e) => error!(
                    "Failed to remove orphaned chunk table {}: {}",
                    document_id, e
                ),
            }
        }

        let unrepaired = report.missing_root_vectors.len() + report.inconsistent_documents.len();
        if unrepaired > 0 {
            warn!(
                "{} torn documents need to be deleted and added again",
                unrepaired
            );
        }

        info!("Consistency repair removed {} items", stats.total());
        Ok((report, stats))
    }

    /// Caller must hold the root lock
    async fn inspect(&self) -> Result<ConsistencyReport> {
        info!("Starting cross-store consistency validation");
        let vectors = &self.engine.vectors;
        let metadata = &self.engine.metadata;

        let documents = metadata.list_documents().await?;
        let stored_vectors: BTreeSet<i64> = vectors.list_root_ids().await?.into_iter().collect();
        let referenced_vectors: BTreeSet<i64> =
            documents.iter().map(|doc| doc.root_vector_id).collect();
        debug!(
            "Found {} root vectors and {} root rows",
            stored_vectors.len(),
            documents.len()
        );

        let missing_root_vectors: Vec<i64> = referenced_vectors
            .difference(&stored_vectors)
            .copied()
            .collect();
        let orphaned_root_vectors: Vec<i64> = stored_vectors
            .difference(&referenced_vectors)
            .copied()
            .collect();

        let indexed: BTreeSet<&str> = documents.iter().map(|doc| doc.document_id.as_str()).collect();
        let subindexes: BTreeSet<String> = vectors.list_subindexes().await?.into_iter().collect();
        let chunk_tables: BTreeSet<String> = metadata.list_chunk_documents()?.into_iter().collect();

        let orphaned_subindexes: Vec<String> = subindexes
            .iter()
            .filter(|key| !indexed.contains(key.as_str()))
            .cloned()
            .collect();
        let orphaned_chunk_tables: Vec<String> = chunk_tables
            .iter()
            .filter(|key| !indexed.contains(key.as_str()))
            .cloned()
            .collect();

        let mut inconsistent_documents = Vec::new();
        for document_id in &indexed {
            let _document_guard = self.engine.document_locks.read(document_id).await;

            let chunk_vectors = if subindexes.contains(*document_id) {
                Some(vectors.count(document_id).await?)
            } else {
                None
            };
            let chunk_rows = metadata
                .count_chunks(document_id)
                .await?
                .map(|count| usize::try_from(count).unwrap_or_default());

            let consistent = matches!((chunk_vectors, chunk_rows), (Some(v), Some(r)) if v == r);
            if !consistent {
                inconsistent_documents.push(DocumentConsistencyIssue {
                    document_id: (*document_id).to_string(),
                    chunk_vectors,
                    chunk_rows,
                });
            }
        }

        let is_consistent = missing_root_vectors.is_empty()
            && orphaned_root_vectors.is_empty()
            && orphaned_subindexes.is_empty()
            && orphaned_chunk_tables.is_empty()
            && inconsistent_documents.is_empty();

        let report = ConsistencyReport {
            root_vectors: stored_vectors.len(),
            root_documents: documents.len(),
            missing_root_vectors,
            orphaned_root_vectors,
            orphaned_subindexes,
            orphaned_chunk_tables,
            inconsistent_documents,
            is_consistent,
        };

        if report.is_consistent {
            info!("Consistency validation passed");
        } else {
            warn!("Consistency validation found issues");
            log_consistency_issues(&report);
        }

        Ok(report)
    }
}

fn log_consistency_issues(report: &ConsistencyReport) {
    if !report.missing_root_vectors.is_empty() {
        warn!(
            "{} root rows point at missing root vectors",
            report.missing_root_vectors.len()
        );
    }

    if !report.orphaned_root_vectors.is_empty() {
        warn!(
            "{} orphaned root vectors",
            report.orphaned_root_vectors.len()
        );
    }

    for document_id in &report.orphaned_subindexes {
        warn!("Sub-index {} has no root entry", document_id);
    }

    for document_id in &report.orphaned_chunk_tables {
        warn!("Chunk table {} has no root entry", document_id);
    }

    for issue in &report.inconsistent_documents {
        warn!(
            "Document {} has {} chunk vectors and {} chunk rows",
            issue.document_id,
            describe_count(issue.chunk_vectors),
            describe_count(issue.chunk_rows)
        );
    }
}

fn describe_count(count: Option<usize>) -> String {
    count.map_or_else(|| "no".to_string(), |n| n.to_string())
}

impl ConsistencyReport {
    /// Get a human-readable summary of the consistency report
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Stores are consistent: {} documents, {} root vectors",
                self.root_documents, self.root_vectors
            )
        } else {
            format!(
                "Store inconsistencies found: {} missing root vectors, {} orphaned root vectors, {} orphaned sub-indexes, {} orphaned chunk tables, {} documents with issues",
                self.missing_root_vectors.len(),
                self.orphaned_root_vectors.len(),
                self.orphaned_subindexes.len(),
                self.orphaned_chunk_tables.len(),
                self.inconsistent_documents.len()
            )
        }
    }

    #[inline]
    pub fn total_issues(&self) -> usize {
        self.missing_root_vectors.len()
            + self.orphaned_root_vectors.len()
            + self.orphaned_subindexes.len()
            + self.orphaned_chunk_tables.len()
            + self.inconsistent_documents.len()
    }

    /// Issues that [`ConsistencyValidator::repair`] can fix by removal
    #[inline]
    pub fn repairable_issues(&self) -> usize {
        self.orphaned_root_vectors.len()
            + self.orphaned_subindexes.len()
            + self.orphaned_chunk_tables.len()
    }
}
