
pub mod consistency;
pub mod locks;

pub use consistency::{
    ConsistencyReport, ConsistencyValidator, DocumentConsistencyIssue, RepairStats,
};
pub use locks::{DocumentGuard, DocumentLocks};

use futures::{StreamExt, stream};
use std::collections::BTreeSet;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::database::sqlite::models::NewRootEntry;
use crate::database::{MetadataStore, VectorIndex};
use crate::models::{
    AddDocumentRequest, ChunkHit, DocumentHit, DocumentInfo, DocumentInfoResponse,
};
use crate::{EngineError, Result, Stage, validate_document_id};

/// Single entry point over the vector index and the metadata store.
///
/// The root index and root metadata are guarded together by one mutex, held across
/// every operation that writes both. Each document's sub-index and chunk table are
/// guarded by that document's reader/writer lock, always taken after the root lock.
/// Queries take only document read locks and tolerate ids deleted underneath them.
pub struct RetrievalEngine {
    config: Config,
    vectors: VectorIndex,
    metadata: MetadataStore,
    root_lock: Mutex<()>,
    document_locks: DocumentLocks,
}

impl RetrievalEngine {
    /// Open both stores under the configured data root, which must already exist
    pub async fn open(config: Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let data_root = config.data_root();
        if !data_root.is_dir() {
            return Err(EngineError::Config(format!(
                "Data root {} does not exist",
                data_root.display()
            )));
        }

        let vectors = VectorIndex::open(&config).await?;
        let metadata = MetadataStore::open(&config).await?;

        // Root rows can outlive their vectors and the state file, so ids already named
        // by a row must never be handed out again.
        if let Some(&highest) = metadata.list_root_vector_ids().await?.last() {
            vectors.reserve_root_ids_through(highest).await?;
        }

        info!(
            "Retrieval engine ready at {} ({} dimensions)",
            data_root.display(),
            config.storage.embedding_length
        );

        Ok(Self {
            config,
            vectors,
            metadata,
            root_lock: Mutex::new(()),
            document_locks: DocumentLocks::default(),
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn vector_index(&self) -> &VectorIndex {
        &self.vectors
    }

    #[inline]
    pub fn metadata_store(&self) -> &MetadataStore {
        &self.metadata
    }

    #[inline]
    pub fn embedding_length(&self) -> usize {
        self.vectors.embedding_length()
    }

    #[inline]
    pub fn validator(&self) -> ConsistencyValidator<'_> {
        ConsistencyValidator::new(self)
    }

    #[inline]
    pub async fn has_document(&self, content_hash: &str) -> Result<bool> {
        self.metadata.has_document(content_hash).await
    }

    #[inline]
    pub async fn has_document_id(&self, document_id: &str) -> Result<bool> {
        self.metadata.has_document_id(document_id).await
    }

    /// Index a document: its summary vector in the root index, its chunks in a
    /// sub-index of their own, and the text for both in the metadata store.
    ///
    /// Duplicates (by content hash or document id) and malformed input are rejected,
    /// and any partition left by an earlier torn add is swept, before anything is
    /// written. A failure after the root entry is committed is
    /// reported as [`EngineError::PartialFailure`].
    pub async fn add_document(&self, request: &AddDocumentRequest) -> Result<()> {
        let document_id = request.document_id.as_str();
        validate_document_id(document_id)?;
        self.check_dimension(&request.summary_embedding)?;
        for chunk in &request.chunks {
            self.check_dimension(&chunk.embedding)?;
        }

        let root_guard = self.root_lock.lock().await;

        if self.metadata.has_document(&request.content_hash).await? {
            debug!(
                "Rejecting {}: content hash {} already indexed",
                document_id, request.content_hash
            );
            return Err(EngineError::DuplicateDocument(request.content_hash.clone()));
        }
        if self.metadata.has_document_id(document_id).await? {
            debug!("Rejecting {}: document id already indexed", document_id);
            return Err(EngineError::DuplicateDocument(document_id.to_string()));
        }

        // Held past the root lock so queries on this id wait for the chunks
        let _document_guard = self.document_locks.write(document_id).await;
        self.discard_stale_partition(document_id).await?;

        let root_vector_id = self.vectors.add_to_root(&request.summary_embedding).await?;

        let entry = NewRootEntry {
            root_vector_id,
            document_id: document_id.to_string(),
            content_hash: request.content_hash.clone(),
            filename: request.filename.clone(),
            summary: request.summary.clone(),
        };
        if let Err(e) = self.metadata.add_root_entry(&entry).await {
            return Err(self.rollback_root_vector(document_id, root_vector_id, e).await);
        }

        drop(root_guard);

        let embeddings: Vec<Vec<f32>> = request
            .chunks
            .iter()
            .map(|chunk| chunk.embedding.clone())
            .collect();
        let local_ids = self
            .vectors
            .add(document_id, &embeddings)
            .await
            .map_err(|e| partial_failure(document_id, Stage::ChunkIndexInsert, &e))?;

        let page_numbers: Vec<i64> = request.chunks.iter().map(|c| c.page_number).collect();
        let texts: Vec<String> = request.chunks.iter().map(|c| c.text.clone()).collect();
        self.metadata
            .add_chunks(document_id, &local_ids, &page_numbers, &texts)
            .await
            .map_err(|e| partial_failure(document_id, Stage::ChunkMetadataInsert, &e))?;

        info!(
            "Added document {} ({}) with {} chunks under root id {}",
            document_id,
            request.filename,
            local_ids.len(),
            root_vector_id
        );
        Ok(())
    }

    /// Remove a document from both stores and return its filename.
    ///
    /// Each removal is idempotent, so retrying after a [`EngineError::PartialFailure`]
    /// converges. Deleting an unknown id sweeps any leftover sub-index or chunk file
    /// for that id and then reports [`EngineError::NotFound`].
    pub async fn delete_document(&self, document_id: &str) -> Result<String> {
        validate_document_id(document_id)?;

        let _root_guard = self.root_lock.lock().await;
        let _document_guard = self.document_locks.write(document_id).await;

        let document = match self.metadata.get_document(document_id).await {
            Ok(document) => document,
            Err(EngineError::NotFound(id)) => {
                self.discard_stale_partition(document_id).await?;
                return Err(EngineError::NotFound(id));
            }
            Err(e) => return Err(e),
        };

        self.vectors
            .remove_from_root(&[document.root_vector_id])
            .await?;

        match self.metadata.remove_root_entry(document_id).await {
            Ok(_) | Err(EngineError::NotFound(_)) => {}
            Err(e) => return Err(partial_failure(document_id, Stage::RootMetadataRemoval, &e)),
        }

        self.vectors
            .delete_subindex(document_id)
            .await
            .map_err(|e| partial_failure(document_id, Stage::SubIndexRemoval, &e))?;

        self.metadata
            .remove_chunks(document_id)
            .await
            .map_err(|e| partial_failure(document_id, Stage::ChunkMetadataRemoval, &e))?;

        info!("Deleted document {} ({})", document_id, document.filename);
        Ok(document.filename)
    }

    /// Documents whose summaries are nearest to `query_embedding`, closest first.
    /// Defaults to `query.top_k_documents` results.
    pub async fn query_root(
        &self,
        query_embedding: &[f32],
        top_k: Option<usize>,
    ) -> Result<Vec<DocumentHit>> {
        let top_k = top_k.unwrap_or(self.config.query.top_k_documents);
        let root_vector_ids = self.vectors.query_root(query_embedding, top_k).await?;
        let hits = self.metadata.query_root(&root_vector_ids).await?;

        if hits.len() < root_vector_ids.len() {
            debug!(
                "{} root hits had no metadata row and were skipped",
                root_vector_ids.len() - hits.len()
            );
        }
        Ok(hits)
    }

    /// Nearest chunks within each listed document, concatenated in the order the ids
    /// were given. Unknown documents contribute nothing. Defaults to
    /// `query.top_k_chunks` results per document.
    pub async fn query_document<S: AsRef<str>>(
        &self,
        document_ids: &[S],
        query_embedding: &[f32],
        top_k: Option<usize>,
    ) -> Result<Vec<ChunkHit>> {
        self.check_dimension(query_embedding)?;
        let top_k = top_k.unwrap_or(self.config.query.top_k_chunks);

        let mut hits = Vec::new();
        for document_id in document_ids {
            let document_id = document_id.as_ref();
            if validate_document_id(document_id).is_err() {
                debug!("Skipping query for invalid document id {:?}", document_id);
                continue;
            }

            let _document_guard = self.document_locks.read(document_id).await;
            let local_ids = match self.vectors.query(document_id, query_embedding, top_k).await {
                Ok(ids) => ids,
                Err(EngineError::IndexNotFound(_)) => {
                    debug!("No sub-index for {}, skipping", document_id);
                    continue;
                }
                Err(e) => return Err(e),
            };

            hits.extend(self.metadata.query_chunks(document_id, &local_ids).await?);
        }

        Ok(hits)
    }

    /// Wipe every document from both stores and restart root id allocation
    pub async fn clear_all(&self) -> Result<()> {
        let _root_guard = self.root_lock.lock().await;

        let mut document_ids: BTreeSet<String> = self
            .metadata
            .list_documents()
            .await?
            .into_iter()
            .map(|document| document.document_id)
            .collect();
        document_ids.extend(self.vectors.list_subindexes().await?);
        document_ids.extend(self.metadata.list_chunk_documents()?);

        let _document_guards: Vec<DocumentGuard<'_>> = stream::iter(&document_ids)
            .then(|document_id| self.document_locks.write(document_id))
            .collect()
            .await;

        // Rows first: a row left behind would name an id the reset counter reissues
        self.metadata.clear_root().await?;
        self.vectors.clear_root().await?;
        let subindexes = self.vectors.clear_subindexes().await?;
        let chunk_tables = self.metadata.clear_chunks().await?;

        info!(
            "Cleared all documents ({} sub-indexes, {} chunk tables)",
            subindexes, chunk_tables
        );
        Ok(())
    }

    /// Info for one document, or for all documents when `document_id` is `None`
    pub async fn get_document_info(
        &self,
        document_id: Option<&str>,
    ) -> Result<DocumentInfoResponse> {
        let documents = match document_id {
            Some(document_id) => vec![self.metadata.get_document(document_id).await?],
            None => self.metadata.list_documents().await?,
        };
        Ok(DocumentInfoResponse::from(documents))
    }

    #[inline]
    pub async fn get_document(&self, document_id: &str) -> Result<DocumentInfo> {
        self.metadata.get_document(document_id).await
    }

    #[inline]
    pub async fn list_documents(&self) -> Result<Vec<DocumentInfo>> {
        self.metadata.list_documents().await
    }

    #[inline]
    pub async fn document_count(&self) -> Result<i64> {
        self.metadata.document_count().await
    }

    /// Persist the root id counter and close the metadata pool
    pub async fn close(&self) -> Result<()> {
        let _root_guard = self.root_lock.lock().await;
        self.vectors.close().await?;
        self.metadata.close().await;
        info!("Retrieval engine closed");
        Ok(())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        let expected = self.vectors.embedding_length();
        if vector.len() == expected {
            Ok(())
        } else {
            Err(EngineError::DimensionMismatch {
                expected,
                actual: vector.len(),
            })
        }
    }

    /// Undo step 2 of an add after step 3 failed. Returns the error to report.
    async fn rollback_root_vector(
        &self,
        document_id: &str,
        root_vector_id: i64,
        cause: EngineError,
    ) -> EngineError {
        match self.vectors.remove_from_root(&[root_vector_id]).await {
            Ok(()) => {
                warn!(
                    "Root metadata insert for {} failed, removed root vector {}: {}",
                    document_id, root_vector_id, cause
                );
                cause
            }
            Err(rollback) => {
                error!(
                    "Root vector {} for {} is orphaned: insert failed ({}) and removal failed ({})",
                    root_vector_id, document_id, cause, rollback
                );
                EngineError::PartialFailure {
                    document_id: document_id.to_string(),
                    stage: Stage::RootMetadataInsert,
                    reason: format!(
                        "{cause}; removing root vector {root_vector_id} also failed: {rollback}"
                    ),
                }
            }
        }
    }

    /// Remove a sub-index or chunk file left behind for `document_id` by an earlier
    /// torn add. Caller must hold the root lock and the document's write lock.
    async fn discard_stale_partition(&self, document_id: &str) -> Result<()> {
        if self.vectors.delete_subindex(document_id).await? {
            warn!("Removed stale sub-index for {}", document_id);
        }
        if self.metadata.remove_chunks(document_id).await? {
            warn!("Removed stale chunk table for {}", document_id);
        }
        Ok(())
    }
}

fn partial_failure(document_id: &str, stage: Stage, cause: &EngineError) -> EngineError {
    error!("Document {} left partially written at {}: {}", document_id, stage, cause);
    EngineError::PartialFailure {
        document_id: document_id.to_string(),
        stage,
        reason: cause.to_string(),
    }
}
