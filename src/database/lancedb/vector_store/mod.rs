#[cfg(test)]
mod tests;

use super::{RootIndexState, normalized};
use crate::config::Config;
use crate::{EngineError, Result, validate_document_id};
use arrow::array::{Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatchIterator};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use itertools::Itertools;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const ROOT_TABLE: &str = "root_index";
const ID_COLUMN: &str = "id";
const VECTOR_COLUMN: &str = "vector";
const DISTANCE_COLUMN: &str = "_distance";

/// Vector side of the engine, backed by LanceDB.
///
/// The root index holds one summary vector per document under a stable integer id.
/// Each sub-index is a separate table, named after its document id, holding chunk
/// vectors under local ids `0..n`. Every vector is L2-normalized before it is stored
/// or used as a query, so L2 distance ranks by cosine similarity.
///
/// Root mutations are serialized internally. Appends to a single sub-index are not;
/// callers must not append to the same key concurrently.
pub struct VectorIndex {
    root: Connection,
    sub: Connection,
    sub_index_path: PathBuf,
    state_path: PathBuf,
    embedding_length: usize,
    root_state: Mutex<RootIndexState>,
}

impl VectorIndex {
    /// Open (or create) the root index and sub-index directory described by `config`
    pub async fn open(config: &Config) -> Result<Self> {
        let data_root = config.data_root();
        let sub_index_path = config.sub_index_path();
        std::fs::create_dir_all(&sub_index_path)?;

        let root = connect(&data_root).await?;
        let sub = connect(&sub_index_path).await?;

        let mut index = Self {
            root,
            sub,
            sub_index_path,
            state_path: config.root_state_path(),
            embedding_length: config.storage.embedding_length,
            root_state: Mutex::new(RootIndexState::default()),
        };

        index.initialize_root_table().await?;
        let state = index.recover_root_state().await?;
        index.root_state = Mutex::new(state);

        info!(
            "Vector index opened at {} (next root id {})",
            data_root.display(),
            state.next_id
        );
        Ok(index)
    }

    #[inline]
    pub fn embedding_length(&self) -> usize {
        self.embedding_length
    }

    async fn initialize_root_table(&self) -> Result<()> {
        let table_names = self
            .root
            .table_names()
            .execute()
            .await
            .map_err(|e| EngineError::Database(format!("Failed to list tables: {}", e)))?;

        if table_names.iter().any(|name| name == ROOT_TABLE) {
            let dimension = self.detect_existing_vector_dimension().await?;
            if dimension != self.embedding_length {
                return Err(EngineError::Config(format!(
                    "Root index stores {}-dimensional vectors but embedding length is configured as {}",
                    dimension, self.embedding_length
                )));
            }
            debug!("Root index already exists with {} dimensions", dimension);
            return Ok(());
        }

        self.root
            .create_empty_table(ROOT_TABLE, self.create_schema())
            .execute()
            .await
            .map_err(|e| EngineError::Database(format!("Failed to create root index: {}", e)))?;

        info!(
            "Root index created with {} dimensions",
            self.embedding_length
        );
        Ok(())
    }

    /// Detect vector dimension from the existing root table schema
    async fn detect_existing_vector_dimension(&self) -> Result<usize> {
        let table = self.root_table().await?;
        let schema = table
            .schema()
            .await
            .map_err(|e| EngineError::Database(format!("Failed to get table schema: {}", e)))?;

        for field in schema.fields() {
            if field.name() == VECTOR_COLUMN {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return Ok(*size as usize);
                }
            }
        }

        Err(EngineError::Database(
            "Could not find vector column or determine dimension".to_string(),
        ))
    }

    /// The persisted counter can lag the table if the process died between a root
    /// append and the state write, so never hand out an id at or below the largest stored.
    async fn recover_root_state(&self) -> Result<RootIndexState> {
        let persisted = match std::fs::read(&self.state_path) {
            Ok(bytes) => serde_json::from_slice::<RootIndexState>(&bytes).map_err(|e| {
                EngineError::Database(format!(
                    "Corrupt root index state {}: {}",
                    self.state_path.display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RootIndexState::default(),
            Err(e) => return Err(e.into()),
        };

        let table = self.root_table().await?;
        let stored_max = list_ids(&table).await?.into_iter().max();
        let next_id = stored_max.map_or(persisted.next_id, |max| persisted.next_id.max(max + 1));

        if next_id != persisted.next_id {
            warn!(
                "Root index state was behind the table ({} < {}), advancing",
                persisted.next_id, next_id
            );
        }

        let state = RootIndexState { next_id };
        self.persist_state(state)?;
        Ok(state)
    }

    fn create_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new(ID_COLUMN, DataType::Int64, false),
            Field::new(
                VECTOR_COLUMN,
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    self.embedding_length as i32,
                ),
                false,
            ),
        ]))
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() == self.embedding_length {
            Ok(())
        } else {
            Err(EngineError::DimensionMismatch {
                expected: self.embedding_length,
                actual: vector.len(),
            })
        }
    }

    /// Build a RecordBatch of normalized vectors under the given ids
    fn create_record_batch(&self, ids: &[i64], vectors: &[Vec<f32>]) -> Result<RecordBatch> {
        let mut flat_values = Vec::with_capacity(vectors.len() * self.embedding_length);
        for vector in vectors {
            flat_values.extend(normalized(vector));
        }

        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            self.embedding_length as i32,
            Arc::new(values_array),
            None,
        )
        .map_err(|e| EngineError::Database(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(Int64Array::from(ids.to_vec())),
            Arc::new(vector_array),
        ];

        RecordBatch::try_new(self.create_schema(), arrays)
            .map_err(|e| EngineError::Database(format!("Failed to create record batch: {}", e)))
    }

    async fn write_vectors(&self, table: &Table, ids: &[i64], vectors: &[Vec<f32>]) -> Result<()> {
        let record_batch = self.create_record_batch(ids, vectors)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| EngineError::Database(format!("Failed to insert vectors: {}", e)))?;

        Ok(())
    }

    /// Append one vector to the root index and return its id.
    ///
    /// Ids are handed out by a persisted counter: they follow insertion order starting
    /// at 0 and are never reused, even after the vector is removed.
    pub async fn add_to_root(&self, vector: &[f32]) -> Result<i64> {
        self.check_dimension(vector)?;

        let mut state = self.root_state.lock().await;
        let id = state.next_id;

        let table = self.root_table().await?;
        self.write_vectors(&table, &[id], &[vector.to_vec()]).await?;

        state.next_id += 1;
        if let Err(e) = self.persist_state(*state) {
            // The vector is committed; reopening recovers the counter from the table.
            warn!("Failed to persist root index state after id {}: {}", id, e);
        }

        debug!("Added root vector {}", id);
        Ok(id)
    }

    /// Remove root vectors by id. Ids that are not present are ignored.
    pub async fn remove_from_root(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let _state = self.root_state.lock().await;
        let table = self.root_table().await?;
        let predicate = format!("{ID_COLUMN} IN ({})", ids.iter().join(", "));
        table
            .delete(&predicate)
            .await
            .map_err(|e| EngineError::Database(format!("Failed to delete root vectors: {}", e)))?;

        debug!("Removed root vectors {:?}", ids);
        Ok(())
    }

    /// Nearest root ids to `vector`, closest first, at most `top_k` of them
    pub async fn query_root(&self, vector: &[f32], top_k: usize) -> Result<Vec<i64>> {
        self.check_dimension(vector)?;
        let table = self.root_table().await?;
        search(&table, vector, top_k).await
    }

    /// Empty the root index in place and restart id allocation at 0
    pub async fn clear_root(&self) -> Result<()> {
        let mut state = self.root_state.lock().await;
        let table = self.root_table().await?;
        table
            .delete("true")
            .await
            .map_err(|e| EngineError::Database(format!("Failed to clear root index: {}", e)))?;

        *state = RootIndexState::default();
        self.persist_state(*state)?;

        info!("Root index cleared");
        Ok(())
    }

    /// Raise the id counter so nothing at or below `id` is handed out again.
    /// Used for ids that are still referenced elsewhere after their vector is gone.
    pub async fn reserve_root_ids_through(&self, id: i64) -> Result<()> {
        let mut state = self.root_state.lock().await;
        if state.next_id <= id {
            warn!(
                "Root index state was behind stored references ({} <= {}), advancing",
                state.next_id, id
            );
            state.next_id = id + 1;
            self.persist_state(*state)?;
        }
        Ok(())
    }

    #[inline]
    pub async fn root_count(&self) -> Result<usize> {
        let table = self.root_table().await?;
        count_rows(&table).await
    }

    /// All ids currently stored in the root index
    #[inline]
    pub async fn list_root_ids(&self) -> Result<Vec<i64>> {
        let table = self.root_table().await?;
        list_ids(&table).await
    }

    /// Create the sub-index for `key` if it does not exist yet
    pub async fn create_subindex(&self, key: &str) -> Result<Table> {
        validate_document_id(key)?;

        match self.sub.open_table(key).execute().await {
            Ok(table) => return Ok(table),
            Err(lancedb::Error::TableNotFound { .. }) => {}
            Err(e) => {
                return Err(EngineError::Database(format!(
                    "Failed to open sub-index {}: {}",
                    key, e
                )));
            }
        }

        match self
            .sub
            .create_empty_table(key, self.create_schema())
            .execute()
            .await
        {
            Ok(table) => {
                debug!("Created sub-index {}", key);
                Ok(table)
            }
            Err(lancedb::Error::TableAlreadyExists { .. }) => self.open_subindex(key).await,
            Err(e) => Err(EngineError::Database(format!(
                "Failed to create sub-index {}: {}",
                key, e
            ))),
        }
    }

    /// Append vectors to the sub-index for `key`, creating it if needed.
    /// Returned ids continue from the sub-index's element count before the append.
    pub async fn add(&self, key: &str, vectors: &[Vec<f32>]) -> Result<Vec<i64>> {
        for vector in vectors {
            self.check_dimension(vector)?;
        }

        let table = self.create_subindex(key).await?;
        if vectors.is_empty() {
            return Ok(Vec::new());
        }

        let base = count_rows(&table).await? as i64;
        let ids: Vec<i64> = (base..base + vectors.len() as i64).collect();
        self.write_vectors(&table, &ids, vectors).await?;

        debug!("Added {} vectors to sub-index {}", ids.len(), key);
        Ok(ids)
    }

    /// Nearest local ids within the sub-index for `key`, closest first
    pub async fn query(&self, key: &str, vector: &[f32], top_k: usize) -> Result<Vec<i64>> {
        self.check_dimension(vector)?;
        let table = self.open_subindex(key).await?;
        search(&table, vector, top_k).await
    }

    #[inline]
    pub async fn count(&self, key: &str) -> Result<usize> {
        let table = self.open_subindex(key).await?;
        count_rows(&table).await
    }

    pub async fn has_subindex(&self, key: &str) -> Result<bool> {
        match self.open_subindex(key).await {
            Ok(_) => Ok(true),
            Err(EngineError::IndexNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn list_subindexes(&self) -> Result<Vec<String>> {
        self.sub
            .table_names()
            .execute()
            .await
            .map_err(|e| EngineError::Database(format!("Failed to list sub-indexes: {}", e)))
    }

    /// Drop the sub-index for `key` and its directory. Returns whether it existed.
    pub async fn delete_subindex(&self, key: &str) -> Result<bool> {
        let existed = self.has_subindex(key).await?;
        if existed {
            self.sub.drop_table(key).await.map_err(|e| {
                EngineError::Database(format!("Failed to drop sub-index {}: {}", key, e))
            })?;
        }

        let leftover = self.sub_index_path.join(format!("{key}.lance"));
        if leftover.exists() {
            std::fs::remove_dir_all(&leftover)?;
        }

        if existed {
            debug!("Deleted sub-index {}", key);
        }
        Ok(existed)
    }

    /// Drop every sub-index, returning how many were removed
    pub async fn clear_subindexes(&self) -> Result<usize> {
        let keys = self.list_subindexes().await?;
        for key in &keys {
            self.sub.drop_table(key).await.map_err(|e| {
                EngineError::Database(format!("Failed to drop sub-index {}: {}", key, e))
            })?;
        }

        info!("Dropped {} sub-indexes", keys.len());
        Ok(keys.len())
    }

    /// Write the root id counter to disk. Vector writes themselves are committed by
    /// LanceDB before each mutating call returns.
    pub async fn flush(&self) -> Result<()> {
        let state = *self.root_state.lock().await;
        self.persist_state(state)
    }

    #[inline]
    pub async fn close(&self) -> Result<()> {
        self.flush().await?;
        debug!("Vector index closed");
        Ok(())
    }

    async fn root_table(&self) -> Result<Table> {
        self.root
            .open_table(ROOT_TABLE)
            .execute()
            .await
            .map_err(|e| EngineError::Database(format!("Failed to open root index: {}", e)))
    }

    async fn open_subindex(&self, key: &str) -> Result<Table> {
        validate_document_id(key)?;
        match self.sub.open_table(key).execute().await {
            Ok(table) => Ok(table),
            Err(lancedb::Error::TableNotFound { .. }) => {
                Err(EngineError::IndexNotFound(key.to_string()))
            }
            Err(e) => Err(EngineError::Database(format!(
                "Failed to open sub-index {}: {}",
                key, e
            ))),
        }
    }

    /// Write-to-temp then rename, so a crash never leaves a truncated state file
    fn persist_state(&self, state: RootIndexState) -> Result<()> {
        let content = serde_json::to_vec(&state).map_err(|e| {
            EngineError::Database(format!("Failed to serialize root index state: {}", e))
        })?;

        let temp_path = self.state_path.with_extension("json.tmp");
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(&content)?;
        file.sync_all()?;
        std::fs::rename(&temp_path, &self.state_path)?;

        Ok(())
    }
}

async fn connect(path: &Path) -> Result<Connection> {
    let uri = format!("file://{}", path.display());
    lancedb::connect(&uri)
        .execute()
        .await
        .map_err(|e| EngineError::Database(format!("Failed to connect to LanceDB: {}", e)))
}

async fn count_rows(table: &Table) -> Result<usize> {
    table
        .count_rows(None)
        .await
        .map_err(|e| EngineError::Database(format!("Failed to count rows: {}", e)))
}

async fn list_ids(table: &Table) -> Result<Vec<i64>> {
    let count = count_rows(table).await?;
    if count == 0 {
        return Ok(Vec::new());
    }

    let mut results = table
        .query()
        .select(Select::columns(&[ID_COLUMN]))
        .limit(count)
        .execute()
        .await
        .map_err(|e| EngineError::Database(format!("Failed to scan ids: {}", e)))?;

    let mut ids = Vec::with_capacity(count);
    while let Some(batch) = results
        .try_next()
        .await
        .map_err(|e| EngineError::Database(format!("Failed to read id stream: {}", e)))?
    {
        ids.extend(id_column(&batch)?.iter().flatten());
    }

    ids.sort_unstable();
    Ok(ids)
}

/// L2 search over normalized vectors, returning ids ordered by ascending distance
async fn search(table: &Table, vector: &[f32], top_k: usize) -> Result<Vec<i64>> {
    let limit = top_k.min(count_rows(table).await?);
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut results = table
        .vector_search(normalized(vector))
        .map_err(|e| EngineError::Database(format!("Failed to create vector search: {}", e)))?
        .column(VECTOR_COLUMN)
        .distance_type(DistanceType::L2)
        .limit(limit)
        .execute()
        .await
        .map_err(|e| EngineError::Database(format!("Failed to execute search: {}", e)))?;

    let mut hits: Vec<(i64, f32)> = Vec::with_capacity(limit);
    while let Some(batch) = results
        .try_next()
        .await
        .map_err(|e| EngineError::Database(format!("Failed to read result stream: {}", e)))?
    {
        let ids = id_column(&batch)?;
        let distances = batch
            .column_by_name(DISTANCE_COLUMN)
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        for row in 0..batch.num_rows() {
            if ids.is_null(row) {
                continue;
            }
            let distance = distances.map_or(0.0, |d| d.value(row));
            hits.push((ids.value(row), distance));
        }
    }

    hits.sort_by(|a, b| a.1.total_cmp(&b.1));
    Ok(hits.into_iter().map(|(id, _)| id).collect())
}

fn id_column(batch: &RecordBatch) -> Result<&Int64Array> {
    batch
        .column_by_name(ID_COLUMN)
        .ok_or_else(|| EngineError::Database("Missing id column".to_string()))?
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| EngineError::Database("Invalid id column type".to_string()))
}
