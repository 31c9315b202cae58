use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::EngineError;
use crate::config::Config;
use crate::engine::RetrievalEngine;
use crate::models::{
    AddDocumentRequest, AddDocumentResponse, DocumentQueryRequest, RootQueryRequest,
};

/// Settings that `init` and `config` may override
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub data_root: Option<PathBuf>,
    pub embedding_length: Option<usize>,
    pub top_k_documents: Option<usize>,
    pub top_k_chunks: Option<usize>,
}

impl ConfigOverrides {
    #[inline]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(data_root) = &self.data_root {
            config.storage.data_root = Some(data_root.clone());
        }
        if let Some(length) = self.embedding_length {
            config.storage.set_embedding_length(length)?;
        }
        if let Some(top_k) = self.top_k_documents {
            config.query.top_k_documents = top_k;
        }
        if let Some(top_k) = self.top_k_chunks {
            config.query.top_k_chunks = top_k;
        }
        config.validate()?;
        Ok(())
    }
}

/// Write the configuration and create the data root, so the engine can open
pub fn init(config_dir: &Path, overrides: &ConfigOverrides) -> Result<()> {
    let mut config = Config::load(config_dir).context("Failed to load configuration")?;
    overrides.apply(&mut config)?;
    config.save()?;

    let data_root = config.data_root();
    std::fs::create_dir_all(config.sub_index_path()).with_context(|| {
        format!("Failed to create data root: {}", data_root.display())
    })?;

    info!("Initialized data root at {}", data_root.display());
    println!("Config file: {}", config.config_file_path().display());
    println!("Data root: {}", data_root.display());
    println!("Embedding length: {}", config.storage.embedding_length);
    Ok(())
}

/// Update stored settings, or print them when nothing is given
pub fn configure(config_dir: &Path, overrides: &ConfigOverrides) -> Result<()> {
    if overrides.is_empty() {
        return show_config(config_dir);
    }

    let mut config = Config::load(config_dir).context("Failed to load configuration")?;
    overrides.apply(&mut config)?;
    config.save()?;

    println!("Configuration saved to {}", config.config_file_path().display());
    Ok(())
}

pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    println!("📋 Current Configuration");
    println!();
    println!("Storage:");
    println!("  Data root: {}", config.data_root().display());
    println!("  Embedding length: {}", config.storage.embedding_length);
    println!("  Max connections: {}", config.storage.max_connections);
    println!();
    println!("Query defaults:");
    println!("  Documents per root query: {}", config.query.top_k_documents);
    println!("  Chunks per document query: {}", config.query.top_k_chunks);
    println!();
    println!("Config file: {}", config.config_file_path().display());

    Ok(())
}

/// List all indexed documents
pub async fn list_documents(config_dir: &Path) -> Result<()> {
    let engine = open_engine(config_dir).await?;
    let documents = engine.list_documents().await;
    engine.close().await?;
    let documents = documents?;

    if documents.is_empty() {
        println!("No documents have been added yet.");
        println!("Use 'ragstore add <request.json>' to add one.");
        return Ok(());
    }

    println!("Documents ({} total):", documents.len());
    println!();
    for document in &documents {
        println!("📄 {} ({})", document.filename, document.document_id);
        println!("   Root id: {}", document.root_vector_id);
        println!("   Hash: {}", document.content_hash);
        println!(
            "   Added: {}",
            document.added_date.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

/// Print one document's info as JSON, or every document's when no id is given
pub async fn show_info(config_dir: &Path, document_id: Option<&str>) -> Result<()> {
    let engine = open_engine(config_dir).await?;
    let info = engine.get_document_info(document_id).await;
    engine.close().await?;

    print_json(&info?)
}

/// Add a document described by a JSON request file (`-` reads stdin).
/// An empty `document_id` is replaced by a fresh UUID.
pub async fn add_document(config_dir: &Path, request_path: &Path) -> Result<()> {
    let mut request: AddDocumentRequest = read_request(request_path)?;
    if request.document_id.is_empty() {
        request.document_id = uuid::Uuid::new_v4().to_string();
    }

    let engine = open_engine(config_dir).await?;
    let result = engine.add_document(&request).await;
    engine.close().await?;

    if let Err(e) = &result {
        warn!("Adding {} failed: {}", request.document_id, e);
    }

    let response = AddDocumentResponse::from(&result);
    print_json(&response)?;
    if response.success {
        println!("Document id: {}", request.document_id);
    }
    Ok(())
}

pub async fn delete_document(config_dir: &Path, document_id: &str) -> Result<()> {
    let engine = open_engine(config_dir).await?;
    let result = engine.delete_document(document_id).await;
    engine.close().await?;

    match result {
        Ok(filename) => {
            println!("Deleted {} ({})", filename, document_id);
            Ok(())
        }
        Err(EngineError::NotFound(_)) => {
            println!("Document not found: {}", document_id);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn clear_all(config_dir: &Path) -> Result<()> {
    let engine = open_engine(config_dir).await?;
    let count = engine.document_count().await?;
    let result = engine.clear_all().await;
    engine.close().await?;
    result?;

    println!("Removed {} documents", count);
    Ok(())
}

pub async fn query_root(config_dir: &Path, request_path: &Path) -> Result<()> {
    let request: RootQueryRequest = read_request(request_path)?;

    let engine = open_engine(config_dir).await?;
    let hits = engine
        .query_root(&request.query_embedding, request.top_k)
        .await;
    engine.close().await?;

    print_json(&hits?)
}

pub async fn query_document(config_dir: &Path, request_path: &Path) -> Result<()> {
    let request: DocumentQueryRequest = read_request(request_path)?;

    let engine = open_engine(config_dir).await?;
    let hits = engine
        .query_document(
            &request.document_ids,
            &request.query_embedding,
            request.top_k,
        )
        .await;
    engine.close().await?;

    print_json(&hits?)
}

/// Compare both stores, optionally removing orphaned entries
pub async fn check_consistency(config_dir: &Path, repair: bool) -> Result<()> {
    let engine = open_engine(config_dir).await?;
    let validator = engine.validator();

    let outcome = if repair {
        validator.repair().await.map(|(report, stats)| (report, Some(stats)))
    } else {
        validator.validate_consistency().await.map(|report| (report, None))
    };
    engine.close().await?;
    let (report, stats) = outcome?;

    println!("{}", report.summary());
    for document_id in &report.orphaned_subindexes {
        println!("  Orphaned sub-index: {}", document_id);
    }
    for document_id in &report.orphaned_chunk_tables {
        println!("  Orphaned chunk table: {}", document_id);
    }
    for issue in &report.inconsistent_documents {
        println!(
            "  Torn document: {} (vectors: {:?}, rows: {:?})",
            issue.document_id, issue.chunk_vectors, issue.chunk_rows
        );
    }

    if let Some(stats) = stats {
        println!(
            "Repair removed {} root vectors, {} sub-indexes, {} chunk tables",
            stats.removed_root_vectors, stats.removed_subindexes, stats.removed_chunk_tables
        );
    } else if report.repairable_issues() > 0 {
        println!("Run 'ragstore check --repair' to remove orphaned entries.");
    }

    Ok(())
}

async fn open_engine(config_dir: &Path) -> Result<RetrievalEngine> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;
    RetrievalEngine::open(config)
        .await
        .context("Failed to open retrieval engine (run 'ragstore init' first)")
}

fn read_request<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read request from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file: {}", path.display()))?
    };

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse request: {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let output = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{output}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn overrides_apply_and_validate() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let mut config = Config::with_base_dir(temp_dir.path());

        let overrides = ConfigOverrides {
            embedding_length: Some(384),
            top_k_chunks: Some(8),
            ..ConfigOverrides::default()
        };
        overrides.apply(&mut config).expect("should apply overrides");

        assert_eq!(config.storage.embedding_length, 384);
        assert_eq!(config.query.top_k_chunks, 8);
        assert_eq!(config.query.top_k_documents, 3);

        let invalid = ConfigOverrides {
            top_k_documents: Some(0),
            ..ConfigOverrides::default()
        };
        assert!(invalid.apply(&mut config).is_err());
    }

    #[test]
    fn empty_overrides() {
        assert!(ConfigOverrides::default().is_empty());
        assert!(
            !ConfigOverrides {
                embedding_length: Some(4),
                ..ConfigOverrides::default()
            }
            .is_empty()
        );
    }

    #[test]
    fn init_creates_data_root() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let overrides = ConfigOverrides {
            embedding_length: Some(4),
            ..ConfigOverrides::default()
        };

        init(temp_dir.path(), &overrides).expect("should init");

        let config = Config::load(temp_dir.path()).expect("should load");
        assert_eq!(config.storage.embedding_length, 4);
        assert!(config.sub_index_path().is_dir());
        assert!(config.config_file_path().is_file());
    }

    #[tokio::test]
    async fn add_and_query_through_request_files() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let config_dir = temp_dir.path().join("config");
        let overrides = ConfigOverrides {
            embedding_length: Some(4),
            ..ConfigOverrides::default()
        };
        init(&config_dir, &overrides).expect("should init");

        let request_path = temp_dir.path().join("add.json");
        std::fs::write(
            &request_path,
            r#"{
                "document_id": "",
                "content_hash": "abc",
                "filename": "a.pdf",
                "summary": "About A",
                "summary_embedding": [1.0, 0.0, 0.0, 0.0],
                "chunks": [{"page_number": 0, "text": "hello", "embedding": [1.0, 0.0, 0.0, 0.0]}]
            }"#,
        )
        .expect("should write request");

        add_document(&config_dir, &request_path)
            .await
            .expect("should add document");

        let config = Config::load(&config_dir).expect("should load");
        let engine = RetrievalEngine::open(config).await.expect("should open");
        let documents = engine.list_documents().await.expect("should list");
        assert_eq!(documents.len(), 1);
        assert!(uuid::Uuid::parse_str(&documents[0].document_id).is_ok());
        engine.close().await.expect("should close");
    }

    #[tokio::test]
    async fn open_engine_without_init_fails() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        assert!(open_engine(temp_dir.path()).await.is_err());
    }

    #[test]
    fn read_request_reports_bad_json() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let path = temp_dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").expect("should write");

        let result: Result<RootQueryRequest> = read_request(&path);
        assert!(result.is_err());
    }
}
