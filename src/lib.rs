use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Document already exists: {0}")]
    DuplicateDocument(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Chunk arrays differ in length: {ids} ids, {pages} page numbers, {texts} texts")]
    ArityMismatch {
        ids: usize,
        pages: usize,
        texts: usize,
    },

    #[error("No sub-index exists for document: {0}")]
    IndexNotFound(String),

    #[error("Invalid document id: {0:?}")]
    InvalidDocumentId(String),

    #[error("Partial failure on document {document_id} at step '{stage}': {reason}")]
    PartialFailure {
        document_id: String,
        stage: Stage,
        reason: String,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Conditions a caller can act on without treating the store as broken.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DuplicateDocument(_) | Self::NotFound(_) | Self::IndexNotFound(_)
        )
    }
}

/// Step of a multi-step add or delete that failed after earlier steps were committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    RootMetadataInsert,
    ChunkIndexInsert,
    ChunkMetadataInsert,
    RootMetadataRemoval,
    SubIndexRemoval,
    ChunkMetadataRemoval,
}

impl fmt::Display for Stage {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Stage::RootMetadataInsert => write!(f, "root metadata insert"),
            Stage::ChunkIndexInsert => write!(f, "chunk index insert"),
            Stage::ChunkMetadataInsert => write!(f, "chunk metadata insert"),
            Stage::RootMetadataRemoval => write!(f, "root metadata removal"),
            Stage::SubIndexRemoval => write!(f, "sub-index removal"),
            Stage::ChunkMetadataRemoval => write!(f, "chunk metadata removal"),
        }
    }
}

/// Document ids name on-disk files, so they are restricted to a portable character set.
#[inline]
pub fn validate_document_id(document_id: &str) -> Result<()> {
    let valid = !document_id.is_empty()
        && !document_id.starts_with('.')
        && document_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidDocumentId(document_id.to_string()))
    }
}

pub mod commands;
pub mod config;
pub mod database;
pub mod engine;
pub mod models;
