// Request and response shapes exchanged with the orchestration layer

use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

pub use crate::database::sqlite::models::{ChunkHit, DocumentHit, DocumentInfo};

/// One chunk of a document to be indexed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddDocumentChunk {
    pub page_number: i64,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddDocumentRequest {
    pub document_id: String,
    pub content_hash: String,
    pub filename: String,
    pub summary: String,
    pub summary_embedding: Vec<f32>,
    #[serde(default)]
    pub chunks: Vec<AddDocumentChunk>,
}

/// Outcome of an add, flattened for callers that only need success plus a reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddDocumentResponse {
    pub success: bool,
    pub duplicate: bool,
    pub reason: Option<String>,
}

impl From<&Result<()>> for AddDocumentResponse {
    #[inline]
    fn from(result: &Result<()>) -> Self {
        match result {
            Ok(()) => Self {
                success: true,
                duplicate: false,
                reason: None,
            },
            Err(e) => Self {
                success: false,
                duplicate: matches!(e, EngineError::DuplicateDocument(_)),
                reason: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootQueryRequest {
    pub query_embedding: Vec<f32>,
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentQueryRequest {
    pub document_ids: Vec<String>,
    pub query_embedding: Vec<f32>,
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfoResponse {
    pub document_count: usize,
    pub documents_info: Vec<DocumentInfo>,
}

impl From<Vec<DocumentInfo>> for DocumentInfoResponse {
    #[inline]
    fn from(documents_info: Vec<DocumentInfo>) -> Self {
        Self {
            document_count: documents_info.len(),
            documents_info,
        }
    }
}
