use super::*;
use crate::config::Config;
use crate::database::sqlite::models::NewRootEntry;
use crate::models::{AddDocumentChunk, AddDocumentRequest};
use tempfile::TempDir;

async fn create_test_engine() -> (RetrievalEngine, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::with_base_dir(temp_dir.path());
    config.storage.embedding_length = 4;
    std::fs::create_dir_all(config.data_root()).expect("should create data root");

    let engine = RetrievalEngine::open(config)
        .await
        .expect("should open engine");
    (engine, temp_dir)
}

fn axis(i: usize) -> Vec<f32> {
    let mut vector = vec![0.0; 4];
    vector[i] = 1.0;
    vector
}

async fn add(engine: &RetrievalEngine, document_id: &str, chunks: usize) {
    let request = AddDocumentRequest {
        document_id: document_id.to_string(),
        content_hash: format!("hash-{document_id}"),
        filename: format!("{document_id}.pdf"),
        summary: format!("Summary of {document_id}"),
        summary_embedding: axis(0),
        chunks: (0..chunks)
            .map(|i| AddDocumentChunk {
                page_number: i as i64,
                text: format!("chunk {i}"),
                embedding: axis(i % 4),
            })
            .collect(),
    };
    engine
        .add_document(&request)
        .await
        .expect("should add document");
}

#[test]
fn consistency_report_creation() {
    let report = ConsistencyReport {
        root_vectors: 10,
        root_documents: 9,
        missing_root_vectors: vec![],
        orphaned_root_vectors: vec![4],
        orphaned_subindexes: vec!["stray".to_string()],
        orphaned_chunk_tables: vec![],
        inconsistent_documents: vec![DocumentConsistencyIssue {
            document_id: "doc-a".to_string(),
            chunk_vectors: Some(3),
            chunk_rows: None,
        }],
        is_consistent: false,
    };

    assert_eq!(report.total_issues(), 3);
    assert_eq!(report.repairable_issues(), 2);
    assert!(report.summary().contains("inconsistencies found"));
}

#[test]
fn consistent_report() {
    let report = ConsistencyReport {
        root_vectors: 2,
        root_documents: 2,
        missing_root_vectors: vec![],
        orphaned_root_vectors: vec![],
        orphaned_subindexes: vec![],
        orphaned_chunk_tables: vec![],
        inconsistent_documents: vec![],
        is_consistent: true,
    };

    assert_eq!(report.total_issues(), 0);
    assert!(report.summary().contains("Stores are consistent"));
}

#[tokio::test]
async fn healthy_engine_is_consistent() {
    let (engine, _temp_dir) = create_test_engine().await;

    add(&engine, "doc-a", 3).await;
    add(&engine, "doc-b", 0).await;

    let report = engine
        .validator()
        .validate_consistency()
        .await
        .expect("should validate");

    assert!(report.is_consistent, "{}", report.summary());
    assert_eq!(report.root_vectors, 2);
    assert_eq!(report.root_documents, 2);
}

#[tokio::test]
async fn detects_orphans_and_torn_documents() {
    let (engine, _temp_dir) = create_test_engine().await;
    add(&engine, "doc-a", 2).await;
    add(&engine, "doc-b", 2).await;

    // Root vector with no row
    let orphan_id = engine
        .vector_index()
        .add_to_root(&axis(1))
        .await
        .expect("should add root vector");
    // Row with no root vector
    engine
        .metadata_store()
        .add_root_entry(&NewRootEntry {
            root_vector_id: 100,
            document_id: "doc-c".to_string(),
            content_hash: "hash-doc-c".to_string(),
            filename: "doc-c.pdf".to_string(),
            summary: "torn".to_string(),
        })
        .await
        .expect("should add root row");
    // Sub-index and chunk table belonging to nobody
    engine
        .vector_index()
        .add("stray", &[axis(2)])
        .await
        .expect("should add stray sub-index");
    engine
        .metadata_store()
        .add_chunks("lost", &[0], &[0], &["lost".to_string()])
        .await
        .expect("should add stray chunk table");
    // Chunk table gone under an indexed document
    engine
        .metadata_store()
        .remove_chunks("doc-b")
        .await
        .expect("should remove chunk table");

    let report = engine
        .validator()
        .validate_consistency()
        .await
        .expect("should validate");

    assert!(!report.is_consistent);
    assert_eq!(report.missing_root_vectors, vec![100]);
    assert_eq!(report.orphaned_root_vectors, vec![orphan_id]);
    assert_eq!(report.orphaned_subindexes, vec!["stray".to_string()]);
    assert_eq!(report.orphaned_chunk_tables, vec!["lost".to_string()]);

    let torn: Vec<&str> = report
        .inconsistent_documents
        .iter()
        .map(|issue| issue.document_id.as_str())
        .collect();
    assert_eq!(torn, vec!["doc-b", "doc-c"]);

    let doc_b = &report.inconsistent_documents[0];
    assert_eq!(doc_b.chunk_vectors, Some(2));
    assert_eq!(doc_b.chunk_rows, None);
}

#[tokio::test]
async fn repair_removes_orphans_only() {
    let (engine, _temp_dir) = create_test_engine().await;
    add(&engine, "doc-a", 2).await;

    engine
        .vector_index()
        .add_to_root(&axis(3))
        .await
        .expect("should add root vector");
    engine
        .vector_index()
        .add("stray", &[axis(2)])
        .await
        .expect("should add stray sub-index");
    engine
        .metadata_store()
        .add_chunks("stray", &[0], &[0], &["stray".to_string()])
        .await
        .expect("should add stray chunk table");

    let (before, stats) = engine.validator().repair().await.expect("should repair");
    assert_eq!(before.repairable_issues(), 3);
    assert_eq!(
        stats,
        RepairStats {
            removed_root_vectors: 1,
            removed_subindexes: 1,
            removed_chunk_tables: 1,
        }
    );

    let after = engine
        .validator()
        .validate_consistency()
        .await
        .expect("should validate");
    assert!(after.is_consistent, "{}", after.summary());

    let hits = engine
        .query_document(&["doc-a"], &axis(0), Some(1))
        .await
        .expect("indexed document untouched");
    assert_eq!(hits.len(), 1);
}
