use super::*;
use tempfile::TempDir;

fn create_test_config() -> (Config, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::with_base_dir(temp_dir.path());
    config.storage.embedding_length = 4;
    std::fs::create_dir_all(config.data_root()).expect("should create data root");
    (config, temp_dir)
}

async fn create_test_index() -> (VectorIndex, Config, TempDir) {
    let (config, temp_dir) = create_test_config();
    let index = VectorIndex::open(&config)
        .await
        .expect("should open vector index");
    (index, config, temp_dir)
}

fn axis(i: usize) -> Vec<f32> {
    let mut vector = vec![0.0; 4];
    vector[i] = 1.0;
    vector
}

#[tokio::test]
async fn vector_index_initialization() {
    let (index, config, _temp_dir) = create_test_index().await;

    assert_eq!(index.embedding_length(), 4);
    assert_eq!(index.root_count().await.expect("count"), 0);
    assert!(config.sub_index_path().is_dir());
    assert!(config.root_state_path().is_file());
}

#[tokio::test]
async fn add_to_root_assigns_sequential_ids() {
    let (index, _config, _temp_dir) = create_test_index().await;

    for expected in 0..3 {
        let id = index
            .add_to_root(&axis(expected as usize))
            .await
            .expect("should add root vector");
        assert_eq!(id, expected);
    }

    assert_eq!(index.root_count().await.expect("count"), 3);
    assert_eq!(
        index.list_root_ids().await.expect("ids"),
        vec![0, 1, 2]
    );
}

#[tokio::test]
async fn add_to_root_rejects_wrong_dimension() {
    let (index, _config, _temp_dir) = create_test_index().await;

    let result = index.add_to_root(&[1.0, 0.0, 0.0]).await;
    assert!(matches!(
        result,
        Err(EngineError::DimensionMismatch {
            expected: 4,
            actual: 3
        })
    ));
    assert_eq!(index.root_count().await.expect("count"), 0);
}

#[tokio::test]
async fn query_root_orders_by_similarity() {
    let (index, _config, _temp_dir) = create_test_index().await;

    index.add_to_root(&[1.0, 0.0, 0.0, 0.0]).await.expect("add");
    index.add_to_root(&[0.0, 1.0, 0.0, 0.0]).await.expect("add");
    index.add_to_root(&[0.9, 0.1, 0.0, 0.0]).await.expect("add");

    let ids = index
        .query_root(&[1.0, 0.0, 0.0, 0.0], 3)
        .await
        .expect("should query root");
    assert_eq!(ids, vec![0, 2, 1]);
}

#[tokio::test]
async fn query_root_uses_cosine_not_magnitude() {
    let (index, _config, _temp_dir) = create_test_index().await;

    // Same direction as the query but far away in raw L2 terms
    index.add_to_root(&[50.0, 0.0, 0.0, 0.0]).await.expect("add");
    // Close in raw L2 terms but pointing elsewhere
    index.add_to_root(&[0.5, 0.5, 0.0, 0.0]).await.expect("add");

    let ids = index
        .query_root(&[1.0, 0.0, 0.0, 0.0], 1)
        .await
        .expect("should query root");
    assert_eq!(ids, vec![0]);
}

#[tokio::test]
async fn query_root_limits_and_handles_empty() {
    let (index, _config, _temp_dir) = create_test_index().await;

    let empty = index
        .query_root(&axis(0), 5)
        .await
        .expect("empty root query should succeed");
    assert!(empty.is_empty());

    index.add_to_root(&axis(0)).await.expect("add");
    index.add_to_root(&axis(1)).await.expect("add");

    let fewer = index.query_root(&axis(0), 10).await.expect("query");
    assert_eq!(fewer.len(), 2);

    let one = index.query_root(&axis(1), 1).await.expect("query");
    assert_eq!(one, vec![1]);
}

#[tokio::test]
async fn remove_from_root_ignores_unknown_ids() {
    let (index, _config, _temp_dir) = create_test_index().await;

    index.add_to_root(&axis(0)).await.expect("add");
    index.add_to_root(&axis(1)).await.expect("add");

    index
        .remove_from_root(&[0, 99])
        .await
        .expect("unknown ids are a no-op");
    assert_eq!(index.list_root_ids().await.expect("ids"), vec![1]);

    index
        .remove_from_root(&[0])
        .await
        .expect("removing twice is a no-op");
    index.remove_from_root(&[]).await.expect("empty removal");
    assert_eq!(index.root_count().await.expect("count"), 1);
}

#[tokio::test]
async fn root_ids_not_reused_after_removal() {
    let (index, _config, _temp_dir) = create_test_index().await;

    index.add_to_root(&axis(0)).await.expect("add");
    let second = index.add_to_root(&axis(1)).await.expect("add");
    index.remove_from_root(&[second]).await.expect("remove");

    let third = index.add_to_root(&axis(2)).await.expect("add");
    assert_eq!(third, 2);
}

#[tokio::test]
async fn root_counter_survives_reopen() {
    let (config, _temp_dir) = create_test_config();

    {
        let index = VectorIndex::open(&config).await.expect("open");
        index.add_to_root(&axis(0)).await.expect("add");
        index.add_to_root(&axis(1)).await.expect("add");
        index.remove_from_root(&[1]).await.expect("remove");
        index.close().await.expect("close");
    }

    let reopened = VectorIndex::open(&config).await.expect("reopen");
    let id = reopened.add_to_root(&axis(2)).await.expect("add");
    assert_eq!(id, 2);
}

#[tokio::test]
async fn stale_counter_is_advanced_past_stored_ids() {
    let (config, _temp_dir) = create_test_config();

    {
        let index = VectorIndex::open(&config).await.expect("open");
        index.add_to_root(&axis(0)).await.expect("add");
        index.add_to_root(&axis(1)).await.expect("add");
    }

    std::fs::write(config.root_state_path(), r#"{"next_id":0}"#).expect("rewind state");

    let reopened = VectorIndex::open(&config).await.expect("reopen");
    let id = reopened.add_to_root(&axis(3)).await.expect("add");
    assert_eq!(id, 2);
}

#[tokio::test]
async fn reserved_root_ids_are_skipped_and_persisted() {
    let (config, _temp_dir) = create_test_config();

    {
        let index = VectorIndex::open(&config).await.expect("open");
        index.reserve_root_ids_through(4).await.expect("reserve");
        index.reserve_root_ids_through(1).await.expect("lower reserve is a no-op");
        assert_eq!(index.add_to_root(&axis(0)).await.expect("add"), 5);
    }

    std::fs::remove_file(config.root_state_path()).expect("lose state");
    let reopened = VectorIndex::open(&config).await.expect("reopen");
    reopened.reserve_root_ids_through(7).await.expect("reserve");
    assert_eq!(reopened.add_to_root(&axis(1)).await.expect("add"), 8);
}

#[tokio::test]
async fn reopen_with_different_dimension_fails() {
    let (mut config, _temp_dir) = create_test_config();

    VectorIndex::open(&config).await.expect("open");

    config.storage.embedding_length = 8;
    let result = VectorIndex::open(&config).await;
    assert!(matches!(result, Err(EngineError::Config(_))));
}

#[tokio::test]
async fn clear_root_resets_in_place() {
    let (index, _config, _temp_dir) = create_test_index().await;

    index.add_to_root(&axis(0)).await.expect("add");
    index.add_to_root(&axis(1)).await.expect("add");

    index.clear_root().await.expect("should clear root");
    assert_eq!(index.root_count().await.expect("count"), 0);
    assert!(index.query_root(&axis(0), 3).await.expect("query").is_empty());

    let id = index.add_to_root(&axis(2)).await.expect("add after clear");
    assert_eq!(id, 0);
}

#[tokio::test]
async fn subindex_ids_continue_from_count() {
    let (index, _config, _temp_dir) = create_test_index().await;

    let first = index
        .add("doc-a", &[axis(0), axis(1)])
        .await
        .expect("should add to sub-index");
    assert_eq!(first, vec![0, 1]);

    let second = index
        .add("doc-a", &[axis(2)])
        .await
        .expect("should append to sub-index");
    assert_eq!(second, vec![2]);

    let other = index
        .add("doc-b", &[axis(3)])
        .await
        .expect("sub-indexes are independent");
    assert_eq!(other, vec![0]);

    assert_eq!(index.count("doc-a").await.expect("count"), 3);
}

#[tokio::test]
async fn subindex_query() {
    let (index, _config, _temp_dir) = create_test_index().await;

    index
        .add("doc-a", &[axis(0), axis(1), vec![0.7, 0.7, 0.0, 0.0]])
        .await
        .expect("add");

    let ids = index
        .query("doc-a", &axis(1), 2)
        .await
        .expect("should query sub-index");
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn query_missing_subindex_is_index_not_found() {
    let (index, _config, _temp_dir) = create_test_index().await;

    let result = index.query("missing", &axis(0), 3).await;
    assert!(matches!(result, Err(EngineError::IndexNotFound(key)) if key == "missing"));
}

#[tokio::test]
async fn create_subindex_is_idempotent() {
    let (index, _config, _temp_dir) = create_test_index().await;

    index.create_subindex("doc-a").await.expect("create");
    index.create_subindex("doc-a").await.expect("create again");

    assert!(index.has_subindex("doc-a").await.expect("has"));
    assert_eq!(index.count("doc-a").await.expect("count"), 0);

    let ids = index.add("doc-a", &[]).await.expect("empty add");
    assert!(ids.is_empty());
}

#[tokio::test]
async fn add_to_subindex_rejects_wrong_dimension() {
    let (index, _config, _temp_dir) = create_test_index().await;

    let result = index.add("doc-a", &[axis(0), vec![1.0, 2.0]]).await;
    assert!(matches!(result, Err(EngineError::DimensionMismatch { .. })));
    assert!(!index.has_subindex("doc-a").await.expect("has"));
}

#[tokio::test]
async fn delete_subindex_removes_storage() {
    let (index, config, _temp_dir) = create_test_index().await;

    index.add("doc-a", &[axis(0)]).await.expect("add");
    assert!(config.sub_index_path().join("doc-a.lance").exists());

    assert!(index.delete_subindex("doc-a").await.expect("delete"));
    assert!(!index.has_subindex("doc-a").await.expect("has"));
    assert!(!config.sub_index_path().join("doc-a.lance").exists());

    assert!(!index.delete_subindex("doc-a").await.expect("idempotent delete"));
}

#[tokio::test]
async fn has_subindex_only_for_created_keys() {
    let (index, _config, _temp_dir) = create_test_index().await;

    index.add("doc-a", &[axis(0)]).await.expect("add");

    assert!(index.has_subindex("doc-a").await.expect("has"));
    assert!(!index.has_subindex("doc-b").await.expect("has"));
    assert!(!index.delete_subindex("doc-b").await.expect("delete unknown"));
    assert!(index.has_subindex("doc-a").await.expect("other key untouched"));
    assert!(matches!(
        index.has_subindex("../doc-a").await,
        Err(EngineError::InvalidDocumentId(_))
    ));
}

#[tokio::test]
async fn clear_subindexes_drops_all() {
    let (index, _config, _temp_dir) = create_test_index().await;

    index.add("doc-a", &[axis(0)]).await.expect("add");
    index.add("doc-b", &[axis(1)]).await.expect("add");

    assert_eq!(index.clear_subindexes().await.expect("clear"), 2);
    assert!(index.list_subindexes().await.expect("list").is_empty());
}
