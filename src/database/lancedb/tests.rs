use super::*;
use serde_json::json;
use tempfile::TempDir;

async fn connected_store(distance_method: DistanceMethod) -> (TempDir, LanceDbVectorStore) {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let store = LanceDbVectorStore::new(temp_dir.path().join("vectors"), distance_method);
    store.connect().await.expect("should connect to LanceDB");
    (temp_dir, store)
}

fn unit_vector(dimension: usize, axis: usize) -> Vec<f32> {
    let mut vector = vec![0.0; dimension];
    vector[axis % dimension] = 1.0;
    vector
}

#[test]
fn schema_layout() {
    let schema = LanceDbVectorStore::create_schema(4).expect("should build schema");
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    assert_eq!(names, vec!["chunk_id", "vector", "text", "metadata"]);
    assert!(matches!(
        schema.field(1).data_type(),
        DataType::FixedSizeList(_, 4)
    ));
}

#[test]
fn oversized_dimension_is_an_error() {
    let too_large = usize::try_from(i32::MAX).expect("fits in usize") + 1;
    assert!(LanceDbVectorStore::create_schema(too_large).is_err());

    let texts = vec!["a".to_string()];
    let vectors = vec![vec![1.0]];
    assert!(
        LanceDbVectorStore::create_record_batch(too_large, &texts, &vectors, &[1], None, 0)
            .is_err()
    );
}

#[test]
fn record_batch_encodes_metadata_as_json() {
    let texts = vec!["a".to_string(), "b".to_string()];
    let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
    let metadatas = vec![json!({"page": 1}), json!({"page": 2})];

    let batch =
        LanceDbVectorStore::create_record_batch(2, &texts, &vectors, &[7, 8], Some(&metadatas), 0)
            .expect("should build record batch");
    assert_eq!(batch.num_rows(), 2);

    let metadata = batch
        .column_by_name(METADATA_COLUMN)
        .and_then(|col| col.as_any().downcast_ref::<StringArray>())
        .expect("metadata column is utf8");
    let decoded: Value = serde_json::from_str(metadata.value(1)).expect("can parse json");
    assert_eq!(decoded, json!({"page": 2}));
}

#[tokio::test]
async fn operations_require_connection() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let store = LanceDbVectorStore::new(temp_dir.path().join("vectors"), DistanceMethod::Cosine);
    assert!(store.collection_exists("collection_4_1").await.is_err());
}

#[tokio::test]
async fn create_collection_is_idempotent_and_resettable() {
    let (_temp_dir, store) = connected_store(DistanceMethod::Cosine).await;
    let name = "collection_4_1";

    assert!(store.create_collection(name, 4, false).await.expect("create"));
    assert!(!store.create_collection(name, 4, false).await.expect("create again"));

    let inserted = store
        .insert_one(name, "first", &unit_vector(4, 0), 1, None)
        .await
        .expect("insert");
    assert!(inserted);

    assert!(store.create_collection(name, 4, true).await.expect("reset"));
    let info = store
        .get_collection_info(name)
        .await
        .expect("info")
        .expect("collection exists");
    assert_eq!(info.record_count, 0);
    assert_eq!(info.dimension, Some(4));
    assert_eq!(info.backend, VectorStoreBackend::LanceDb);
}

#[tokio::test]
async fn create_collection_rejects_invalid_names() {
    let (_temp_dir, store) = connected_store(DistanceMethod::Cosine).await;
    assert!(store.create_collection("Bad-Name", 4, false).await.is_err());
    assert!(store.create_collection("collection_0_1", 0, false).await.is_err());
    assert!(
        store
            .create_collection("collection_9_1", usize::MAX, false)
            .await
            .is_err()
    );
    assert!(
        !store
            .collection_exists("collection_9_1")
            .await
            .expect("should check")
    );
}

#[tokio::test]
async fn insert_many_then_search_finds_record() {
    let (_temp_dir, store) = connected_store(DistanceMethod::Cosine).await;
    let name = "collection_4_2";
    store.create_collection(name, 4, false).await.expect("create");

    let texts: Vec<String> = (0..4).map(|i| format!("chunk {}", i)).collect();
    let vectors: Vec<Vec<f32>> = (0..4).map(|i| unit_vector(4, i)).collect();
    let ids = [1, 2, 3, 4];

    let inserted = store
        .insert_many(name, &texts, &vectors, &ids, None, 3)
        .await
        .expect("insert");
    assert!(inserted);

    let hits = store
        .search_by_vector(name, &unit_vector(4, 2), 2)
        .await
        .expect("search")
        .expect("collection exists");
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].text, "chunk 2");
    assert!((hits[0].score - 1.0).abs() < 1e-4);
    assert!(hits[0].score >= hits[1].score);
}

#[tokio::test]
async fn reinserting_chunk_id_overwrites_record() {
    let (_temp_dir, store) = connected_store(DistanceMethod::Cosine).await;
    let name = "collection_4_3";
    store.create_collection(name, 4, false).await.expect("create");

    for text in ["old text", "new text"] {
        let inserted = store
            .insert_one(name, text, &unit_vector(4, 0), 42, Some(&json!({"v": text})))
            .await
            .expect("insert");
        assert!(inserted);
    }

    let info = store
        .get_collection_info(name)
        .await
        .expect("info")
        .expect("collection exists");
    assert_eq!(info.record_count, 1);

    let hits = store
        .search_by_vector(name, &unit_vector(4, 0), 5)
        .await
        .expect("search")
        .expect("collection exists");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].text, "new text");
}

#[tokio::test]
async fn mismatched_insert_writes_nothing() {
    let (_temp_dir, store) = connected_store(DistanceMethod::Cosine).await;
    let name = "collection_4_4";
    store.create_collection(name, 4, false).await.expect("create");

    let texts = vec!["a".to_string(), "b".to_string()];
    let vectors = vec![unit_vector(4, 0)];
    let inserted = store
        .insert_many(name, &texts, &vectors, &[1, 2], None, 50)
        .await
        .expect("insert");
    assert!(!inserted);

    let wrong_dimension = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
    let inserted = store
        .insert_many(name, &texts, &wrong_dimension, &[1, 2], None, 50)
        .await
        .expect("insert");
    assert!(!inserted);

    let inserted = store
        .insert_one(name, "a", &unit_vector(4, 0), 0, None)
        .await
        .expect("insert");
    assert!(!inserted);

    let info = store
        .get_collection_info(name)
        .await
        .expect("info")
        .expect("collection exists");
    assert_eq!(info.record_count, 0);
}

#[tokio::test]
async fn repeated_chunk_id_in_one_batch_is_refused() {
    let (_temp_dir, store) = connected_store(DistanceMethod::Cosine).await;
    let name = "collection_4_6";
    store.create_collection(name, 4, false).await.expect("create");

    let texts = vec!["first".to_string(), "second".to_string()];
    let vectors = vec![unit_vector(4, 0), unit_vector(4, 1)];
    let inserted = store
        .insert_many(name, &texts, &vectors, &[5, 5], None, 50)
        .await
        .expect("insert");
    assert!(!inserted);

    let inserted = store
        .insert_many(name, &texts[..1], &vectors[..1], &[5], None, 50)
        .await
        .expect("insert");
    assert!(inserted);

    let info = store
        .get_collection_info(name)
        .await
        .expect("info")
        .expect("collection exists");
    assert_eq!(info.record_count, 1);
}

#[tokio::test]
async fn missing_collection_is_reported_not_raised() {
    let (_temp_dir, store) = connected_store(DistanceMethod::Cosine).await;
    let name = "collection_4_99";

    assert!(!store.collection_exists(name).await.expect("exists"));
    assert!(store.get_collection_info(name).await.expect("info").is_none());
    assert!(
        store
            .search_by_vector(name, &unit_vector(4, 0), 3)
            .await
            .expect("search")
            .is_none()
    );
    assert!(
        !store
            .insert_one(name, "text", &unit_vector(4, 0), 1, None)
            .await
            .expect("insert")
    );
    assert!(!store.delete_collection(name).await.expect("delete"));
}

#[tokio::test]
async fn empty_collection_search_returns_no_hits() {
    let (_temp_dir, store) = connected_store(DistanceMethod::Dot).await;
    let name = "collection_4_5";
    store.create_collection(name, 4, false).await.expect("create");

    let hits = store
        .search_by_vector(name, &unit_vector(4, 0), 3)
        .await
        .expect("search")
        .expect("collection exists");
    assert!(hits.is_empty());
}

#[tokio::test]
async fn list_and_delete_collections() {
    let (_temp_dir, store) = connected_store(DistanceMethod::Cosine).await;
    store
        .create_collection("collection_4_2", 4, false)
        .await
        .expect("create");
    store
        .create_collection("collection_4_1", 4, false)
        .await
        .expect("create");

    let names = store.list_collections().await.expect("list");
    assert_eq!(names, vec!["collection_4_1", "collection_4_2"]);

    assert!(store.delete_collection("collection_4_1").await.expect("delete"));
    store
        .delete_vector_index("collection_4_2")
        .await
        .expect("no-op");

    let names = store.list_collections().await.expect("list");
    assert_eq!(names, vec!["collection_4_2"]);

    store.disconnect().await.expect("disconnect");
    assert!(store.list_collections().await.is_err());
}
