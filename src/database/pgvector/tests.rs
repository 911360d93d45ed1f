use super::*;
use crate::database::postgres::tests::{seed_project, test_database};
use serde_json::json;
use serial_test::serial;

fn unit_vector(dimension: usize, axis: usize) -> Vec<f32> {
    let mut vector = vec![0.0; dimension];
    vector[axis % dimension] = 1.0;
    vector
}

async fn connected_store(
    distance_method: DistanceMethod,
) -> (crate::database::Database, PgVectorStore) {
    let database = test_database().await;
    let store = PgVectorStore::new(
        database.pool().clone(),
        distance_method,
        PgVectorIndexType::Hnsw,
        DEFAULT_INDEX_THRESHOLD,
    );
    store.connect().await.expect("should enable pgvector");
    (database, store)
}

#[test]
fn vector_literal_format() {
    assert_eq!(vector_literal(&[0.5, -1.0, 2.25]), "[0.5,-1,2.25]");
    assert_eq!(vector_literal(&[]), "[]");
}

#[test]
fn index_naming_and_types() {
    assert_eq!(vector_index_name("collection_4_1"), "collection_4_1_vector_idx");
    assert_eq!(PgVectorIndexType::IvfFlat.to_string(), "ivfflat");
    let parsed: PgVectorIndexType =
        serde_json::from_value(json!("hnsw")).expect("can parse index type");
    assert_eq!(parsed, PgVectorIndexType::Hnsw);
}

#[test]
fn index_ddl_matches_distance() {
    assert_eq!(
        create_index_sql("collection_4_1", PgVectorIndexType::Hnsw, DistanceMethod::Cosine),
        "CREATE INDEX IF NOT EXISTS \"collection_4_1_vector_idx\" ON \"collection_4_1\" \
         USING hnsw (vector vector_cosine_ops)"
    );
    assert!(
        create_index_sql("collection_4_1", PgVectorIndexType::IvfFlat, DistanceMethod::Dot)
            .ends_with("USING ivfflat (vector vector_ip_ops)")
    );
}

#[test]
fn search_sql_orders_by_distance_operator() {
    assert_eq!(
        search_sql("collection_4_1", DistanceMethod::Cosine),
        "SELECT text, (1 - (vector <=> $1::vector))::float4 AS score \
         FROM \"collection_4_1\" ORDER BY vector <=> $1::vector LIMIT $2"
    );
    let dot = search_sql("collection_4_1", DistanceMethod::Dot);
    assert!(dot.contains("((vector <#> $1::vector) * -1)::float4 AS score"));
    assert!(dot.ends_with("ORDER BY vector <#> $1::vector LIMIT $2"));
}

#[test]
fn table_and_upsert_sql() {
    let ddl = create_table_sql("collection_8_2", 8);
    assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS \"collection_8_2\" ("));
    assert!(ddl.contains("vector vector(8) NOT NULL"));
    assert!(ddl.contains("metadata jsonb NOT NULL DEFAULT '{}'"));
    assert!(ddl.contains("chunk_id bigint NOT NULL UNIQUE REFERENCES chunks (chunk_id)"));

    let upsert = upsert_sql("collection_8_2");
    assert!(upsert.starts_with("INSERT INTO \"collection_8_2\" (text, vector, metadata, chunk_id)"));
    assert!(upsert.contains("ON CONFLICT (chunk_id) DO UPDATE"));
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL with pgvector"]
async fn create_twice_then_reset() {
    let (database, store) = connected_store(DistanceMethod::Cosine).await;
    let (project_id, chunk_ids) = seed_project(&database, 1).await;
    let name = format!("collection_4_{}", project_id);

    assert!(store.create_collection(&name, 4, false).await.expect("create"));
    assert!(!store.create_collection(&name, 4, false).await.expect("create again"));
    assert!(
        store
            .insert_one(&name, "text", &unit_vector(4, 0), chunk_ids[0], None)
            .await
            .expect("insert")
    );

    assert!(store.create_collection(&name, 4, true).await.expect("reset"));
    let info = store
        .get_collection_info(&name)
        .await
        .expect("info")
        .expect("collection exists");
    assert_eq!(info.record_count, 0);
    assert_eq!(info.dimension, Some(4));
    assert_eq!(info.details["has_vector_index"], json!(false));

    assert!(store.list_collections().await.expect("list").contains(&name));
    assert!(store.delete_collection(&name).await.expect("delete"));
    assert!(!store.delete_collection(&name).await.expect("delete again"));
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL with pgvector"]
async fn insert_many_then_search_and_upsert() {
    let (database, store) = connected_store(DistanceMethod::Cosine).await;
    let (project_id, chunk_ids) = seed_project(&database, 4).await;
    let name = format!("collection_4_{}", project_id);
    store.create_collection(&name, 4, true).await.expect("create");

    let texts: Vec<String> = (0..4).map(|i| format!("chunk {}", i)).collect();
    let vectors: Vec<Vec<f32>> = (0..4).map(|i| unit_vector(4, i)).collect();
    let metadatas: Vec<Value> = (0..4).map(|i| json!({"order": i})).collect();
    assert!(
        store
            .insert_many(&name, &texts, &vectors, &chunk_ids, Some(&metadatas), 3)
            .await
            .expect("insert")
    );

    let hits = store
        .search_by_vector(&name, &unit_vector(4, 1), 2)
        .await
        .expect("search")
        .expect("collection exists");
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].text, "chunk 1");
    assert!((hits[0].score - 1.0).abs() < 1e-4);
    assert!(hits[0].score >= hits[1].score);

    assert!(
        store
            .insert_one(&name, "chunk 1 revised", &unit_vector(4, 1), chunk_ids[1], None)
            .await
            .expect("upsert")
    );
    let info = store
        .get_collection_info(&name)
        .await
        .expect("info")
        .expect("collection exists");
    assert_eq!(info.record_count, 4);

    let hits = store
        .search_by_vector(&name, &unit_vector(4, 1), 1)
        .await
        .expect("search")
        .expect("collection exists");
    assert_eq!(hits[0].text, "chunk 1 revised");

    store.delete_collection(&name).await.expect("cleanup");
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL with pgvector"]
async fn mismatched_insert_writes_nothing() {
    let (database, store) = connected_store(DistanceMethod::Cosine).await;
    let (project_id, chunk_ids) = seed_project(&database, 2).await;
    let name = format!("collection_4_{}", project_id);
    store.create_collection(&name, 4, true).await.expect("create");

    let texts = vec!["a".to_string(), "b".to_string()];
    assert!(
        !store
            .insert_many(&name, &texts, &[unit_vector(4, 0)], &chunk_ids, None, 50)
            .await
            .expect("insert")
    );
    assert!(
        !store
            .insert_one(&name, "a", &[1.0, 0.0], chunk_ids[0], None)
            .await
            .expect("insert")
    );

    let info = store
        .get_collection_info(&name)
        .await
        .expect("info")
        .expect("collection exists");
    assert_eq!(info.record_count, 0);

    store.delete_collection(&name).await.expect("cleanup");
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL with pgvector"]
async fn vector_index_follows_threshold() {
    let (database, store) = connected_store(DistanceMethod::Cosine).await;
    let (project_id, chunk_ids) = seed_project(&database, 101).await;
    let name = format!("collection_8_{}", project_id);
    store.create_collection(&name, 8, true).await.expect("create");

    let texts: Vec<String> = (0..101).map(|i| format!("chunk {}", i)).collect();
    let vectors: Vec<Vec<f32>> = (0..101)
        .map(|i| {
            let mut vector = unit_vector(8, i);
            vector[(i + 1) % 8] = (i as f32) / 101.0;
            vector
        })
        .collect();

    assert!(
        store
            .insert_many(&name, &texts[..99], &vectors[..99], &chunk_ids[..99], None, 50)
            .await
            .expect("insert")
    );
    assert!(!store.has_vector_index(&name).await.expect("index lookup"));

    assert!(
        store
            .insert_many(&name, &texts[99..], &vectors[99..], &chunk_ids[99..], None, 50)
            .await
            .expect("insert")
    );
    assert!(store.has_vector_index(&name).await.expect("index lookup"));

    store.delete_vector_index(&name).await.expect("drop index");
    assert!(!store.has_vector_index(&name).await.expect("index lookup"));

    store.delete_collection(&name).await.expect("cleanup");
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL with pgvector"]
async fn dot_product_scores_descend() {
    let (database, store) = connected_store(DistanceMethod::Dot).await;
    let (project_id, chunk_ids) = seed_project(&database, 3).await;
    let name = format!("collection_2_{}", project_id);
    store.create_collection(&name, 2, true).await.expect("create");

    let texts: Vec<String> = ["small", "large", "opposite"]
        .iter()
        .map(ToString::to_string)
        .collect();
    let vectors = vec![vec![0.5, 0.0], vec![2.0, 0.0], vec![-1.0, 0.0]];
    store
        .insert_many(&name, &texts, &vectors, &chunk_ids, None, 50)
        .await
        .expect("insert");

    let hits = store
        .search_by_vector(&name, &[1.0, 0.0], 3)
        .await
        .expect("search")
        .expect("collection exists");
    let order: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
    assert_eq!(order, vec!["large", "small", "opposite"]);
    assert!((hits[0].score - 2.0).abs() < 1e-4);

    store.delete_collection(&name).await.expect("cleanup");
}

#[tokio::test]
#[serial]
#[ignore = "requires PostgreSQL with pgvector"]
async fn missing_collection_is_reported_not_raised() {
    let (_database, store) = connected_store(DistanceMethod::Cosine).await;
    let name = "collection_4_0";

    assert!(store.get_collection_info(name).await.expect("info").is_none());
    assert!(
        store
            .search_by_vector(name, &unit_vector(4, 0), 3)
            .await
            .expect("search")
            .is_none()
    );
    assert!(store.create_collection("Bad Name", 4, false).await.is_err());
}
