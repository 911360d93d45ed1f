use super::*;
use serde_json::json;

fn texts(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("text {}", i)).collect()
}

#[test]
fn backend_parsing_and_display() {
    assert_eq!(
        "lancedb".parse::<VectorStoreBackend>().expect("parses"),
        VectorStoreBackend::LanceDb
    );
    assert_eq!(
        "PgVector".parse::<VectorStoreBackend>().expect("parses"),
        VectorStoreBackend::PgVector
    );
    assert!("qdrant".parse::<VectorStoreBackend>().is_err());
    assert_eq!(VectorStoreBackend::PgVector.to_string(), "pgvector");
}

#[test]
fn distance_method_parsing() {
    assert_eq!(
        "cosine".parse::<DistanceMethod>().expect("parses"),
        DistanceMethod::Cosine
    );
    assert_eq!(
        "DOT".parse::<DistanceMethod>().expect("parses"),
        DistanceMethod::Dot
    );
    assert!("euclid".parse::<DistanceMethod>().is_err());
}

#[test]
fn collection_name_validation() {
    assert!(is_valid_collection_name("collection_768_1"));
    assert!(is_valid_collection_name("_private"));
    assert!(!is_valid_collection_name(""));
    assert!(!is_valid_collection_name("1collection"));
    assert!(!is_valid_collection_name("Collection"));
    assert!(!is_valid_collection_name("collection; DROP TABLE chunks"));
    assert!(!is_valid_collection_name("collection-1"));
    assert!(!is_valid_collection_name(&"c".repeat(53)));
    assert!(is_valid_collection_name(&"c".repeat(52)));
}

#[test]
fn insert_batch_accepts_consistent_input() {
    let vectors = vec![vec![0.1, 0.2], vec![0.3, 0.4]];
    let result = check_insert_batch(&texts(2), &vectors, &[1, 2], None, 2);
    assert_eq!(result, Ok(()));
}

#[test]
fn insert_batch_rejects_length_mismatch() {
    let vectors = vec![vec![0.1, 0.2], vec![0.3, 0.4]];
    let result = check_insert_batch(&texts(2), &vectors, &[1], None, 2);
    assert_eq!(
        result,
        Err(InsertRejection::LengthMismatch {
            texts: 2,
            vectors: 2,
            record_ids: 1,
        })
    );
}

#[test]
fn insert_batch_rejects_metadata_mismatch() {
    let vectors = vec![vec![0.1, 0.2], vec![0.3, 0.4]];
    let metadatas = vec![json!({"page": 1})];
    let result = check_insert_batch(&texts(2), &vectors, &[1, 2], Some(&metadatas), 2);
    assert!(matches!(
        result,
        Err(InsertRejection::MetadataLengthMismatch { .. })
    ));

    // An empty metadata list means "use defaults"
    let result = check_insert_batch(&texts(2), &vectors, &[1, 2], Some(&[]), 2);
    assert_eq!(result, Ok(()));
}

#[test]
fn insert_batch_rejects_bad_ids_and_dimensions() {
    let vectors = vec![vec![0.1, 0.2], vec![0.3, 0.4]];
    assert_eq!(
        check_insert_batch(&texts(2), &vectors, &[1, 0], None, 2),
        Err(InsertRejection::InvalidRecordId(0))
    );

    let vectors = vec![vec![0.1, 0.2], vec![0.3]];
    assert_eq!(
        check_insert_batch(&texts(2), &vectors, &[1, 2], None, 2),
        Err(InsertRejection::DimensionMismatch {
            index: 1,
            expected: 2,
            actual: 1,
        })
    );

    let vectors = vec![vec![f32::NAN, 0.2]];
    assert_eq!(
        check_insert_batch(&texts(1), &vectors, &[1], None, 2),
        Err(InsertRejection::NonFiniteValue { index: 0 })
    );
}

#[test]
fn insert_batch_rejects_repeated_record_id() {
    let vectors = vec![vec![0.1, 0.2], vec![0.3, 0.4], vec![0.5, 0.6]];
    assert_eq!(
        check_insert_batch(&texts(3), &vectors, &[4, 9, 4], None, 2),
        Err(InsertRejection::DuplicateRecordId(4))
    );
}

#[test]
fn metadata_defaults_to_empty_object() {
    let metadatas = vec![json!({"source": "a.txt"}), Value::Null];
    assert_eq!(
        metadata_at(Some(&metadatas), 0),
        json!({"source": "a.txt"})
    );
    assert_eq!(metadata_at(Some(&metadatas), 1), json!({}));
    assert_eq!(metadata_at(None, 3), json!({}));
}

#[test]
fn retrieved_document_serialization() {
    let document = RetrievedDocument {
        text: "hello".to_string(),
        score: 0.5,
    };
    let json = serde_json::to_value(&document).expect("can serialize json");
    assert_eq!(json, json!({"text": "hello", "score": 0.5}));
}
