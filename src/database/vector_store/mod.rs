//! Backend-agnostic vector store capability
//!
//! Every backend stores one record per chunk (vector, text, metadata, chunk id)
//! inside a named collection. Expected conditions such as a missing collection
//! or a vector of the wrong size are reported through `Ok(false)` / `Ok(None)`;
//! `Err` is reserved for failures of the backend itself.

#[cfg(test)]
mod tests;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use fancy_regex::Regex;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::database::lancedb::LanceDbVectorStore;
use crate::database::pgvector::PgVectorStore;
use crate::{RagError, Result};

/// Default number of records written per batch by `insert_many`
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 50;

/// Prefix shared by every collection name
pub const COLLECTION_PREFIX: &str = "collection_";

// Index names append `_vector_idx`, and PostgreSQL truncates identifiers at 63 bytes.
static COLLECTION_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]{0,51}$").expect("valid regex"));

/// Which backend implementation serves the vector store capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorStoreBackend {
    #[default]
    LanceDb,
    PgVector,
}

impl fmt::Display for VectorStoreBackend {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::LanceDb => write!(f, "lancedb"),
            Self::PgVector => write!(f, "pgvector"),
        }
    }
}

impl FromStr for VectorStoreBackend {
    type Err = RagError;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lancedb" => Ok(Self::LanceDb),
            "pgvector" => Ok(Self::PgVector),
            other => Err(RagError::Config(format!(
                "Unknown vector store backend: {}",
                other
            ))),
        }
    }
}

/// Similarity measure used when building and querying collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMethod {
    #[default]
    Cosine,
    Dot,
}

impl fmt::Display for DistanceMethod {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Cosine => write!(f, "cosine"),
            Self::Dot => write!(f, "dot"),
        }
    }
}

impl FromStr for DistanceMethod {
    type Err = RagError;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "dot" => Ok(Self::Dot),
            other => Err(RagError::Config(format!("Unknown distance method: {}", other))),
        }
    }
}

/// A hit returned by a similarity query. Higher scores are more similar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub text: String,
    pub score: f32,
}

/// Descriptor of a collection as reported by its backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub backend: VectorStoreBackend,
    pub dimension: Option<usize>,
    pub record_count: u64,
    /// Backend-specific metadata
    pub details: Value,
}

/// Reason an insert was refused before anything was written
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InsertRejection {
    #[error("texts ({texts}), vectors ({vectors}) and record ids ({record_ids}) differ in length")]
    LengthMismatch {
        texts: usize,
        vectors: usize,
        record_ids: usize,
    },
    #[error("{metadatas} metadata entries supplied for {records} records")]
    MetadataLengthMismatch { metadatas: usize, records: usize },
    #[error("record id {0} is not a valid chunk id")]
    InvalidRecordId(i64),
    #[error("vector {index} has {actual} dimensions, collection expects {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("record id {0} appears more than once in the batch")]
    DuplicateRecordId(i64),
    #[error("vector {index} contains a non-finite value")]
    NonFiniteValue { index: usize },
}

/// Validate a batch of records against a collection of `dimension` before writing
#[inline]
pub fn check_insert_batch(
    texts: &[String],
    vectors: &[Vec<f32>],
    record_ids: &[i64],
    metadatas: Option<&[Value]>,
    dimension: usize,
) -> std::result::Result<(), InsertRejection> {
    if texts.len() != vectors.len() || vectors.len() != record_ids.len() {
        return Err(InsertRejection::LengthMismatch {
            texts: texts.len(),
            vectors: vectors.len(),
            record_ids: record_ids.len(),
        });
    }

    if let Some(metadatas) = metadatas {
        if !metadatas.is_empty() && metadatas.len() != record_ids.len() {
            return Err(InsertRejection::MetadataLengthMismatch {
                metadatas: metadatas.len(),
                records: record_ids.len(),
            });
        }
    }

    if let Some(&record_id) = record_ids.iter().find(|&&id| id <= 0) {
        return Err(InsertRejection::InvalidRecordId(record_id));
    }

    // Both backends upsert by record id, so a repeated id would write one row twice
    if let Some(&record_id) = record_ids.iter().duplicates().next() {
        return Err(InsertRejection::DuplicateRecordId(record_id));
    }

    for (index, vector) in vectors.iter().enumerate() {
        if vector.len() != dimension {
            return Err(InsertRejection::DimensionMismatch {
                index,
                expected: dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|value| !value.is_finite()) {
            return Err(InsertRejection::NonFiniteValue { index });
        }
    }

    Ok(())
}

/// Collection names are interpolated into DDL, so only plain lowercase identifiers pass
#[inline]
pub fn is_valid_collection_name(name: &str) -> bool {
    COLLECTION_NAME_REGEX.is_match(name).unwrap_or(false)
}

/// Metadata for record `index`, defaulting to an empty object
#[inline]
pub fn metadata_at(metadatas: Option<&[Value]>, index: usize) -> Value {
    metadatas
        .and_then(|m| m.get(index))
        .filter(|value| !value.is_null())
        .cloned()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn backend(&self) -> VectorStoreBackend;

    /// Acquire backend resources; failure is fatal at startup
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn collection_exists(&self, name: &str) -> Result<bool>;

    async fn list_collections(&self) -> Result<Vec<String>>;

    async fn get_collection_info(&self, name: &str) -> Result<Option<CollectionInfo>>;

    /// Create `name` if absent, dropping it first when `do_reset` is set.
    /// Returns whether a new collection was created.
    async fn create_collection(
        &self,
        name: &str,
        embedding_size: usize,
        do_reset: bool,
    ) -> Result<bool>;

    /// Drop `name`; dropping an absent collection is not an error
    async fn delete_collection(&self, name: &str) -> Result<bool>;

    /// Drop the secondary vector index of `name` if the backend manages one
    async fn delete_vector_index(&self, name: &str) -> Result<()>;

    async fn insert_one(
        &self,
        name: &str,
        text: &str,
        vector: &[f32],
        record_id: i64,
        metadata: Option<&Value>,
    ) -> Result<bool>;

    /// Insert or overwrite records keyed by chunk id, `batch_size` records at a time.
    /// Every earlier batch stays committed if a later one fails.
    async fn insert_many(
        &self,
        name: &str,
        texts: &[String],
        vectors: &[Vec<f32>],
        record_ids: &[i64],
        metadatas: Option<&[Value]>,
        batch_size: usize,
    ) -> Result<bool>;

    /// `None` if the collection does not exist, otherwise at most `limit` hits
    /// ordered by descending similarity
    async fn search_by_vector(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Option<Vec<RetrievedDocument>>>;
}

/// Build the backend selected in `config`. The pool is only used by the pgvector backend.
#[inline]
pub fn create_vector_store(config: &Config, pool: &PgPool) -> Result<Arc<dyn VectorStore>> {
    info!(
        "Using {} vector store ({} distance)",
        config.vector_db.backend, config.vector_db.distance_method
    );

    let store: Arc<dyn VectorStore> = match config.vector_db.backend {
        VectorStoreBackend::LanceDb => Arc::new(LanceDbVectorStore::new(
            config.vector_database_path(),
            config.vector_db.distance_method,
        )),
        VectorStoreBackend::PgVector => Arc::new(PgVectorStore::new(
            pool.clone(),
            config.vector_db.distance_method,
            config.vector_db.index_type,
            config.vector_db.index_threshold,
        )),
    };

    Ok(store)
}
