// PostgreSQL + pgvector vector store backend
// Each collection is a table keyed by chunk id; an ANN index is added once the
// table grows past a configured row count

#[cfg(test)]
mod tests;

use std::fmt;

use async_trait::async_trait;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use crate::database::vector_store::{
    CollectionInfo, DistanceMethod, RetrievedDocument, VectorStore, VectorStoreBackend,
    check_insert_batch, is_valid_collection_name, metadata_at,
};
use crate::{RagError, Result};

/// Row count above which a collection gets an ANN index
pub const DEFAULT_INDEX_THRESHOLD: u64 = 100;

/// ANN index access method used for collection tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PgVectorIndexType {
    #[default]
    Hnsw,
    IvfFlat,
}

impl PgVectorIndexType {
    const fn access_method(self) -> &'static str {
        match self {
            Self::Hnsw => "hnsw",
            Self::IvfFlat => "ivfflat",
        }
    }
}

impl fmt::Display for PgVectorIndexType {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.access_method())
    }
}

/// Name of the ANN index belonging to `collection`
#[inline]
pub fn vector_index_name(collection: &str) -> String {
    format!("{}_vector_idx", collection)
}

/// pgvector's text input format: `[v1,v2,...]`
#[inline]
pub fn vector_literal(vector: &[f32]) -> String {
    format!("[{}]", vector.iter().join(","))
}

// Only called with names that passed `is_valid_collection_name`
fn quoted(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

// Another session created the same object first
fn is_duplicate_object(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|db_error| db_error.code())
        .is_some_and(|code| matches!(code.as_ref(), "42P07" | "42710" | "23505"))
}

/// Operator class matching the distance the collection is queried with
#[inline]
pub const fn operator_class(distance_method: DistanceMethod) -> &'static str {
    match distance_method {
        DistanceMethod::Cosine => "vector_cosine_ops",
        DistanceMethod::Dot => "vector_ip_ops",
    }
}

/// Score expression and ordering expression for a query bound as `$1`
#[inline]
pub const fn score_and_order(distance_method: DistanceMethod) -> (&'static str, &'static str) {
    match distance_method {
        DistanceMethod::Cosine => ("1 - (vector <=> $1::vector)", "vector <=> $1::vector"),
        // Raw inner product rather than `1 - distance`: `<#>` yields the negated inner product
        DistanceMethod::Dot => ("(vector <#> $1::vector) * -1", "vector <#> $1::vector"),
    }
}

#[inline]
pub fn create_table_sql(name: &str, embedding_size: usize) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id bigserial PRIMARY KEY,
            text text NOT NULL,
            vector vector({}) NOT NULL,
            metadata jsonb NOT NULL DEFAULT '{{}}',
            chunk_id bigint NOT NULL UNIQUE REFERENCES chunks (chunk_id) ON DELETE CASCADE
        )",
        quoted(name),
        embedding_size
    )
}

#[inline]
pub fn create_index_sql(
    name: &str,
    index_type: PgVectorIndexType,
    distance_method: DistanceMethod,
) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} USING {} (vector {})",
        quoted(&vector_index_name(name)),
        quoted(name),
        index_type.access_method(),
        operator_class(distance_method)
    )
}

/// Upsert of one record keyed by chunk id; binds text, vector, metadata, chunk id
#[inline]
pub fn upsert_sql(name: &str) -> String {
    format!(
        "INSERT INTO {} (text, vector, metadata, chunk_id)
         VALUES ($1, $2::vector, $3, $4)
         ON CONFLICT (chunk_id) DO UPDATE
         SET text = EXCLUDED.text, vector = EXCLUDED.vector, metadata = EXCLUDED.metadata",
        quoted(name)
    )
}

/// Top-k query; binds the query vector as `$1` and the limit as `$2`
#[inline]
pub fn search_sql(name: &str, distance_method: DistanceMethod) -> String {
    let (score, order) = score_and_order(distance_method);
    format!(
        "SELECT text, ({})::float4 AS score FROM {} ORDER BY {} LIMIT $2",
        score,
        quoted(name),
        order
    )
}

fn store_error(action: &str, error: &sqlx::Error) -> RagError {
    RagError::VectorStore(format!("Failed to {}: {}", action, error))
}

/// Vector store backed by pgvector tables in the application database
pub struct PgVectorStore {
    pool: PgPool,
    distance_method: DistanceMethod,
    index_type: PgVectorIndexType,
    index_threshold: u64,
}

impl PgVectorStore {
    #[inline]
    pub const fn new(
        pool: PgPool,
        distance_method: DistanceMethod,
        index_type: PgVectorIndexType,
        index_threshold: u64,
    ) -> Self {
        Self {
            pool,
            distance_method,
            index_type,
            index_threshold,
        }
    }

    async fn vector_dimension(&self, name: &str) -> Result<Option<usize>> {
        let typmod: Option<i32> = sqlx::query_scalar(
            r"
            SELECT a.atttypmod
            FROM pg_attribute a
            JOIN pg_class c ON a.attrelid = c.oid
            JOIN pg_namespace n ON c.relnamespace = n.oid
            WHERE n.nspname = current_schema()
              AND c.relname = $1
              AND a.attname = 'vector'
              AND NOT a.attisdropped
            ",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("read vector dimension", &e))?;

        Ok(typmod.and_then(|value| usize::try_from(value).ok()))
    }

    async fn record_count(&self, name: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quoted(name)))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error("count records", &e))?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Whether the ANN index of `name` exists
    #[inline]
    pub async fn has_vector_index(&self, name: &str) -> Result<bool> {
        sqlx::query_scalar(
            r"
            SELECT EXISTS (
                SELECT 1 FROM pg_indexes
                WHERE schemaname = current_schema() AND tablename = $1 AND indexname = $2
            )
            ",
        )
        .bind(name)
        .bind(vector_index_name(name))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_error("look up vector index", &e))
    }

    /// Build the ANN index once the collection holds more rows than the threshold.
    /// Returns whether an index was created.
    async fn ensure_vector_index(&self, name: &str) -> Result<bool> {
        if self.has_vector_index(name).await? {
            return Ok(false);
        }

        let count = self.record_count(name).await?;
        if count <= self.index_threshold {
            debug!(
                "{} holds {} records, index threshold is {}",
                name, count, self.index_threshold
            );
            return Ok(false);
        }

        info!(
            "Creating {} index on {} ({} records)",
            self.index_type, name, count
        );
        let ddl = create_index_sql(name, self.index_type, self.distance_method);

        match sqlx::query(&ddl).execute(&self.pool).await {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_object(&e) => Ok(false),
            Err(e) => Err(store_error("create vector index", &e)),
        }
    }

    async fn table_details(&self, name: &str) -> Result<Value> {
        let row: Option<(String, String, String, bool, bool, bool, bool)> = sqlx::query_as(
            r"
            SELECT schemaname::text, tablename::text, tableowner::text,
                   hasindexes, hasrules, hastriggers, rowsecurity
            FROM pg_tables
            WHERE schemaname = current_schema() AND tablename = $1
            ",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("read table details", &e))?;

        let has_vector_index = self.has_vector_index(name).await?;

        Ok(match row {
            Some((schema, table, owner, has_indexes, has_rules, has_triggers, row_security)) => {
                json!({
                    "schemaname": schema,
                    "tablename": table,
                    "tableowner": owner,
                    "hasindexes": has_indexes,
                    "hasrules": has_rules,
                    "hastriggers": has_triggers,
                    "rowsecurity": row_security,
                    "has_vector_index": has_vector_index,
                    "index_type": self.index_type,
                    "distance_method": self.distance_method,
                })
            }
            None => json!({ "has_vector_index": has_vector_index }),
        })
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    #[inline]
    fn backend(&self) -> VectorStoreBackend {
        VectorStoreBackend::PgVector
    }

    #[inline]
    async fn connect(&self) -> Result<()> {
        debug!("Enabling pgvector extension");
        match sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
        {
            Ok(_) => {}
            Err(e) if is_duplicate_object(&e) => {}
            Err(e) => return Err(store_error("enable pgvector extension", &e)),
        }
        info!("pgvector store ready");
        Ok(())
    }

    /// The pool is shared with the chunk store; closing it twice is harmless
    #[inline]
    async fn disconnect(&self) -> Result<()> {
        self.pool.close().await;
        debug!("Closed PostgreSQL pool");
        Ok(())
    }

    #[inline]
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        sqlx::query_scalar(
            r"
            SELECT EXISTS (
                SELECT 1 FROM pg_tables
                WHERE schemaname = current_schema() AND tablename = $1
            )
            ",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_error("check collection", &e))
    }

    #[inline]
    async fn list_collections(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(
            r"
            SELECT tablename::text FROM pg_tables
            WHERE schemaname = current_schema() AND tablename LIKE 'collection\_%'
            ORDER BY tablename
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("list collections", &e))
    }

    #[inline]
    async fn get_collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        if !is_valid_collection_name(name) || !self.collection_exists(name).await? {
            return Ok(None);
        }

        Ok(Some(CollectionInfo {
            name: name.to_string(),
            backend: VectorStoreBackend::PgVector,
            dimension: self.vector_dimension(name).await?,
            record_count: self.record_count(name).await?,
            details: self.table_details(name).await?,
        }))
    }

    #[inline]
    async fn create_collection(
        &self,
        name: &str,
        embedding_size: usize,
        do_reset: bool,
    ) -> Result<bool> {
        if !is_valid_collection_name(name) {
            return Err(RagError::VectorStore(format!(
                "Invalid collection name: {:?}",
                name
            )));
        }
        if embedding_size == 0 {
            return Err(RagError::VectorStore(
                "Embedding size must be positive".to_string(),
            ));
        }

        if do_reset {
            self.delete_collection(name).await?;
        }

        if self.collection_exists(name).await? {
            debug!("Collection {} already exists", name);
            return Ok(false);
        }

        info!(
            "Creating collection {} with {} dimensions",
            name, embedding_size
        );
        let ddl = create_table_sql(name, embedding_size);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("begin transaction", &e))?;
        match sqlx::query(&ddl).execute(&mut *tx).await {
            Ok(_) => {
                tx.commit()
                    .await
                    .map_err(|e| store_error("commit collection", &e))?;
                Ok(true)
            }
            Err(e) if is_duplicate_object(&e) => {
                debug!("Collection {} was created concurrently", name);
                Ok(false)
            }
            Err(e) => Err(store_error("create collection", &e)),
        }
    }

    #[inline]
    async fn delete_collection(&self, name: &str) -> Result<bool> {
        if !is_valid_collection_name(name) || !self.collection_exists(name).await? {
            return Ok(false);
        }

        info!("Deleting collection: {}", name);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("begin transaction", &e))?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", quoted(name)))
            .execute(&mut *tx)
            .await
            .map_err(|e| store_error("drop collection", &e))?;
        tx.commit()
            .await
            .map_err(|e| store_error("commit collection drop", &e))?;
        Ok(true)
    }

    #[inline]
    async fn delete_vector_index(&self, name: &str) -> Result<()> {
        if !is_valid_collection_name(name) {
            return Ok(());
        }

        debug!("Dropping vector index of {}", name);
        sqlx::query(&format!(
            "DROP INDEX IF EXISTS {}",
            quoted(&vector_index_name(name))
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("drop vector index", &e))?;
        Ok(())
    }

    #[inline]
    async fn insert_one(
        &self,
        name: &str,
        text: &str,
        vector: &[f32],
        record_id: i64,
        metadata: Option<&Value>,
    ) -> Result<bool> {
        let metadatas = metadata.map(|m| vec![m.clone()]);
        self.insert_many(
            name,
            &[text.to_string()],
            &[vector.to_vec()],
            &[record_id],
            metadatas.as_deref(),
            1,
        )
        .await
    }

    #[inline]
    async fn insert_many(
        &self,
        name: &str,
        texts: &[String],
        vectors: &[Vec<f32>],
        record_ids: &[i64],
        metadatas: Option<&[Value]>,
        batch_size: usize,
    ) -> Result<bool> {
        if !is_valid_collection_name(name) || !self.collection_exists(name).await? {
            error!("Can't insert into non-existent collection: {}", name);
            return Ok(false);
        }

        let Some(dimension) = self.vector_dimension(name).await? else {
            error!("Collection {} has no vector column", name);
            return Ok(false);
        };

        if let Err(rejection) = check_insert_batch(texts, vectors, record_ids, metadatas, dimension)
        {
            error!("Refusing insert into {}: {}", name, rejection);
            return Ok(false);
        }

        let statement = upsert_sql(name);

        let batch_size = batch_size.max(1);
        for start in (0..texts.len()).step_by(batch_size) {
            let end = (start + batch_size).min(texts.len());
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| store_error("begin transaction", &e))?;

            for index in start..end {
                sqlx::query(&statement)
                    .bind(&texts[index])
                    .bind(vector_literal(&vectors[index]))
                    .bind(metadata_at(metadatas, index))
                    .bind(record_ids[index])
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| store_error("insert record", &e))?;
            }

            tx.commit()
                .await
                .map_err(|e| store_error("commit batch", &e))?;
            debug!("Upserted records {}..{} into {}", start, end, name);
        }

        if let Err(e) = self.ensure_vector_index(name).await {
            warn!("Vector index for {} was not built: {}", name, e);
        }

        Ok(true)
    }

    #[inline]
    async fn search_by_vector(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Option<Vec<RetrievedDocument>>> {
        if !is_valid_collection_name(name) || !self.collection_exists(name).await? {
            error!("Can't search non-existent collection: {}", name);
            return Ok(None);
        }

        if self.vector_dimension(name).await? != Some(vector.len()) {
            warn!(
                "Query vector with {} dimensions does not fit collection {}",
                vector.len(),
                name
            );
            return Ok(None);
        }

        if limit == 0 {
            return Ok(Some(Vec::new()));
        }

        let query = search_sql(name, self.distance_method);

        let rows: Vec<(String, f32)> = sqlx::query_as(&query)
            .bind(vector_literal(vector))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("search collection", &e))?;

        debug!("Found {} documents in {}", rows.len(), name);
        Ok(Some(
            rows.into_iter()
                .map(|(text, score)| RetrievedDocument { text, score })
                .collect(),
        ))
    }
}
