// LanceDB vector store backend
// Each collection is its own LanceDB table; LanceDB manages its own indexing

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatchIterator, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::database::vector_store::{
    COLLECTION_PREFIX, CollectionInfo, DistanceMethod, RetrievedDocument, VectorStore,
    VectorStoreBackend, check_insert_batch, is_valid_collection_name, metadata_at,
};
use crate::{RagError, Result};

const CHUNK_ID_COLUMN: &str = "chunk_id";
const VECTOR_COLUMN: &str = "vector";
const TEXT_COLUMN: &str = "text";
const METADATA_COLUMN: &str = "metadata";
const DISTANCE_COLUMN: &str = "_distance";

/// Vector store backed by an embedded LanceDB database
pub struct LanceDbVectorStore {
    db_path: PathBuf,
    distance_method: DistanceMethod,
    connection: RwLock<Option<Connection>>,
}

impl LanceDbVectorStore {
    #[inline]
    pub fn new(db_path: PathBuf, distance_method: DistanceMethod) -> Self {
        Self {
            db_path,
            distance_method,
            connection: RwLock::new(None),
        }
    }

    async fn connection(&self) -> Result<Connection> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or_else(|| RagError::VectorStore("LanceDB is not connected".to_string()))
    }

    const fn distance_type(&self) -> DistanceType {
        match self.distance_method {
            DistanceMethod::Cosine => DistanceType::Cosine,
            DistanceMethod::Dot => DistanceType::Dot,
        }
    }

    /// Arrow stores fixed-size list lengths as `i32`
    fn list_size(vector_dim: usize) -> Result<i32> {
        i32::try_from(vector_dim).map_err(|_| {
            RagError::VectorStore(format!("Vector dimension {} is too large", vector_dim))
        })
    }

    fn create_schema(vector_dim: usize) -> Result<Arc<Schema>> {
        Ok(Arc::new(Schema::new(vec![
            Field::new(CHUNK_ID_COLUMN, DataType::Int64, false),
            Field::new(
                VECTOR_COLUMN,
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    Self::list_size(vector_dim)?,
                ),
                false,
            ),
            Field::new(TEXT_COLUMN, DataType::Utf8, false),
            Field::new(METADATA_COLUMN, DataType::Utf8, false),
        ])))
    }

    async fn table_names(&self, connection: &Connection) -> Result<Vec<String>> {
        connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::VectorStore(format!("Failed to list tables: {}", e)))
    }

    async fn open_table(&self, connection: &Connection, name: &str) -> Result<Table> {
        connection
            .open_table(name)
            .execute()
            .await
            .map_err(|e| RagError::VectorStore(format!("Failed to open table {}: {}", name, e)))
    }

    /// Read the vector dimension from the table schema
    async fn table_dimension(table: &Table) -> Result<Option<usize>> {
        let schema = table
            .schema()
            .await
            .map_err(|e| RagError::VectorStore(format!("Failed to get table schema: {}", e)))?;

        let dimension = schema
            .fields()
            .iter()
            .find(|field| field.name() == VECTOR_COLUMN)
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                _ => None,
            });

        Ok(dimension)
    }

    fn create_record_batch(
        vector_dim: usize,
        texts: &[String],
        vectors: &[Vec<f32>],
        record_ids: &[i64],
        metadatas: Option<&[Value]>,
        offset: usize,
    ) -> Result<RecordBatch> {
        let len = texts.len();
        let list_size = Self::list_size(vector_dim)?;

        let mut flat_values = Vec::with_capacity(len * vector_dim);
        for vector in vectors {
            flat_values.extend_from_slice(vector);
        }
        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array =
            FixedSizeListArray::try_new(field, list_size, Arc::new(values_array), None)
                .map_err(|e| {
                    RagError::VectorStore(format!("Failed to create vector array: {}", e))
                })?;

        let metadata_json = (0..len)
            .map(|i| serde_json::to_string(&metadata_at(metadatas, offset + i)))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RagError::VectorStore(format!("Failed to encode metadata: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(Int64Array::from(record_ids.to_vec())),
            Arc::new(vector_array),
            Arc::new(StringArray::from_iter_values(texts)),
            Arc::new(StringArray::from(metadata_json)),
        ];

        RecordBatch::try_new(Self::create_schema(vector_dim)?, arrays)
            .map_err(|e| RagError::VectorStore(format!("Failed to create record batch: {}", e)))
    }

    /// Merge a batch into the table, replacing rows that share a chunk id
    async fn upsert_batch(table: &Table, batch: RecordBatch) -> Result<()> {
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);

        let mut merge = table.merge_insert(&[CHUNK_ID_COLUMN]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| RagError::VectorStore(format!("Failed to upsert records: {}", e)))?;

        Ok(())
    }

    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<RetrievedDocument>> {
        let texts = batch
            .column_by_name(TEXT_COLUMN)
            .ok_or_else(|| RagError::VectorStore("Missing text column".to_string()))?
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| RagError::VectorStore("Invalid text column type".to_string()))?;

        let distances = batch
            .column_by_name(DISTANCE_COLUMN)
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let documents = (0..batch.num_rows())
            .map(|row| {
                let distance =
                    distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });
                RetrievedDocument {
                    text: texts.value(row).to_string(),
                    // LanceDB reports 1 - cos for cosine and 1 - dot for dot
                    score: 1.0 - distance,
                }
            })
            .collect();

        Ok(documents)
    }

    /// Move a corrupted database directory out of the way
    fn attempt_corruption_recovery(db_path: &Path) -> Result<()> {
        warn!("Attempting database corruption recovery at {:?}", db_path);

        if db_path.exists() {
            let backup_path = db_path.with_extension("corrupted_backup");
            if let Err(e) = std::fs::rename(db_path, &backup_path) {
                error!("Failed to backup corrupted database: {}", e);
            } else {
                info!("Corrupted database backed up to {:?}", backup_path);
            }
        }

        if db_path.exists() {
            std::fs::remove_dir_all(db_path).map_err(|e| {
                RagError::VectorStore(format!("Failed to remove corrupted database: {}", e))
            })?;
        }

        Ok(())
    }
}

#[async_trait]
impl VectorStore for LanceDbVectorStore {
    #[inline]
    fn backend(&self) -> VectorStoreBackend {
        VectorStoreBackend::LanceDb
    }

    #[inline]
    async fn connect(&self) -> Result<()> {
        debug!("Connecting to LanceDB at {:?}", self.db_path);

        std::fs::create_dir_all(&self.db_path).map_err(|e| {
            RagError::VectorStore(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = self.db_path.to_string_lossy().into_owned();
        let connection = match lancedb::connect(&uri).execute().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to connect to LanceDB: {}", e);

                let error_msg = e.to_string().to_lowercase();
                if error_msg.contains("corrupt")
                    || error_msg.contains("invalid")
                    || error_msg.contains("malformed")
                {
                    warn!("Database corruption detected, attempting recovery");
                    Self::attempt_corruption_recovery(&self.db_path)?;
                    std::fs::create_dir_all(&self.db_path)?;

                    lancedb::connect(&uri).execute().await.map_err(|e| {
                        RagError::VectorStore(format!(
                            "Failed to connect to LanceDB after recovery: {}",
                            e
                        ))
                    })?
                } else {
                    return Err(RagError::VectorStore(format!(
                        "Failed to connect to LanceDB: {}",
                        e
                    )));
                }
            }
        };

        *self.connection.write().await = Some(connection);
        info!("Connected to LanceDB at {:?}", self.db_path);
        Ok(())
    }

    #[inline]
    async fn disconnect(&self) -> Result<()> {
        if self.connection.write().await.take().is_some() {
            debug!("Released LanceDB connection");
        }
        Ok(())
    }

    #[inline]
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let connection = self.connection().await?;
        let table_names = self.table_names(&connection).await?;
        Ok(table_names.iter().any(|table| table == name))
    }

    #[inline]
    async fn list_collections(&self) -> Result<Vec<String>> {
        let connection = self.connection().await?;
        let mut names: Vec<String> = self
            .table_names(&connection)
            .await?
            .into_iter()
            .filter(|table| table.starts_with(COLLECTION_PREFIX))
            .collect();
        names.sort_unstable();
        Ok(names)
    }

    #[inline]
    async fn get_collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        if !is_valid_collection_name(name) || !self.collection_exists(name).await? {
            return Ok(None);
        }

        let connection = self.connection().await?;
        let table = self.open_table(&connection, name).await?;

        let record_count = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::VectorStore(format!("Failed to count rows: {}", e)))?;
        let version = table
            .version()
            .await
            .map_err(|e| RagError::VectorStore(format!("Failed to read table version: {}", e)))?;
        let indices: Vec<String> = table
            .list_indices()
            .await
            .map_err(|e| RagError::VectorStore(format!("Failed to list indices: {}", e)))?
            .into_iter()
            .map(|index| index.name)
            .collect();

        Ok(Some(CollectionInfo {
            name: name.to_string(),
            backend: VectorStoreBackend::LanceDb,
            dimension: Self::table_dimension(&table).await?,
            record_count: record_count as u64,
            details: json!({
                "path": self.db_path.join(format!("{}.lance", name)),
                "version": version,
                "distance_method": self.distance_method,
                "indices": indices,
            }),
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
        let schema = Self::create_schema(embedding_size)?;

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
        let connection = self.connection().await?;
        match connection
            .create_empty_table(name, schema)
            .execute()
            .await
        {
            Ok(_) => Ok(true),
            Err(lancedb::Error::TableAlreadyExists { .. }) => {
                debug!("Collection {} was created concurrently", name);
                Ok(false)
            }
            Err(e) => Err(RagError::VectorStore(format!(
                "Failed to create table {}: {}",
                name, e
            ))),
        }
    }

    #[inline]
    async fn delete_collection(&self, name: &str) -> Result<bool> {
        if !is_valid_collection_name(name) || !self.collection_exists(name).await? {
            return Ok(false);
        }

        info!("Deleting collection: {}", name);
        let connection = self.connection().await?;
        connection
            .drop_table(name)
            .await
            .map_err(|e| RagError::VectorStore(format!("Failed to drop table {}: {}", name, e)))?;
        Ok(true)
    }

    #[inline]
    async fn delete_vector_index(&self, name: &str) -> Result<()> {
        debug!("LanceDB manages indexing for {} itself", name);
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

        let connection = self.connection().await?;
        let table = self.open_table(&connection, name).await?;
        let Some(dimension) = Self::table_dimension(&table).await? else {
            error!("Collection {} has no vector column", name);
            return Ok(false);
        };

        if let Err(rejection) = check_insert_batch(texts, vectors, record_ids, metadatas, dimension)
        {
            error!("Refusing insert into {}: {}", name, rejection);
            return Ok(false);
        }

        let batch_size = batch_size.max(1);
        for start in (0..texts.len()).step_by(batch_size) {
            let end = (start + batch_size).min(texts.len());
            let batch = Self::create_record_batch(
                dimension,
                &texts[start..end],
                &vectors[start..end],
                &record_ids[start..end],
                metadatas,
                start,
            )?;
            Self::upsert_batch(&table, batch).await?;
            debug!("Upserted records {}..{} into {}", start, end, name);
        }

        debug!("Stored {} records in {}", texts.len(), name);
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

        let connection = self.connection().await?;
        let table = self.open_table(&connection, name).await?;

        if Self::table_dimension(&table).await? != Some(vector.len()) {
            warn!(
                "Query vector with {} dimensions does not fit collection {}",
                vector.len(),
                name
            );
            return Ok(None);
        }

        let row_count = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::VectorStore(format!("Failed to count rows: {}", e)))?;
        if row_count == 0 || limit == 0 {
            return Ok(Some(Vec::new()));
        }

        debug!("Searching {} with limit {}", name, limit);
        let results = table
            .vector_search(vector)
            .map_err(|e| RagError::VectorStore(format!("Failed to create vector search: {}", e)))?
            .column(VECTOR_COLUMN)
            .distance_type(self.distance_type())
            .limit(limit)
            .execute()
            .await
            .map_err(|e| RagError::VectorStore(format!("Failed to execute search: {}", e)))?;

        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .map_err(|e| RagError::VectorStore(format!("Failed to read result stream: {}", e)))?;

        let mut documents = Vec::new();
        for batch in &batches {
            documents.extend(Self::parse_search_batch(batch)?);
        }
        documents.sort_by(|a, b| b.score.total_cmp(&a.score));
        documents.truncate(limit);

        debug!("Found {} documents in {}", documents.len(), name);
        Ok(Some(documents))
    }
}
