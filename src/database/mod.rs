// Database module
// PostgreSQL holds projects and chunks; vectors live in LanceDB or pgvector

use async_trait::async_trait;

use crate::Result;
use crate::database::postgres::models::ChunkPage;

pub mod lancedb;
pub mod pgvector;
pub mod postgres;
pub mod vector_store;

pub use postgres::Database;
pub use vector_store::{VectorStore, create_vector_store};

/// Read/delete access to a project's chunk corpus
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn project_exists(&self, project_id: i64) -> Result<bool>;

    /// 1-based page of chunks ordered by chunk id, with the total page count
    async fn get_project_chunks(
        &self,
        project_id: i64,
        page_number: u32,
        page_size: u32,
    ) -> Result<ChunkPage>;

    async fn get_total_chunks_count(&self, project_id: i64) -> Result<u64>;

    async fn delete_chunks_by_project_id(&self, project_id: i64) -> Result<u64>;
}
