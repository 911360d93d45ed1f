use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info};

use crate::RagError;
use crate::database::ChunkStore;
use crate::database::postgres::models::{Asset, ChunkPage, NewAsset, NewChunk, Project};
use crate::database::postgres::queries::{AssetQueries, ChunkQueries, ProjectQueries};


pub mod models;
pub mod queries;

/// Application database holding projects, assets and chunks
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[inline]
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/postgres/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // Project operations
    #[inline]
    pub async fn create_project(&self) -> Result<Project> {
        ProjectQueries::create(&self.pool).await
    }

    #[inline]
    pub async fn get_or_create_project(&self, project_id: i64) -> Result<Project> {
        ProjectQueries::get_or_create(&self.pool, project_id).await
    }

    #[inline]
    pub async fn get_project(&self, project_id: i64) -> Result<Option<Project>> {
        ProjectQueries::get_by_id(&self.pool, project_id).await
    }

    // Asset operations
    #[inline]
    pub async fn create_asset(&self, asset: NewAsset) -> Result<Asset> {
        AssetQueries::create(&self.pool, asset).await
    }

    #[inline]
    pub async fn get_project_assets(&self, project_id: i64) -> Result<Vec<Asset>> {
        AssetQueries::list_by_project(&self.pool, project_id).await
    }

    // Chunk operations
    #[inline]
    pub async fn insert_chunks(&self, chunks: &[NewChunk]) -> Result<u64> {
        ChunkQueries::insert_many(&self.pool, chunks).await
    }
}

fn database_error(error: &anyhow::Error) -> RagError {
    RagError::Database(format!("{:#}", error))
}

#[async_trait]
impl ChunkStore for Database {
    #[inline]
    async fn project_exists(&self, project_id: i64) -> crate::Result<bool> {
        ProjectQueries::exists(&self.pool, project_id)
            .await
            .map_err(|e| database_error(&e))
    }

    #[inline]
    async fn get_project_chunks(
        &self,
        project_id: i64,
        page_number: u32,
        page_size: u32,
    ) -> crate::Result<ChunkPage> {
        ChunkQueries::get_project_page(&self.pool, project_id, page_number, page_size)
            .await
            .map_err(|e| database_error(&e))
    }

    #[inline]
    async fn get_total_chunks_count(&self, project_id: i64) -> crate::Result<u64> {
        ChunkQueries::count_by_project(&self.pool, project_id)
            .await
            .map_err(|e| database_error(&e))
    }

    #[inline]
    async fn delete_chunks_by_project_id(&self, project_id: i64) -> crate::Result<u64> {
        ChunkQueries::delete_by_project(&self.pool, project_id)
            .await
            .map_err(|e| database_error(&e))
    }
}
