
use super::models::*;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

// Keeps a single INSERT well under PostgreSQL's 65535 bind parameter limit
const CHUNK_INSERT_BATCH: usize = 1000;

pub struct ProjectQueries;

impl ProjectQueries {
    #[inline]
    pub async fn create(pool: &PgPool) -> Result<Project> {
        let project = sqlx::query_as::<_, Project>(
            r"
            INSERT INTO projects (project_uuid, created_at)
            VALUES ($1, $2)
            RETURNING project_id, project_uuid, created_at, updated_at
            ",
        )
        .bind(Uuid::new_v4())
        .bind(Utc::now())
        .fetch_one(pool)
        .await
        .context("Failed to create project")?;

        Ok(project)
    }

    #[inline]
    pub async fn get_by_id(pool: &PgPool, project_id: i64) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(
            r"
            SELECT project_id, project_uuid, created_at, updated_at
            FROM projects WHERE project_id = $1
            ",
        )
        .bind(project_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get project by id")?;

        Ok(project)
    }

    /// Fetch a project, creating it under the requested id when absent
    #[inline]
    pub async fn get_or_create(pool: &PgPool, project_id: i64) -> Result<Project> {
        let project = sqlx::query_as::<_, Project>(
            r"
            INSERT INTO projects (project_id, project_uuid, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (project_id) DO UPDATE SET project_id = EXCLUDED.project_id
            RETURNING project_id, project_uuid, created_at, updated_at
            ",
        )
        .bind(project_id)
        .bind(Uuid::new_v4())
        .bind(Utc::now())
        .fetch_one(pool)
        .await
        .context("Failed to get or create project")?;

        // Explicit ids bypass the sequence; move it past them
        sqlx::query(
            r"
            SELECT setval(
                pg_get_serial_sequence('projects', 'project_id'),
                GREATEST((SELECT MAX(project_id) FROM projects), 1)
            )
            ",
        )
        .execute(pool)
        .await
        .context("Failed to advance project id sequence")?;

        Ok(project)
    }

    #[inline]
    pub async fn exists(pool: &PgPool, project_id: i64) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM projects WHERE project_id = $1)")
                .bind(project_id)
                .fetch_one(pool)
                .await
                .context("Failed to check project existence")?;

        Ok(exists)
    }
}

pub struct AssetQueries;

impl AssetQueries {
    #[inline]
    pub async fn create(pool: &PgPool, new_asset: NewAsset) -> Result<Asset> {
        let asset = sqlx::query_as::<_, Asset>(
            r"
            INSERT INTO assets (asset_uuid, asset_type, asset_name, asset_size,
                                asset_config, asset_project_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING asset_id, asset_uuid, asset_type, asset_name, asset_size,
                      asset_config, asset_project_id, created_at, updated_at
            ",
        )
        .bind(Uuid::new_v4())
        .bind(new_asset.asset_type)
        .bind(new_asset.asset_name)
        .bind(new_asset.asset_size)
        .bind(new_asset.asset_config)
        .bind(new_asset.asset_project_id)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
        .context("Failed to create asset")?;

        Ok(asset)
    }

    #[inline]
    pub async fn list_by_project(pool: &PgPool, project_id: i64) -> Result<Vec<Asset>> {
        let assets = sqlx::query_as::<_, Asset>(
            r"
            SELECT asset_id, asset_uuid, asset_type, asset_name, asset_size,
                   asset_config, asset_project_id, created_at, updated_at
            FROM assets WHERE asset_project_id = $1
            ORDER BY asset_id
            ",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await
        .context("Failed to list project assets")?;

        Ok(assets)
    }
}

pub struct ChunkQueries;

impl ChunkQueries {
    /// Insert chunks in multi-row statements, returning how many were written
    #[inline]
    pub async fn insert_many(pool: &PgPool, chunks: &[NewChunk]) -> Result<u64> {
        let mut inserted = 0;
        let mut tx = pool.begin().await.context("Failed to begin transaction")?;

        for batch in chunks.chunks(CHUNK_INSERT_BATCH) {
            let now = Utc::now();
            let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO chunks (chunk_uuid, chunk_text, chunk_metadata, chunk_order, \
                 chunk_project_id, chunk_asset_id, created_at) ",
            );
            builder.push_values(batch, |mut row, chunk| {
                row.push_bind(Uuid::new_v4())
                    .push_bind(&chunk.chunk_text)
                    .push_bind(&chunk.chunk_metadata)
                    .push_bind(chunk.chunk_order)
                    .push_bind(chunk.chunk_project_id)
                    .push_bind(chunk.chunk_asset_id)
                    .push_bind(now);
            });

            inserted += builder
                .build()
                .execute(&mut *tx)
                .await
                .context("Failed to insert chunks")?
                .rows_affected();
        }

        tx.commit().await.context("Failed to commit chunks")?;
        debug!("Inserted {} chunks", inserted);
        Ok(inserted)
    }

    /// 1-based page of a project's chunks ordered by chunk id
    #[inline]
    pub async fn get_project_page(
        pool: &PgPool,
        project_id: i64,
        page_number: u32,
        page_size: u32,
    ) -> Result<ChunkPage> {
        let total = Self::count_by_project(pool, project_id).await?;
        let total_pages = page_count(total, page_size);

        if page_number == 0 || page_size == 0 {
            return Ok(ChunkPage {
                chunks: Vec::new(),
                total_pages,
            });
        }

        let offset = i64::from(page_number - 1) * i64::from(page_size);
        let chunks = sqlx::query_as::<_, Chunk>(
            r"
            SELECT chunk_id, chunk_uuid, chunk_text, chunk_metadata, chunk_order,
                   chunk_project_id, chunk_asset_id, created_at, updated_at
            FROM chunks WHERE chunk_project_id = $1
            ORDER BY chunk_id
            LIMIT $2 OFFSET $3
            ",
        )
        .bind(project_id)
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(pool)
        .await
        .context("Failed to get project chunks")?;

        Ok(ChunkPage {
            chunks,
            total_pages,
        })
    }

    #[inline]
    pub async fn count_by_project(pool: &PgPool, project_id: i64) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE chunk_project_id = $1")
                .bind(project_id)
                .fetch_one(pool)
                .await
                .context("Failed to count project chunks")?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    #[inline]
    pub async fn delete_by_project(pool: &PgPool, project_id: i64) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM chunks WHERE chunk_project_id = $1")
            .bind(project_id)
            .execute(pool)
            .await
            .context("Failed to delete project chunks")?
            .rows_affected();

        Ok(deleted)
    }
}
