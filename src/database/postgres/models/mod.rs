
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub project_id: i64,
    pub project_uuid: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Asset {
    pub asset_id: i64,
    pub asset_uuid: Uuid,
    pub asset_type: String,
    pub asset_name: String,
    pub asset_size: i64,
    pub asset_config: Option<Value>,
    pub asset_project_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAsset {
    pub asset_type: String,
    pub asset_name: String,
    pub asset_size: i64,
    pub asset_config: Option<Value>,
    pub asset_project_id: i64,
}

/// A unit of text produced by the upstream splitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Chunk {
    pub chunk_id: i64,
    pub chunk_uuid: Uuid,
    pub chunk_text: String,
    pub chunk_metadata: Value,
    pub chunk_order: i32,
    pub chunk_project_id: i64,
    pub chunk_asset_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChunk {
    pub chunk_text: String,
    pub chunk_metadata: Value,
    pub chunk_order: i32,
    pub chunk_project_id: i64,
    pub chunk_asset_id: i64,
}

impl NewChunk {
    #[inline]
    pub fn new(project_id: i64, asset_id: i64, order: i32, text: impl Into<String>) -> Self {
        Self {
            chunk_text: text.into(),
            chunk_metadata: Value::Object(serde_json::Map::new()),
            chunk_order: order,
            chunk_project_id: project_id,
            chunk_asset_id: asset_id,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.chunk_metadata = metadata;
        self
    }
}

/// One page of a project's chunks, ordered by chunk id
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChunkPage {
    pub chunks: Vec<Chunk>,
    pub total_pages: u32,
}

/// Number of pages needed to hold `total` items at `page_size` per page
#[inline]
pub fn page_count(total: u64, page_size: u32) -> u32 {
    if page_size == 0 {
        return 0;
    }
    u32::try_from(total.div_ceil(u64::from(page_size))).unwrap_or(u32::MAX)
}
