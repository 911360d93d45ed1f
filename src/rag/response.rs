// Outcome signals and payloads returned by the retrieval pipeline

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::RagError;
use crate::database::vector_store::{CollectionInfo, RetrievedDocument};
use crate::llm::ChatMessage;

/// Discriminant reported to callers for every pipeline outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseSignal {
    #[serde(rename = "project_not_found")]
    ProjectNotFound,
    #[serde(rename = "insert_into_vectordb_success")]
    InsertIntoVectorDbSuccess,
    #[serde(rename = "insert_into_vectordb_error")]
    InsertIntoVectorDbError,
    #[serde(rename = "vectordb_collection_retrieved")]
    CollectionRetrieved,
    #[serde(rename = "vectordb_collection_not_found")]
    CollectionNotFound,
    #[serde(rename = "vectordb_collection_reset")]
    CollectionReset,
    #[serde(rename = "vectordb_search_success")]
    SearchSuccess,
    #[serde(rename = "vectordb_search_error")]
    SearchError,
    #[serde(rename = "rag_answer_success")]
    RagAnswerSuccess,
    #[serde(rename = "rag_answer_error")]
    RagAnswerError,
    #[serde(rename = "backend_error")]
    BackendError,
}

impl ResponseSignal {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProjectNotFound => "project_not_found",
            Self::InsertIntoVectorDbSuccess => "insert_into_vectordb_success",
            Self::InsertIntoVectorDbError => "insert_into_vectordb_error",
            Self::CollectionRetrieved => "vectordb_collection_retrieved",
            Self::CollectionNotFound => "vectordb_collection_not_found",
            Self::CollectionReset => "vectordb_collection_reset",
            Self::SearchSuccess => "vectordb_search_success",
            Self::SearchError => "vectordb_search_error",
            Self::RagAnswerSuccess => "rag_answer_success",
            Self::RagAnswerError => "rag_answer_error",
            Self::BackendError => "backend_error",
        }
    }

    #[inline]
    pub const fn is_success(self) -> bool {
        matches!(
            self,
            Self::InsertIntoVectorDbSuccess
                | Self::CollectionRetrieved
                | Self::CollectionReset
                | Self::SearchSuccess
                | Self::RagAnswerSuccess
        )
    }
}

impl fmt::Display for ResponseSignal {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend step that failed unexpectedly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ProjectLookup,
    CreateCollection,
    DeleteVectorIndex,
    DeleteCollection,
    CollectionInfo,
    FetchChunks,
    Embedding,
    Insert,
    Search,
    Prompt,
    Generation,
}

impl fmt::Display for Operation {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::ProjectLookup => "project lookup",
            Self::CreateCollection => "collection creation",
            Self::DeleteVectorIndex => "vector index removal",
            Self::DeleteCollection => "collection removal",
            Self::CollectionInfo => "collection info",
            Self::FetchChunks => "chunk fetch",
            Self::Embedding => "embedding",
            Self::Insert => "vector insert",
            Self::Search => "vector search",
            Self::Prompt => "prompt assembly",
            Self::Generation => "generation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Project {0} not found")]
    ProjectNotFound(i64),

    #[error("Collection {0} not found")]
    CollectionNotFound(String),

    #[error("Inserting page {page} into {collection} failed")]
    InsertFailed { collection: String, page: u32 },

    #[error("Search in {0} returned no documents")]
    SearchFailed(String),

    #[error("No answer generated: {0}")]
    AnswerFailed(String),

    #[error("{operation} failed: {source}")]
    Backend {
        operation: Operation,
        #[source]
        source: RagError,
    },
}

impl PipelineError {
    #[inline]
    pub const fn signal(&self) -> ResponseSignal {
        match self {
            Self::ProjectNotFound(_) => ResponseSignal::ProjectNotFound,
            Self::CollectionNotFound(_) => ResponseSignal::CollectionNotFound,
            Self::InsertFailed { .. } => ResponseSignal::InsertIntoVectorDbError,
            Self::SearchFailed(_) => ResponseSignal::SearchError,
            Self::AnswerFailed(_) => ResponseSignal::RagAnswerError,
            Self::Backend { .. } => ResponseSignal::BackendError,
        }
    }

    /// Adapter for `map_err` at backend call sites
    #[inline]
    pub fn backend(operation: Operation) -> impl FnOnce(RagError) -> Self {
        move |source| Self::Backend { operation, source }
    }
}

/// Success payloads and the signal each one reports
pub trait Signaled {
    const SIGNAL: ResponseSignal;
}

/// Wire shape of a pipeline outcome: `{"signal": ..., <payload fields>}`
#[derive(Debug, Clone, Serialize)]
pub struct SignalResponse<T> {
    pub signal: ResponseSignal,
    #[serde(flatten)]
    pub payload: T,
}

impl<T: Signaled> From<T> for SignalResponse<T> {
    #[inline]
    fn from(payload: T) -> Self {
        Self {
            signal: T::SIGNAL,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub error: String,
}

impl From<&PipelineError> for SignalResponse<ErrorPayload> {
    #[inline]
    fn from(error: &PipelineError) -> Self {
        Self {
            signal: error.signal(),
            payload: ErrorPayload {
                error: error.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub inserted_count: u64,
    /// Non-empty pages processed; zero for an empty corpus
    pub total_pages: u32,
}

impl Signaled for IndexSummary {
    const SIGNAL: ResponseSignal = ResponseSignal::InsertIntoVectorDbSuccess;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionReport {
    pub collection_info: CollectionInfo,
}

impl Signaled for CollectionReport {
    const SIGNAL: ResponseSignal = ResponseSignal::CollectionRetrieved;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetSummary {
    pub collection: String,
    pub deleted: bool,
}

impl Signaled for ResetSummary {
    const SIGNAL: ResponseSignal = ResponseSignal::CollectionReset;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub results: Vec<RetrievedDocument>,
}

impl Signaled for SearchResults {
    const SIGNAL: ResponseSignal = ResponseSignal::SearchSuccess;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RagAnswer {
    pub answer: String,
    pub full_prompt: String,
    /// History as sent to the model, followed by the user turn
    pub chat_history: Vec<ChatMessage>,
}

impl Signaled for RagAnswer {
    const SIGNAL: ResponseSignal = ResponseSignal::RagAnswerSuccess;
}
