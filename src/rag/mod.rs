// Retrieval controller
// Keeps a project's chunk corpus indexed and answers questions from it


pub mod prompt;
pub mod response;

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::config::IndexingConfig;
use crate::database::ChunkStore;
use crate::database::vector_store::{COLLECTION_PREFIX, RetrievedDocument, VectorStore};
use crate::llm::{ChatRole, DocumentType, EmbeddingProvider, GenerationProvider};
use crate::templates::TemplateParser;

pub use prompt::{RagPrompt, build_prompt};
pub use response::{
    CollectionReport, IndexSummary, Operation, PipelineError, RagAnswer, ResetSummary,
    ResponseSignal, SearchResults, SignalResponse, Signaled,
};

/// Everything the controller talks to, built once at startup
pub struct RagContext {
    pub vector_store: Arc<dyn VectorStore>,
    pub chunk_store: Arc<dyn ChunkStore>,
    pub embedding: Arc<dyn EmbeddingProvider>,
    pub generation: Arc<dyn GenerationProvider>,
    pub templates: TemplateParser,
    pub settings: IndexingConfig,
}

impl RagContext {
    /// Release the vector store connection
    #[inline]
    pub async fn shutdown(&self) -> Result<()> {
        self.vector_store.disconnect().await
    }
}

/// Collection holding the vectors of `project_id` at `embedding_size` dimensions
#[inline]
pub fn collection_name(embedding_size: usize, project_id: i64) -> String {
    format!("{}{}_{}", COLLECTION_PREFIX, embedding_size, project_id)
}

pub struct RagController {
    context: RagContext,
}

impl RagController {
    #[inline]
    pub const fn new(context: RagContext) -> Self {
        Self { context }
    }

    #[inline]
    pub const fn context(&self) -> &RagContext {
        &self.context
    }

    #[inline]
    pub fn collection_name(&self, project_id: i64) -> String {
        collection_name(self.context.embedding.embedding_size(), project_id)
    }

    async fn require_project(&self, project_id: i64) -> std::result::Result<(), PipelineError> {
        let exists = self
            .context
            .chunk_store
            .project_exists(project_id)
            .await
            .map_err(PipelineError::backend(Operation::ProjectLookup))?;

        if exists {
            Ok(())
        } else {
            warn!("Project {} not found", project_id);
            Err(PipelineError::ProjectNotFound(project_id))
        }
    }

    fn progress_bar(total_chunks: u64) -> ProgressBar {
        if console::user_attended_stderr() {
            ProgressBar::new(total_chunks).with_style(
                ProgressStyle::with_template("{bar:40} [{pos}/{len}] Vector indexing {msg}")
                    .expect("style template is valid"),
            )
        } else {
            ProgressBar::hidden()
        }
    }

    /// Re-embed every chunk of `project_id` into its collection, page by page.
    ///
    /// The collection is created if absent (or recreated when `do_reset` is set)
    /// and its stale vector index is dropped first. Pages are fetched until one
    /// comes back empty. A refused insert aborts the run; pages inserted before
    /// it stay indexed.
    #[inline]
    pub async fn push_index(
        &self,
        project_id: i64,
        do_reset: bool,
    ) -> std::result::Result<IndexSummary, PipelineError> {
        self.require_project(project_id).await?;

        let context = &self.context;
        let collection = self.collection_name(project_id);
        let page_size = context.settings.page_size.max(1);

        let created = context
            .vector_store
            .create_collection(&collection, context.embedding.embedding_size(), do_reset)
            .await
            .map_err(PipelineError::backend(Operation::CreateCollection))?;
        debug!("Collection {} created: {}", collection, created);

        context
            .vector_store
            .delete_vector_index(&collection)
            .await
            .map_err(PipelineError::backend(Operation::DeleteVectorIndex))?;

        let total_chunks = context
            .chunk_store
            .get_total_chunks_count(project_id)
            .await
            .map_err(PipelineError::backend(Operation::FetchChunks))?;
        info!(
            "Indexing {} chunks of project {} into {}",
            total_chunks, project_id, collection
        );

        let bar = Self::progress_bar(total_chunks);
        let mut summary = IndexSummary {
            inserted_count: 0,
            total_pages: 0,
        };
        let mut page_number = 1;

        loop {
            let page = context
                .chunk_store
                .get_project_chunks(project_id, page_number, page_size)
                .await
                .map_err(PipelineError::backend(Operation::FetchChunks))?;
            if page.chunks.is_empty() {
                break;
            }

            let texts: Vec<String> = page.chunks.iter().map(|c| c.chunk_text.clone()).collect();
            let metadatas: Vec<Value> = page
                .chunks
                .iter()
                .map(|c| c.chunk_metadata.clone())
                .collect();
            let record_ids: Vec<i64> = page.chunks.iter().map(|c| c.chunk_id).collect();

            let vectors = context
                .embedding
                .embed_texts(&texts, DocumentType::Document)
                .await
                .map_err(PipelineError::backend(Operation::Embedding))?;

            let inserted = context
                .vector_store
                .insert_many(
                    &collection,
                    &texts,
                    &vectors,
                    &record_ids,
                    Some(&metadatas),
                    context.settings.insert_batch_size,
                )
                .await
                .map_err(PipelineError::backend(Operation::Insert))?;

            if !inserted {
                bar.abandon();
                error!(
                    "Insert of page {} into {} was refused",
                    page_number, collection
                );
                return Err(PipelineError::InsertFailed {
                    collection,
                    page: page_number,
                });
            }

            summary.inserted_count += texts.len() as u64;
            summary.total_pages += 1;
            bar.inc(texts.len() as u64);
            debug!(
                "Indexed page {} ({} chunks) into {}",
                page_number,
                texts.len(),
                collection
            );
            // The last page is known from the count, no trailing empty fetch
            if page_number >= page.total_pages {
                break;
            }
            page_number += 1;
        }

        bar.finish_and_clear();
        info!(
            "Indexed {} chunks in {} pages into {}",
            summary.inserted_count, summary.total_pages, collection
        );
        Ok(summary)
    }

    #[inline]
    pub async fn get_collection_info(
        &self,
        project_id: i64,
    ) -> std::result::Result<CollectionReport, PipelineError> {
        self.require_project(project_id).await?;

        let collection = self.collection_name(project_id);
        let info = self
            .context
            .vector_store
            .get_collection_info(&collection)
            .await
            .map_err(PipelineError::backend(Operation::CollectionInfo))?;

        info.map(|collection_info| CollectionReport { collection_info })
            .ok_or(PipelineError::CollectionNotFound(collection))
    }

    /// Drop the project's collection
    #[inline]
    pub async fn reset_collection(&self, project_id: i64) -> std::result::Result<ResetSummary, PipelineError> {
        self.require_project(project_id).await?;

        let collection = self.collection_name(project_id);
        let deleted = self
            .context
            .vector_store
            .delete_collection(&collection)
            .await
            .map_err(PipelineError::backend(Operation::DeleteCollection))?;

        info!("Reset collection {} (dropped: {})", collection, deleted);
        Ok(ResetSummary {
            collection,
            deleted,
        })
    }

    /// Top `limit` chunks for `text`, most similar first
    #[inline]
    pub async fn search(
        &self,
        project_id: i64,
        text: &str,
        limit: usize,
    ) -> std::result::Result<Vec<RetrievedDocument>, PipelineError> {
        self.require_project(project_id).await?;

        let collection = self.collection_name(project_id);
        let vector = self
            .context
            .embedding
            .embed_text(text, DocumentType::Query)
            .await
            .map_err(PipelineError::backend(Operation::Embedding))?;

        let Some(vector) = vector.filter(|v| !v.is_empty()) else {
            warn!("No embedding produced for query on {}", collection);
            return Err(PipelineError::SearchFailed(collection));
        };

        let results = self
            .context
            .vector_store
            .search_by_vector(&collection, &vector, limit)
            .await
            .map_err(PipelineError::backend(Operation::Search))?;

        match results {
            Some(documents) if !documents.is_empty() => {
                debug!("Retrieved {} documents from {}", documents.len(), collection);
                Ok(documents)
            }
            _ => Err(PipelineError::SearchFailed(collection)),
        }
    }

    /// Retrieve context for `query` and ask the generation model to answer it
    #[inline]
    pub async fn answer_question(
        &self,
        project_id: i64,
        query: &str,
        limit: usize,
    ) -> std::result::Result<RagAnswer, PipelineError> {
        let documents = match self.search(project_id, query, limit).await {
            Ok(documents) => documents,
            Err(PipelineError::SearchFailed(collection)) => {
                return Err(PipelineError::AnswerFailed(format!(
                    "no documents retrieved from {}",
                    collection
                )));
            }
            Err(e) => return Err(e),
        };

        let context = &self.context;
        let RagPrompt {
            system_prompt,
            full_prompt,
        } = build_prompt(
            &context.templates,
            &documents,
            query,
            context.settings.max_document_chars,
        )?;

        let mut chat_history = vec![
            context
                .generation
                .construct_message(&system_prompt, ChatRole::System),
        ];

        let answer = context
            .generation
            .generate_text(&full_prompt, &chat_history)
            .await
            .map_err(PipelineError::backend(Operation::Generation))?
            .ok_or_else(|| PipelineError::AnswerFailed("model returned no content".to_string()))?;

        chat_history.push(
            context
                .generation
                .construct_message(&full_prompt, ChatRole::User),
        );

        Ok(RagAnswer {
            answer,
            full_prompt,
            chat_history,
        })
    }
}
