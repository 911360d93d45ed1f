use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{Config, init_config, show_config};
use crate::database::postgres::models::{NewAsset, NewChunk};
use crate::database::{ChunkStore, Database, create_vector_store};
use crate::llm::{EmbeddingProvider, OllamaClient};
use crate::rag::response::ErrorPayload;
use crate::rag::{
    PipelineError, RagContext, RagController, ResponseSignal, SearchResults, SignalResponse,
    Signaled,
};
use crate::templates::{TemplateParser, TemplateRegistry};

/// Default upper bound for chunks produced by `ingest`
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Open connections for one command and hand back a controller over them
pub struct Session {
    database: Database,
    controller: RagController,
}

impl Session {
    #[inline]
    pub async fn open(config: &Config) -> Result<Self> {
        let database = Database::new(&config.postgres.url, config.postgres.max_connections)
            .await
            .context("Failed to initialize database")?;
        let context = build_context(config, &database).await?;

        Ok(Self {
            database,
            controller: RagController::new(context),
        })
    }

    #[inline]
    pub const fn controller(&self) -> &RagController {
        &self.controller
    }

    #[inline]
    pub async fn close(self) -> Result<()> {
        self.controller
            .context()
            .shutdown()
            .await
            .context("Failed to disconnect vector store")?;
        self.database.close().await;
        Ok(())
    }
}

/// Wire the vector store, Ollama client and templates around `database`
#[inline]
pub async fn build_context(config: &Config, database: &Database) -> Result<RagContext> {
    let vector_store = create_vector_store(config, database.pool())?;
    vector_store
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {} vector store", vector_store.backend()))?;

    let ollama = OllamaClient::new(&config.ollama)?;
    let health = ollama.clone();
    match tokio::task::spawn_blocking(move || health.health_check()).await {
        Ok(Ok(())) => info!("Ollama is reachable"),
        Ok(Err(e)) => warn!("Ollama health check failed: {:#}", e),
        Err(e) => warn!("Ollama health check did not complete: {}", e),
    }
    let ollama = Arc::new(ollama);

    let mut registry = TemplateRegistry::builtin();
    if let Some(directory) = config.templates_path() {
        if directory.is_dir() {
            let loaded = registry.load_directory(&directory).with_context(|| {
                format!("Failed to load templates from {}", directory.display())
            })?;
            info!("Loaded {} templates from {}", loaded, directory.display());
        } else {
            warn!("Template directory {} does not exist", directory.display());
        }
    }
    let templates = TemplateParser::new(
        Arc::new(registry),
        &config.templates.language,
        &config.templates.default_language,
    );

    Ok(RagContext {
        vector_store,
        chunk_store: Arc::new(database.clone()),
        embedding: Arc::clone(&ollama) as Arc<dyn EmbeddingProvider>,
        generation: ollama,
        templates,
        settings: config.indexing,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize response")?
    );
    Ok(())
}

/// Print a controller outcome as `{"signal": ..., ...}` and return its signal
fn report<T: Signaled + Serialize>(outcome: Result<T, PipelineError>) -> Result<ResponseSignal> {
    match outcome {
        Ok(payload) => {
            let response = SignalResponse::<T>::from(payload);
            print_json(&response)?;
            Ok(response.signal)
        }
        Err(e) => {
            error!("{}", e);
            let response: SignalResponse<ErrorPayload> = SignalResponse::from(&e);
            print_json(&response)?;
            Ok(response.signal)
        }
    }
}

/// Show the effective configuration, or write a default config file
#[inline]
pub fn configure(config: &Config, show: bool) -> Result<()> {
    if show {
        show_config(config);
        return Ok(());
    }

    if init_config(config)? {
        println!("Wrote {}", config.config_file_path().display());
    } else {
        println!(
            "Config already exists at {}",
            config.config_file_path().display()
        );
    }
    Ok(())
}

/// Split `text` on blank lines, packing paragraphs into chunks of at most
/// `chunk_size` characters. Paragraphs longer than that are cut.
#[inline]
pub fn split_paragraphs(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    let paragraphs = text
        .split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty());

    for paragraph in paragraphs {
        let chars: Vec<char> = paragraph.chars().collect();
        for piece in chars.chunks(chunk_size) {
            let piece: String = piece.iter().collect();
            let piece_len = piece.chars().count();
            let current_len = current.chars().count();

            if current.is_empty() {
                current = piece;
            } else if current_len + 2 + piece_len <= chunk_size {
                current.push_str("\n\n");
                current.push_str(&piece);
            } else {
                chunks.push(std::mem::replace(&mut current, piece));
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Store `file` as an asset of `project_id` and its paragraphs as chunks
#[inline]
pub async fn ingest(config: &Config, project_id: i64, file: &Path, chunk_size: usize) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let asset_name = file
        .file_name()
        .map_or_else(|| file.display().to_string(), |name| name.to_string_lossy().into_owned());

    let database = Database::new(&config.postgres.url, config.postgres.max_connections)
        .await
        .context("Failed to initialize database")?;

    let project = database.get_or_create_project(project_id).await?;
    let asset = database
        .create_asset(NewAsset {
            asset_type: "file".to_string(),
            asset_name: asset_name.clone(),
            asset_size: i64::try_from(text.len()).unwrap_or(i64::MAX),
            asset_config: Some(json!({ "chunk_size": chunk_size })),
            asset_project_id: project.project_id,
        })
        .await?;

    let chunks: Vec<NewChunk> = split_paragraphs(&text, chunk_size)
        .into_iter()
        .enumerate()
        .map(|(order, chunk)| {
            let order = i32::try_from(order + 1).unwrap_or(i32::MAX);
            NewChunk::new(project.project_id, asset.asset_id, order, chunk)
                .with_metadata(json!({ "source": asset_name, "chunk_order": order }))
        })
        .collect();

    let inserted = database.insert_chunks(&chunks).await?;
    let total = database
        .get_total_chunks_count(project.project_id)
        .await
        .context("Failed to count chunks")?;
    database.close().await;

    info!(
        "Ingested {} chunks from {} into project {}",
        inserted, asset_name, project.project_id
    );
    print_json(&json!({
        "project_id": project.project_id,
        "asset_id": asset.asset_id,
        "inserted_chunks": inserted,
        "total_chunks": total,
    }))
}

#[inline]
pub async fn index(config: &Config, project_id: i64, reset: bool) -> Result<ResponseSignal> {
    let session = Session::open(config).await?;
    let signal = report(session.controller().push_index(project_id, reset).await);
    session.close().await?;
    signal
}

#[inline]
pub async fn collection_info(config: &Config, project_id: i64) -> Result<ResponseSignal> {
    let session = Session::open(config).await?;
    let signal = report(session.controller().get_collection_info(project_id).await);
    session.close().await?;
    signal
}

#[inline]
pub async fn search(
    config: &Config,
    project_id: i64,
    text: &str,
    limit: usize,
) -> Result<ResponseSignal> {
    let session = Session::open(config).await?;
    let outcome = session
        .controller()
        .search(project_id, text, limit)
        .await
        .map(|results| SearchResults { results });
    let signal = report(outcome);
    session.close().await?;
    signal
}

#[inline]
pub async fn answer(
    config: &Config,
    project_id: i64,
    text: &str,
    limit: usize,
) -> Result<ResponseSignal> {
    let session = Session::open(config).await?;
    let signal = report(
        session
            .controller()
            .answer_question(project_id, text, limit)
            .await,
    );
    session.close().await?;
    signal
}

#[inline]
pub async fn reset(config: &Config, project_id: i64) -> Result<ResponseSignal> {
    let session = Session::open(config).await?;
    let signal = report(session.controller().reset_collection(project_id).await);
    session.close().await?;
    signal
}

/// List every collection in the configured vector store
#[inline]
pub async fn collections(config: &Config) -> Result<()> {
    let session = Session::open(config).await?;
    let names = session
        .controller()
        .context()
        .vector_store
        .list_collections()
        .await
        .context("Failed to list collections")?;
    session.close().await?;

    print_json(&json!({ "collections": names }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_packs_small_paragraphs() {
        let text = "alpha\n\nbeta\n\n\n\ngamma";
        assert_eq!(split_paragraphs(text, 100), vec!["alpha\n\nbeta\n\ngamma"]);
    }

    #[test]
    fn split_starts_new_chunk_when_full() {
        let text = "aaaa\n\nbbbb\n\ncccc";
        assert_eq!(
            split_paragraphs(text, 10),
            vec!["aaaa\n\nbbbb".to_string(), "cccc".to_string()]
        );
    }

    #[test]
    fn split_cuts_long_paragraphs() {
        let chunks = split_paragraphs("abcdefghij", 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn split_counts_characters_not_bytes() {
        let chunks = split_paragraphs("مرحبا بالعالم", 5);
        assert_eq!(chunks[0], "مرحبا");
        assert!(chunks.iter().all(|c| c.chars().count() <= 5));
    }

    #[test]
    fn split_ignores_blank_input() {
        assert!(split_paragraphs("  \n\n \n\n", 10).is_empty());
    }
}
