
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::RagError;
use crate::config::OllamaConfig;
use crate::llm::{
    ChatMessage, ChatRole, DocumentType, EmbeddingProvider, GenerationProvider, truncate_chars,
};

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Blocking Ollama HTTP client; async callers go through `spawn_blocking`
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    embedding_model: String,
    generation_model: String,
    embedding_dimension: usize,
    document_prefix: String,
    query_prefix: String,
    input_max_chars: usize,
    output_max_tokens: u32,
    temperature: f32,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            base_url,
            embedding_model: config.embedding_model.clone(),
            generation_model: config.generation_model.clone(),
            embedding_dimension: config.embedding_dimension as usize,
            document_prefix: config.document_prefix.clone(),
            query_prefix: config.query_prefix.clone(),
            input_max_chars: config.input_max_chars,
            output_max_tokens: config.output_max_tokens,
            temperature: config.temperature,
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    #[must_use]
    pub const fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Verify the server answers and both configured models are pulled
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models().context("Server ping failed")?;
        for model in [&self.embedding_model, &self.generation_model] {
            if !models.iter().any(|m| model_matches(&m.name, model)) {
                let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
                warn!(
                    "Model {} not found. Available models: {:?}",
                    model, available
                );
                return Err(anyhow::anyhow!(
                    "Model '{}' is not available. Available models: {:?}",
                    model,
                    available
                ));
            }
        }

        info!(
            "Health check passed for Ollama at {} ({} / {})",
            self.base_url, self.embedding_model, self.generation_model
        );
        Ok(())
    }

    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);
        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    fn prefix(&self, document_type: DocumentType) -> &str {
        match document_type {
            DocumentType::Document => &self.document_prefix,
            DocumentType::Query => &self.query_prefix,
        }
    }

    /// Embed `texts` in one `/api/embed` call
    #[inline]
    pub fn embed_batch(
        &self,
        texts: &[String],
        document_type: DocumentType,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Embedding {} texts as {:?} with {}",
            texts.len(),
            document_type,
            self.embedding_model
        );

        let prefix = self.prefix(document_type);
        let request = EmbedRequest {
            model: &self.embedding_model,
            input: texts
                .iter()
                .map(|text| format!("{}{}", prefix, truncate_chars(text, self.input_max_chars)))
                .collect(),
        };

        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate embeddings")?;

        let response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        if response.embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            ));
        }

        if let Some(vector) = response
            .embeddings
            .iter()
            .find(|vector| vector.len() != self.embedding_dimension)
        {
            return Err(anyhow::anyhow!(
                "Model {} returned {} dimensions, configured embedding dimension is {}",
                self.embedding_model,
                vector.len(),
                self.embedding_dimension
            ));
        }

        Ok(response.embeddings)
    }

    /// Run a non-streaming `/api/chat` exchange
    #[inline]
    pub fn chat(&self, messages: &[ChatMessage]) -> Result<Option<String>> {
        debug!(
            "Sending {} messages to {}",
            messages.len(),
            self.generation_model
        );

        let request = ChatRequest {
            model: &self.generation_model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
                num_predict: self.output_max_tokens,
            },
        };

        let url = self
            .base_url
            .join("/api/chat")
            .context("Failed to build chat URL")?;
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize chat request")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate text")?;

        let response: ChatResponse =
            serde_json::from_str(&response_text).context("Failed to parse chat response")?;

        Ok(response
            .message
            .map(|message| message.content)
            .filter(|content| !content.trim().is_empty()))
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => return Ok(response_text),
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) if *status >= 500 => {
                            warn!(
                                "Server error (status {}), attempt {}/{}",
                                status, attempt, self.retry_attempts
                            );
                            true
                        }
                        ureq::Error::StatusCode(status) => {
                            warn!("Client error (status {}), not retrying", status);
                            return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => false,
                    };

                    if !should_retry {
                        return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay = Duration::from_millis(
                            EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000,
                        );
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

// `nomic-embed-text` and `nomic-embed-text:latest` name the same model
fn model_matches(available: &str, wanted: &str) -> bool {
    available == wanted
        || available.strip_suffix(":latest") == Some(wanted)
        || wanted.strip_suffix(":latest") == Some(available)
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    #[inline]
    fn embedding_size(&self) -> usize {
        self.embedding_dimension
    }

    #[inline]
    async fn embed_text(
        &self,
        text: &str,
        document_type: DocumentType,
    ) -> crate::Result<Option<Vec<f32>>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let vectors = self.embed_texts(&[text.to_string()], document_type).await?;
        Ok(vectors.into_iter().next())
    }

    #[inline]
    async fn embed_texts(
        &self,
        texts: &[String],
        document_type: DocumentType,
    ) -> crate::Result<Vec<Vec<f32>>> {
        let client = self.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || client.embed_batch(&texts, document_type))
            .await
            .map_err(|e| RagError::Embedding(format!("Embedding task failed: {}", e)))?
            .map_err(|e| RagError::Embedding(format!("{:#}", e)))
    }
}

#[async_trait]
impl GenerationProvider for OllamaClient {
    #[inline]
    fn construct_message(&self, prompt: &str, role: ChatRole) -> ChatMessage {
        ChatMessage::new(role, truncate_chars(prompt, self.input_max_chars))
    }

    #[inline]
    async fn generate_text(
        &self,
        prompt: &str,
        chat_history: &[ChatMessage],
    ) -> crate::Result<Option<String>> {
        let mut messages = chat_history.to_vec();
        messages.push(self.construct_message(prompt, ChatRole::User));

        let client = self.clone();
        tokio::task::spawn_blocking(move || client.chat(&messages))
            .await
            .map_err(|e| RagError::Generation(format!("Generation task failed: {}", e)))?
            .map_err(|e| RagError::Generation(format!("{:#}", e)))
    }
}
