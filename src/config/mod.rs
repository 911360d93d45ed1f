// Configuration management module
// TOML settings under the base directory plus a console summary

pub mod settings;


use anyhow::{Context, Result};
use console::style;
use url::Url;

pub use settings::{
    Config, ConfigError, IndexingConfig, OllamaConfig, PostgresConfig, TemplatesConfig,
    VectorDbConfig,
};

/// Write a default `config.toml` unless one already exists, returning whether it was written
#[inline]
pub fn init_config(config: &Config) -> Result<bool> {
    let config_path = config.config_file_path();
    if config_path.exists() {
        return Ok(false);
    }

    config
        .save()
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    Ok(true)
}

/// Connection URL with any password replaced
#[inline]
pub fn redact_database_url(database_url: &str) -> String {
    match Url::parse(database_url) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("****")).is_err() {
                return database_url.to_string();
            }
            url.to_string()
        }
        _ => database_url.to_string(),
    }
}

#[inline]
pub fn show_config(config: &Config) {
    eprintln!("{}", style("Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Vector Store:").bold().yellow());
    eprintln!("  Backend: {}", style(config.vector_db.backend).cyan());
    eprintln!(
        "  Distance: {}",
        style(config.vector_db.distance_method).cyan()
    );
    eprintln!(
        "  LanceDB Path: {}",
        style(config.vector_database_path().display()).cyan()
    );
    eprintln!(
        "  Index: {} above {} records",
        style(config.vector_db.index_type).cyan(),
        style(config.vector_db.index_threshold).cyan()
    );

    eprintln!();
    eprintln!("{}", style("PostgreSQL:").bold().yellow());
    eprintln!(
        "  URL: {}",
        style(redact_database_url(&config.postgres.url)).cyan()
    );
    eprintln!(
        "  Max Connections: {}",
        style(config.postgres.max_connections).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    match config.ollama_url() {
        Ok(url) => eprintln!("  URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!(
        "  Embedding Model: {} ({} dimensions)",
        style(&config.ollama.embedding_model).cyan(),
        style(config.ollama.embedding_dimension).cyan()
    );
    eprintln!(
        "  Generation Model: {}",
        style(&config.ollama.generation_model).cyan()
    );
    eprintln!(
        "  Temperature: {}",
        style(config.ollama.temperature).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!(
        "  Language: {} (default {})",
        style(&config.templates.language).cyan(),
        style(&config.templates.default_language).cyan()
    );
    eprintln!(
        "  Page Size: {}",
        style(config.indexing.page_size).cyan()
    );
    eprintln!(
        "  Insert Batch Size: {}",
        style(config.indexing.insert_batch_size).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
}
