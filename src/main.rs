use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rag_index::commands::{
    DEFAULT_CHUNK_SIZE, answer, collection_info, collections, configure, index, ingest, reset,
    search,
};
use rag_index::config::Config;
use std::path::PathBuf;
use std::process::ExitCode;

const DEFAULT_LIMIT: usize = 5;

#[derive(Parser)]
#[command(name = "rag-index")]
#[command(about = "Index project chunks into a vector store and answer questions over them")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml (defaults to $RAG_INDEX_HOME or ~/.rag-index)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file, or show the current configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Split a text file into chunks and store them under a project
    Ingest {
        project_id: i64,
        file: PathBuf,
        /// Maximum characters per chunk
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },
    /// Embed every chunk of a project into its collection
    Index {
        project_id: i64,
        /// Drop and recreate the collection first
        #[arg(long)]
        reset: bool,
    },
    /// Show the collection backing a project
    Info { project_id: i64 },
    /// Retrieve the chunks most similar to a query
    Search {
        project_id: i64,
        text: String,
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },
    /// Answer a question from the project's indexed chunks
    Answer {
        project_id: i64,
        text: String,
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },
    /// List every collection in the vector store
    Collections,
    /// Drop the collection backing a project
    Reset { project_id: i64 },
}

fn load_config(config_dir: Option<PathBuf>) -> Result<Config> {
    let config_dir = match config_dir {
        Some(dir) => dir,
        None => Config::default_base_dir().context("Failed to resolve config directory")?,
    };
    Config::load(config_dir)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config_dir)?;

    let signal = match cli.command {
        Commands::Config { show } => {
            configure(&config, show)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Ingest {
            project_id,
            file,
            chunk_size,
        } => {
            ingest(&config, project_id, &file, chunk_size).await?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Collections => {
            collections(&config).await?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Index { project_id, reset } => index(&config, project_id, reset).await?,
        Commands::Info { project_id } => collection_info(&config, project_id).await?,
        Commands::Search {
            project_id,
            text,
            limit,
        } => search(&config, project_id, &text, limit).await?,
        Commands::Answer {
            project_id,
            text,
            limit,
        } => answer(&config, project_id, &text, limit).await?,
        Commands::Reset { project_id } => reset(&config, project_id).await?,
    };

    Ok(if signal.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
