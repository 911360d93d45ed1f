#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

/// Loading a config directory with custom template locales
use rag_index::config::{Config, init_config};
use rag_index::database::vector_store::{DistanceMethod, VectorStoreBackend};
use rag_index::templates::{
    FOOTER_PROMPT_KEY, RAG_GROUP, SYSTEM_PROMPT_KEY, TemplateParser, TemplateRegistry,
    TemplateVars,
};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

const CONFIG: &str = r#"
[vector_db]
backend = "pgvector"
distance_method = "dot"
index_threshold = 250
index_type = "ivfflat"

[templates]
language = "fr"
default_language = "en"
directory = "templates"

[indexing]
page_size = 20
"#;

#[test]
fn config_directory_with_templates() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(temp_dir.path().join("config.toml"), CONFIG).expect("should write config");

    let fr = temp_dir.path().join("templates").join("fr");
    fs::create_dir_all(&fr).expect("should create locale dir");
    fs::write(
        fr.join("rag.toml"),
        "system_prompt = \"Vous êtes un assistant.\"\n",
    )
    .expect("should write templates");

    let config = Config::load(temp_dir.path()).expect("should load config");
    assert_eq!(config.vector_db.backend, VectorStoreBackend::PgVector);
    assert_eq!(config.vector_db.distance_method, DistanceMethod::Dot);
    assert_eq!(config.vector_db.index_threshold, 250);
    assert_eq!(config.indexing.page_size, 20);
    assert_eq!(config.indexing.insert_batch_size, 50);
    assert_eq!(config.ollama.input_max_chars, 16000);

    let templates_dir = config.templates_path().expect("directory is configured");
    assert_eq!(templates_dir, temp_dir.path().join("templates"));

    let mut registry = TemplateRegistry::builtin();
    let loaded = registry
        .load_directory(&templates_dir)
        .expect("should load templates");
    assert_eq!(loaded, 1);

    let parser = TemplateParser::new(
        Arc::new(registry),
        &config.templates.language,
        &config.templates.default_language,
    );
    assert_eq!(parser.language(), "fr");

    let system = parser
        .get(RAG_GROUP, SYSTEM_PROMPT_KEY, &TemplateVars::new())
        .expect("should render")
        .expect("template exists");
    assert_eq!(system, "Vous êtes un assistant.");

    // Keys missing from the custom locale come from the default one
    let footer = parser
        .get(
            RAG_GROUP,
            FOOTER_PROMPT_KEY,
            &TemplateVars::from([("query", "Pourquoi ?".to_string())]),
        )
        .expect("should render")
        .expect("falls back to en");
    assert!(footer.ends_with("## Question:\nPourquoi ?\n\n## Answer: "));
}

#[test]
fn init_writes_defaults_once() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::load(temp_dir.path()).expect("defaults when absent");

    assert!(init_config(&config).expect("should write config"));
    assert!(!init_config(&config).expect("should keep existing config"));

    let reloaded = Config::load(temp_dir.path()).expect("should reload");
    assert_eq!(reloaded, config);
}

#[test]
fn invalid_page_size_is_rejected() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[indexing]\npage_size = 0\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}
