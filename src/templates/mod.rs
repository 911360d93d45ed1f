//! Locale-aware prompt templates
//!
//! Templates use `$name` or `${name}` placeholders and `$$` for a literal dollar sign.
//! Built-in locales are compiled in; more can be loaded from
//! `<dir>/<locale>/<group>.toml`, where each file is a flat table of
//! `key = "template"` entries.


pub mod locales;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use fancy_regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

pub const RAG_GROUP: &str = "rag";
pub const SYSTEM_PROMPT_KEY: &str = "system_prompt";
pub const DOCUMENT_PROMPT_KEY: &str = "document_prompt";
pub const FOOTER_PROMPT_KEY: &str = "footer_prompt";

static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\$(?:(?P<escaped>\$)|(?P<named>[_a-zA-Z][_a-zA-Z0-9]*)|\{(?P<braced>[_a-zA-Z][_a-zA-Z0-9]*)\}|(?P<invalid>))",
    )
    .expect("valid regex")
});

/// Values substituted into a template, keyed by placeholder name
pub type TemplateVars<'a> = HashMap<&'a str, String>;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("No value supplied for placeholder ${0}")]
    MissingVariable(String),
    #[error("Invalid placeholder at byte {position}")]
    InvalidPlaceholder { position: usize },
    #[error("Failed to read templates from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse templates in {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
}

impl Template {
    #[inline]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Replace every placeholder; a placeholder without a value is an error
    #[inline]
    pub fn substitute(&self, vars: &TemplateVars<'_>) -> Result<String, TemplateError> {
        let mut output = String::with_capacity(self.source.len());
        let mut last = 0;

        for captures in PLACEHOLDER_REGEX.captures_iter(&self.source) {
            let captures = captures.map_err(|_| TemplateError::InvalidPlaceholder {
                position: last,
            })?;
            let Some(whole) = captures.get(0) else {
                continue;
            };

            output.push_str(self.source.get(last..whole.start()).unwrap_or_default());

            if captures.name("escaped").is_some() {
                output.push('$');
            } else if let Some(name) = captures.name("named").or_else(|| captures.name("braced")) {
                let value = vars
                    .get(name.as_str())
                    .ok_or_else(|| TemplateError::MissingVariable(name.as_str().to_string()))?;
                output.push_str(value);
            } else {
                return Err(TemplateError::InvalidPlaceholder {
                    position: whole.start(),
                });
            }

            last = whole.end();
        }

        output.push_str(self.source.get(last..).unwrap_or_default());
        Ok(output)
    }
}

/// Templates of one group (`rag`, ...) in one locale
pub type TemplateGroup = BTreeMap<String, Template>;

/// Every known template, indexed by locale then group
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    locales: BTreeMap<String, BTreeMap<String, TemplateGroup>>,
}

impl TemplateRegistry {
    /// Registry holding the compiled-in `en` and `ar` locales
    #[inline]
    pub fn builtin() -> Self {
        let mut registry = Self::default();

        for (locale, system, document, footer) in [
            (
                "en",
                locales::en::SYSTEM_PROMPT,
                locales::en::DOCUMENT_PROMPT,
                locales::en::FOOTER_PROMPT,
            ),
            (
                "ar",
                locales::ar::SYSTEM_PROMPT,
                locales::ar::DOCUMENT_PROMPT,
                locales::ar::FOOTER_PROMPT,
            ),
        ] {
            registry.insert(locale, RAG_GROUP, SYSTEM_PROMPT_KEY, Template::new(system));
            registry.insert(locale, RAG_GROUP, DOCUMENT_PROMPT_KEY, Template::new(document));
            registry.insert(locale, RAG_GROUP, FOOTER_PROMPT_KEY, Template::new(footer));
        }

        registry
    }

    #[inline]
    pub fn insert(&mut self, locale: &str, group: &str, key: &str, template: Template) {
        self.locales
            .entry(locale.to_string())
            .or_default()
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), template);
    }

    #[inline]
    pub fn has_locale(&self, locale: &str) -> bool {
        self.locales.contains_key(locale)
    }

    #[inline]
    pub fn group(&self, locale: &str, group: &str) -> Option<&TemplateGroup> {
        self.locales.get(locale)?.get(group)
    }

    /// Load `<dir>/<locale>/<group>.toml` files, overriding built-in entries.
    /// Returns the number of templates loaded.
    #[inline]
    pub fn load_directory(&mut self, dir: &Path) -> Result<usize, TemplateError> {
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| TemplateError::Io { path, source }
        };

        let mut loaded = 0;
        for locale_entry in fs::read_dir(dir).map_err(io_error(dir))? {
            let locale_path = locale_entry.map_err(io_error(dir))?.path();
            if !locale_path.is_dir() {
                continue;
            }
            let Some(locale) = locale_path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let locale = locale.to_string();

            for group_entry in fs::read_dir(&locale_path).map_err(io_error(&locale_path))? {
                let group_path = group_entry.map_err(io_error(&locale_path))?.path();
                if group_path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
                    continue;
                }
                let Some(group) = group_path.file_stem().and_then(|stem| stem.to_str()) else {
                    continue;
                };
                let group = group.to_string();

                let content = fs::read_to_string(&group_path).map_err(io_error(&group_path))?;
                let table: toml::Table =
                    toml::from_str(&content).map_err(|e| TemplateError::Parse {
                        path: group_path.clone(),
                        message: e.to_string(),
                    })?;

                for (key, value) in table {
                    let Some(source) = value.as_str() else {
                        return Err(TemplateError::Parse {
                            path: group_path.clone(),
                            message: format!("value of {:?} is not a string", key),
                        });
                    };
                    self.insert(&locale, &group, &key, Template::new(source));
                    loaded += 1;
                }
                debug!("Loaded templates for {}/{}", locale, group);
            }
        }

        Ok(loaded)
    }
}

/// Resolves templates for an active language with fallback to a default one
#[derive(Debug, Clone)]
pub struct TemplateParser {
    registry: Arc<TemplateRegistry>,
    language: String,
    default_language: String,
}

impl TemplateParser {
    #[inline]
    pub fn new(registry: Arc<TemplateRegistry>, language: &str, default_language: &str) -> Self {
        let mut parser = Self {
            registry,
            language: default_language.to_string(),
            default_language: default_language.to_string(),
        };
        parser.set_language(language);
        parser
    }

    /// Switch language; unknown languages fall back to the default
    #[inline]
    pub fn set_language(&mut self, language: &str) {
        if self.registry.has_locale(language) {
            self.language = language.to_string();
        } else {
            if !language.is_empty() {
                warn!(
                    "No templates for language {:?}, using {:?}",
                    language, self.default_language
                );
            }
            self.language.clone_from(&self.default_language);
        }
    }

    #[inline]
    pub fn language(&self) -> &str {
        &self.language
    }

    fn lookup(&self, group: &str, key: &str) -> Option<&Template> {
        [&self.language, &self.default_language]
            .into_iter()
            .find_map(|locale| self.registry.group(locale, group)?.get(key))
    }

    /// Render `group.key` in the active language, then the default language.
    /// `Ok(None)` when neither defines it.
    #[inline]
    pub fn get(
        &self,
        group: &str,
        key: &str,
        vars: &TemplateVars<'_>,
    ) -> Result<Option<String>, TemplateError> {
        if group.is_empty() || key.is_empty() {
            return Ok(None);
        }

        self.lookup(group, key)
            .map(|template| template.substitute(vars))
            .transpose()
    }
}
