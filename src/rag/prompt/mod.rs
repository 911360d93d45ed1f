#[cfg(test)]
mod tests;

use itertools::Itertools;

use crate::database::vector_store::RetrievedDocument;
use crate::llm::truncate_chars;
use crate::rag::response::{Operation, PipelineError};
use crate::templates::{
    DOCUMENT_PROMPT_KEY, FOOTER_PROMPT_KEY, RAG_GROUP, SYSTEM_PROMPT_KEY, TemplateParser,
    TemplateVars,
};

/// Rendered prompts for one question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RagPrompt {
    pub system_prompt: String,
    pub full_prompt: String,
}

fn render(
    templates: &TemplateParser,
    key: &str,
    vars: &TemplateVars<'_>,
) -> Result<String, PipelineError> {
    templates
        .get(RAG_GROUP, key, vars)
        .map_err(|e| PipelineError::Backend {
            operation: Operation::Prompt,
            source: e.into(),
        })?
        .ok_or_else(|| {
            PipelineError::AnswerFailed(format!("template {}.{} is not defined", RAG_GROUP, key))
        })
}

/// Assemble the system prompt and the documents + question prompt.
///
/// Documents are numbered from 1, trimmed and cut to `max_document_chars`,
/// and separated by blank lines; the footer follows after one more blank line.
#[inline]
pub fn build_prompt(
    templates: &TemplateParser,
    documents: &[RetrievedDocument],
    query: &str,
    max_document_chars: usize,
) -> Result<RagPrompt, PipelineError> {
    let system_prompt = render(templates, SYSTEM_PROMPT_KEY, &TemplateVars::new())?;

    let documents_prompt = documents
        .iter()
        .enumerate()
        .map(|(index, document)| {
            let vars = TemplateVars::from([
                ("doc_num", (index + 1).to_string()),
                (
                    "chunk_text",
                    truncate_chars(&document.text, max_document_chars),
                ),
            ]);
            render(templates, DOCUMENT_PROMPT_KEY, &vars)
        })
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .join("\n\n");

    let footer_prompt = render(
        templates,
        FOOTER_PROMPT_KEY,
        &TemplateVars::from([("query", query.to_string())]),
    )?;

    Ok(RagPrompt {
        system_prompt,
        full_prompt: format!("{}\n\n{}", documents_prompt, footer_prompt),
    })
}
