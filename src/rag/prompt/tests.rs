use super::*;
use crate::templates::{Template, TemplateRegistry};
use std::sync::Arc;

fn parser() -> TemplateParser {
    TemplateParser::new(Arc::new(TemplateRegistry::builtin()), "en", "en")
}

fn document(text: &str, score: f32) -> RetrievedDocument {
    RetrievedDocument {
        text: text.to_string(),
        score,
    }
}

#[test]
fn documents_are_numbered_and_joined() {
    let documents = vec![document("First fact.", 0.9), document("Second fact.", 0.8)];
    let prompt = build_prompt(&parser(), &documents, "What facts?", 1000).expect("should build");

    assert_eq!(
        prompt.full_prompt,
        "## Document Number: 1\n### Content: First fact.\n\n\
         ## Document Number: 2\n### Content: Second fact.\n\n\
         Based only on the above documents, please generate an answer for the user.\n\
         ## Question:\nWhat facts?\n\n## Answer: "
    );
    assert!(prompt.system_prompt.starts_with("You are an assistant"));
}

#[test]
fn document_text_is_trimmed_and_truncated() {
    let documents = vec![document("   abcdefghij   ", 0.5)];
    let prompt = build_prompt(&parser(), &documents, "q", 4).expect("should build");
    assert!(prompt.full_prompt.starts_with("## Document Number: 1\n### Content: abcd\n\n"));
}

#[test]
fn dollar_signs_in_documents_are_kept() {
    let documents = vec![document("costs $5 or ${price}", 0.5)];
    let prompt = build_prompt(&parser(), &documents, "how much $?", 100).expect("should build");
    assert!(prompt.full_prompt.contains("costs $5 or ${price}"));
    assert!(prompt.full_prompt.contains("how much $?"));
}

#[test]
fn missing_template_fails_the_answer() {
    let mut registry = TemplateRegistry::default();
    registry.insert("en", RAG_GROUP, SYSTEM_PROMPT_KEY, Template::new("system"));
    let templates = TemplateParser::new(Arc::new(registry), "en", "en");

    let result = build_prompt(&templates, &[document("text", 1.0)], "q", 100);
    assert!(matches!(result, Err(PipelineError::AnswerFailed(_))));
}

#[test]
fn broken_template_is_a_backend_error() {
    let mut registry = TemplateRegistry::builtin();
    registry.insert(
        "en",
        RAG_GROUP,
        FOOTER_PROMPT_KEY,
        Template::new("Question: $query from $user"),
    );
    let templates = TemplateParser::new(Arc::new(registry), "en", "en");

    let result = build_prompt(&templates, &[document("text", 1.0)], "q", 100);
    assert!(matches!(
        result,
        Err(PipelineError::Backend {
            operation: Operation::Prompt,
            ..
        })
    ));
}
