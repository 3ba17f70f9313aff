//! Keyword classification and extraction.
//!
//! One LLM call decides whether the latest user message concerns the
//! configured figure and, if so, which keywords to search the article
//! store with. The model is instructed to answer with JSON; replies are
//! stripped of Markdown code fences before parsing. Failures are typed
//! errors and the chat engine decides whether to degrade.

use std::sync::Arc;

use serde::Deserialize;

use crate::chat::prompts;
use crate::core::errors::ApiError;
use crate::llm::{ChatRequest, LlmProvider};
use crate::session::ChatTurn;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct KeywordAnalysis {
    #[serde(default)]
    pub is_about_figure: bool,
    #[serde(default)]
    pub keywords: Vec<String>,
}

pub struct KeywordExtractor {
    llm: Arc<dyn LlmProvider>,
    chat_model: String,
    persona_name: String,
}

impl KeywordExtractor {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        chat_model: impl Into<String>,
        persona_name: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            chat_model: chat_model.into(),
            persona_name: persona_name.into(),
        }
    }

    pub async fn extract(&self, history: &[ChatTurn]) -> Result<KeywordAnalysis, ApiError> {
        let rendered = prompts::render_history(history);
        let prompt = prompts::keyword_extraction(&self.persona_name, &rendered);
        let reply = self
            .llm
            .chat(ChatRequest::prompt(prompt), &self.chat_model)
            .await?;
        parse_analysis(&reply)
    }
}

pub(crate) fn parse_analysis(reply: &str) -> Result<KeywordAnalysis, ApiError> {
    let stripped = strip_code_fences(reply);
    serde_json::from_str(stripped)
        .map_err(|e| ApiError::Upstream(format!("keyword reply was not valid JSON: {e}")))
}

/// Removes a surrounding ```/```json fence if present; models add them
/// even when asked for bare JSON.
pub(crate) fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Paragraph-level keyword match: split on blank lines, keep paragraphs
/// containing the keyword, return at most `n`.
pub fn find_paragraphs_with_keyword(content: &str, keyword: &str, n: usize) -> Vec<String> {
    content
        .split("\n\n")
        .filter(|p| p.contains(keyword))
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .take(n)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        let analysis =
            parse_analysis(r#"{"is_about_figure": true, "keywords": ["press", "prison"]}"#)
                .unwrap();
        assert!(analysis.is_about_figure);
        assert_eq!(analysis.keywords, vec!["press", "prison"]);
    }

    #[test]
    fn parses_fenced_json() {
        let reply = "```json\n{\"is_about_figure\": false, \"keywords\": []}\n```";
        let analysis = parse_analysis(reply).unwrap();
        assert!(!analysis.is_about_figure);
        assert!(analysis.keywords.is_empty());
    }

    #[test]
    fn parses_plain_fence() {
        let reply = "```\n{\"is_about_figure\": true, \"keywords\": [\"weekly\"]}\n```";
        let analysis = parse_analysis(reply).unwrap();
        assert!(analysis.is_about_figure);
    }

    #[test]
    fn malformed_reply_is_an_error() {
        assert!(parse_analysis("I think the user is asking about history").is_err());
        assert!(parse_analysis("```json\nnot json\n```").is_err());
    }

    #[test]
    fn missing_fields_default() {
        let analysis = parse_analysis("{}").unwrap();
        assert_eq!(analysis, KeywordAnalysis::default());
    }

    #[test]
    fn paragraph_matching_caps_results() {
        let content = "press freedom matters\n\nunrelated\n\nthe press again\n\npress three\n\npress four";
        let paragraphs = find_paragraphs_with_keyword(content, "press", 3);
        assert_eq!(paragraphs.len(), 3);
        assert_eq!(paragraphs[0], "press freedom matters");
        assert!(paragraphs.iter().all(|p| p.contains("press")));
    }

    #[test]
    fn paragraph_matching_handles_no_hits() {
        let paragraphs = find_paragraphs_with_keyword("nothing here", "press", 5);
        assert!(paragraphs.is_empty());
    }
}
