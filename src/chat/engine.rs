//! The chat turn handler.
//!
//! One parameterized engine serves every chat route. Per-request behavior
//! is selected through `ChatOptions` (the `func_control` map on the
//! wire): keyword matching, vector retrieval, and speech synthesis can
//! each be toggled.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::chat::keywords::KeywordExtractor;
use crate::chat::prompts;
use crate::core::errors::ApiError;
use crate::index::Retriever;
use crate::llm::{ChatRequest, LlmProvider};
use crate::session::{ChatTurn, SessionPool};

/// Per-request behavior toggles, deserialized from the `func_control`
/// query parameter when present.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatOptions {
    pub keyword_matching: bool,
    pub vector_search: bool,
    pub synthesize_speech: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        ChatOptions {
            keyword_matching: true,
            vector_search: true,
            synthesize_speech: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Persona {
    pub name: String,
    pub description: String,
}

/// Source of keyword-matched passages (the article store in production,
/// a stub in tests).
#[async_trait]
pub trait ParagraphSource: Send + Sync {
    async fn paragraphs_for(&self, keyword: &str, limit: usize) -> Result<Vec<String>, ApiError>;
}

pub struct ChatEngine {
    llm: Arc<dyn LlmProvider>,
    chat_model: String,
    retriever: Arc<Retriever>,
    keywords: KeywordExtractor,
    articles: Arc<dyn ParagraphSource>,
    sessions: SessionPool,
    persona: Persona,
    paragraphs_per_keyword: usize,
}

impl ChatEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        chat_model: impl Into<String>,
        retriever: Arc<Retriever>,
        articles: Arc<dyn ParagraphSource>,
        sessions: SessionPool,
        persona: Persona,
        paragraphs_per_keyword: usize,
    ) -> Self {
        let chat_model = chat_model.into();
        let keywords = KeywordExtractor::new(llm.clone(), chat_model.clone(), persona.name.clone());
        Self {
            llm,
            chat_model,
            retriever,
            keywords,
            articles,
            sessions,
            persona,
            paragraphs_per_keyword,
        }
    }

    pub fn sessions(&self) -> &SessionPool {
        &self.sessions
    }

    /// Runs one chat turn: append the user message, gather optional
    /// keyword passages and retrieved context, call the model once, append
    /// and return the reply.
    ///
    /// Keyword and retrieval failures degrade to empty prompt fragments
    /// (logged); a failure of the chat completion itself propagates.
    pub async fn process_turn(
        &self,
        user_id: &str,
        session_id: &str,
        user_msg: &str,
        options: &ChatOptions,
    ) -> Result<String, ApiError> {
        self.sessions
            .append(user_id, session_id, ChatTurn::user(user_msg))
            .await;
        let history = self
            .sessions
            .snapshot(user_id, session_id)
            .await
            .unwrap_or_default();

        let keyword_fragment = if options.keyword_matching {
            self.keyword_fragment(&history).await
        } else {
            String::new()
        };

        let context = if options.vector_search {
            match self.retriever.get_relevant_context(user_msg).await {
                Ok(context) => context,
                Err(err) => {
                    tracing::warn!("Context retrieval failed: {}", err);
                    String::new()
                }
            }
        } else {
            String::new()
        };

        let prompt = prompts::persona_answer(
            &self.persona.name,
            &self.persona.description,
            &prompts::render_history(&history),
            user_msg,
            &keyword_fragment,
            &context,
        );

        let reply = self
            .llm
            .chat(ChatRequest::prompt(prompt), &self.chat_model)
            .await?;

        self.sessions
            .append(user_id, session_id, ChatTurn::assistant(reply.clone()))
            .await;

        Ok(reply)
    }

    async fn keyword_fragment(&self, history: &[ChatTurn]) -> String {
        let analysis = match self.keywords.extract(history).await {
            Ok(analysis) => analysis,
            Err(err) => {
                tracing::warn!("Keyword extraction failed: {}", err);
                return String::new();
            }
        };

        if !analysis.is_about_figure || analysis.keywords.is_empty() {
            return String::new();
        }

        let mut pairs = Vec::with_capacity(analysis.keywords.len());
        for keyword in &analysis.keywords {
            match self
                .articles
                .paragraphs_for(keyword, self.paragraphs_per_keyword)
                .await
            {
                Ok(paragraphs) => pairs.push((keyword.clone(), paragraphs)),
                Err(err) => {
                    tracing::warn!("Passage lookup for '{}' failed: {}", keyword, err);
                }
            }
        }

        prompts::keyword_fragment(&pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{ChunkIndex, SummaryIndex};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted provider: keyword prompts get a canned JSON verdict,
    /// everything else gets a fixed reply.
    struct ScriptedLlm {
        keyword_reply: String,
        chat_reply: Result<String, ()>,
        chat_calls: AtomicUsize,
    }

    impl ScriptedLlm {
        fn new(keyword_reply: &str, chat_reply: Result<&str, ()>) -> Self {
            Self {
                keyword_reply: keyword_reply.to_string(),
                chat_reply: chat_reply.map(|s| s.to_string()),
                chat_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(&self, request: ChatRequest, _model: &str) -> Result<String, ApiError> {
            self.chat_calls.fetch_add(1, Ordering::SeqCst);
            let prompt = &request.messages.last().unwrap().content;
            if prompt.contains("is_about_figure") {
                return Ok(self.keyword_reply.clone());
            }
            self.chat_reply
                .clone()
                .map_err(|_| ApiError::Upstream("model unavailable".to_string()))
        }

        async fn embed(&self, inputs: &[String], _model: &str) -> Result<Vec<Vec<f32>>, ApiError> {
            Ok(inputs.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct StubArticles(Vec<String>);

    #[async_trait]
    impl ParagraphSource for StubArticles {
        async fn paragraphs_for(
            &self,
            _keyword: &str,
            limit: usize,
        ) -> Result<Vec<String>, ApiError> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    fn engine_with(llm: Arc<ScriptedLlm>, articles: Vec<String>) -> ChatEngine {
        let retriever = Arc::new(Retriever::new(
            llm.clone(),
            "embed-v1",
            ChunkIndex::default(),
            SummaryIndex::default(),
            3,
            5,
        ));
        ChatEngine::new(
            llm,
            "chat-model",
            retriever,
            Arc::new(StubArticles(articles)),
            SessionPool::new(),
            Persona {
                name: "Zou Taofen".to_string(),
                description: "a publisher".to_string(),
            },
            5,
        )
    }

    #[tokio::test]
    async fn turn_appends_user_and_assistant_in_order() {
        let llm = Arc::new(ScriptedLlm::new(
            r#"{"is_about_figure": false, "keywords": []}"#,
            Ok("a measured reply"),
        ));
        let engine = engine_with(llm, Vec::new());

        let reply = engine
            .process_turn("u1", "s1", "hello", &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, "a measured reply");

        let turns = engine.sessions().snapshot("u1", "s1").await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], ChatTurn::user("hello"));
        assert_eq!(turns[1], ChatTurn::assistant("a measured reply"));
    }

    #[tokio::test]
    async fn keyword_matching_can_be_disabled() {
        let llm = Arc::new(ScriptedLlm::new("this would not parse", Ok("reply")));
        let engine = engine_with(llm.clone(), Vec::new());

        let options = ChatOptions {
            keyword_matching: false,
            vector_search: false,
            synthesize_speech: false,
        };
        engine
            .process_turn("u1", "s1", "hello", &options)
            .await
            .unwrap();

        // only the persona call went out, no keyword classification
        assert_eq!(llm.chat_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_keyword_reply_degrades_to_no_fragment() {
        let llm = Arc::new(ScriptedLlm::new("not json at all", Ok("still replies")));
        let engine = engine_with(llm, vec!["a passage".to_string()]);

        let reply = engine
            .process_turn("u1", "s1", "hello", &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, "still replies");
    }

    #[tokio::test]
    async fn chat_failure_propagates_as_error() {
        let llm = Arc::new(ScriptedLlm::new(
            r#"{"is_about_figure": false, "keywords": []}"#,
            Err(()),
        ));
        let engine = engine_with(llm, Vec::new());

        let err = engine
            .process_turn("u1", "s1", "hello", &ChatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Upstream(_)));

        // the user turn is already recorded; the reply never arrived
        let turns = engine.sessions().snapshot("u1", "s1").await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, crate::session::Role::User);
    }
}
