use std::sync::Arc;

use crate::chat::{ChatEngine, Persona};
use crate::core::config::{AppPaths, Settings};
use crate::db::{ArticleParagraphs, Db};
use crate::index::{store, ChunkIndex, Retriever, SummaryIndex};
use crate::llm::{LlmProvider, OpenAiCompatProvider};
use crate::session::SessionPool;
use crate::speech::SpeechClient;

pub mod error;

use error::InitializationError;

/// Global application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub settings: Arc<Settings>,
    pub db: Db,
    pub sessions: SessionPool,
    pub llm: Arc<dyn LlmProvider>,
    pub chat: Arc<ChatEngine>,
    pub speech: Option<SpeechClient>,
}

impl AppState {
    /// Initializes paths, settings, the database pool and schema, the LLM
    /// client, the persisted retrieval indexes, and the chat engine.
    ///
    /// A missing or stale index is not fatal: the server starts with empty
    /// indexes (retrieval yields no context) so chat keeps working while
    /// the index is rebuilt offline.
    pub async fn initialize() -> Result<Arc<Self>, InitializationError> {
        let paths = Arc::new(AppPaths::new());
        let settings = Arc::new(
            Settings::load(&paths).map_err(|e| InitializationError::Config(e.into()))?,
        );

        let db = Db::connect(&settings.database_url)
            .await
            .map_err(|e| InitializationError::Database(e.into()))?;
        db.ensure_schema()
            .await
            .map_err(|e| InitializationError::Database(e.into()))?;

        let llm: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatProvider::new(
            settings.llm_base_url.clone(),
            settings.llm_api_key.clone(),
            settings.request_timeout_secs,
        ));

        let (chunks, summaries) = match store::load(&paths.index_dir, &settings.embed_model) {
            Ok(indexes) => indexes,
            Err(err) => {
                tracing::warn!(
                    "No usable index at {} ({}); starting with empty retrieval",
                    paths.index_dir.display(),
                    err
                );
                (ChunkIndex::default(), SummaryIndex::default())
            }
        };

        let tunables = &settings.tunables;
        let retriever = Arc::new(Retriever::new(
            llm.clone(),
            settings.embed_model.clone(),
            chunks,
            summaries,
            tunables.retrieval.k_summary,
            tunables.retrieval.k_chunks,
        ));

        let sessions = SessionPool::new();
        let articles = Arc::new(ArticleParagraphs::new(
            db.clone(),
            tunables.keywords.articles_per_keyword,
        ));

        let chat = Arc::new(ChatEngine::new(
            llm.clone(),
            settings.chat_model.clone(),
            retriever,
            articles,
            sessions.clone(),
            Persona {
                name: settings.persona_name.clone(),
                description: settings.persona_description.clone(),
            },
            tunables.keywords.paragraphs_per_keyword,
        ));

        let speech = settings.speech_api_key.as_ref().map(|key| {
            SpeechClient::new(
                settings.speech_base_url.clone(),
                key.clone(),
                settings.speech_voice.clone(),
                settings.request_timeout_secs,
            )
        });
        if speech.is_none() {
            tracing::warn!("FIGURA_SPEECH_API_KEY not set; speech endpoints will degrade");
        }

        Ok(Arc::new(AppState {
            paths,
            settings,
            db,
            sessions,
            llm,
            chat,
            speech,
        }))
    }
}
