use std::env;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

use super::paths::AppPaths;
use crate::core::errors::ApiError;

/// Process-wide immutable settings.
///
/// Secrets and connection strings come from the environment; tunables come
/// from an optional `config.yml` (data dir first, project root second) and
/// fall back to their defaults when the file is absent.
#[derive(Debug, Clone)]
pub struct Settings {
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub chat_model: String,
    pub embed_model: String,
    pub database_url: String,
    pub speech_api_key: Option<String>,
    pub speech_base_url: String,
    pub speech_voice: String,
    pub persona_name: String,
    pub persona_description: String,
    pub news_source_url: String,
    pub request_timeout_secs: u64,
    pub tunables: Tunables,
}

impl Settings {
    pub fn load(paths: &AppPaths) -> Result<Self, ApiError> {
        let llm_api_key = require_env("FIGURA_LLM_API_KEY")?;
        let database_url = require_env("DATABASE_URL")?;

        Ok(Settings {
            llm_api_key,
            llm_base_url: env_or("FIGURA_LLM_BASE_URL", "https://api.deepseek.com"),
            chat_model: env_or("FIGURA_CHAT_MODEL", "deepseek-chat"),
            embed_model: env_or("FIGURA_EMBED_MODEL", "bge-large-zh-v1.5"),
            database_url,
            speech_api_key: env::var("FIGURA_SPEECH_API_KEY").ok().filter(|v| !v.is_empty()),
            speech_base_url: env_or(
                "FIGURA_SPEECH_BASE_URL",
                "https://dashscope.aliyuncs.com/api/v1",
            ),
            speech_voice: env_or("FIGURA_SPEECH_VOICE", "longwan"),
            persona_name: env_or("FIGURA_PERSONA_NAME", "Zou Taofen"),
            persona_description: env_or(
                "FIGURA_PERSONA_DESCRIPTION",
                "a renowned journalist and publisher from modern Chinese history",
            ),
            news_source_url: env_or("FIGURA_NEWS_URL", "https://www.baidu.com"),
            request_timeout_secs: env::var("FIGURA_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            tunables: Tunables::load(paths),
        })
    }
}

fn require_env(key: &str) -> Result<String, ApiError> {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Internal(format!("missing required environment variable {key}")))
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Non-secret tunables, overridable via `config.yml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Tunables {
    pub retrieval: RetrievalTunables,
    pub index: IndexTunables,
    pub keywords: KeywordTunables,
    pub news: NewsTunables,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalTunables {
    pub k_summary: usize,
    pub k_chunks: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexTunables {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeywordTunables {
    pub paragraphs_per_keyword: usize,
    pub articles_per_keyword: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NewsTunables {
    pub max_topics: usize,
    pub max_articles_per_topic: usize,
    pub reference_matches: usize,
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            retrieval: RetrievalTunables::default(),
            index: IndexTunables::default(),
            keywords: KeywordTunables::default(),
            news: NewsTunables::default(),
        }
    }
}

impl Default for RetrievalTunables {
    fn default() -> Self {
        RetrievalTunables {
            k_summary: 3,
            k_chunks: 5,
        }
    }
}

impl Default for IndexTunables {
    fn default() -> Self {
        IndexTunables { chunk_size: 500 }
    }
}

impl Default for KeywordTunables {
    fn default() -> Self {
        KeywordTunables {
            paragraphs_per_keyword: 5,
            articles_per_keyword: 5,
        }
    }
}

impl Default for NewsTunables {
    fn default() -> Self {
        NewsTunables {
            max_topics: 10,
            max_articles_per_topic: 5,
            reference_matches: 3,
        }
    }
}

impl Tunables {
    pub fn load(paths: &AppPaths) -> Self {
        for path in [
            paths.data_dir.join("config.yml"),
            paths.project_root.join("config.yml"),
        ] {
            if let Some(tunables) = load_yaml(&path) {
                return tunables;
            }
        }
        Tunables::default()
    }
}

fn load_yaml(path: &PathBuf) -> Option<Tunables> {
    if !path.exists() {
        return None;
    }
    match fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Tunables>(&contents) {
            Ok(tunables) => Some(tunables),
            Err(err) => {
                tracing::warn!("Ignoring malformed config {}: {}", path.display(), err);
                None
            }
        },
        Err(err) => {
            tracing::warn!("Failed to read config {}: {}", path.display(), err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tunables_defaults() {
        let t = Tunables::default();
        assert_eq!(t.retrieval.k_summary, 3);
        assert_eq!(t.retrieval.k_chunks, 5);
        assert_eq!(t.index.chunk_size, 500);
        assert_eq!(t.keywords.paragraphs_per_keyword, 5);
    }

    #[test]
    fn tunables_partial_yaml_keeps_defaults() {
        let t: Tunables =
            serde_yaml::from_str("retrieval:\n  k_summary: 7\n").expect("valid yaml");
        assert_eq!(t.retrieval.k_summary, 7);
        assert_eq!(t.retrieval.k_chunks, 5);
        assert_eq!(t.index.chunk_size, 500);
    }
}
