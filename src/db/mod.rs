//! Postgres-backed persistence.
//!
//! One bounded connection pool serves the whole process. All operations
//! are typed methods returning `ApiError` on failure; nothing is
//! swallowed here, degradation decisions belong to the callers.
//!
//! Tables:
//! - `message`: saved chat histories keyed by (user_id, session_id)
//! - `article`: the figure's source paragraphs for keyword lookup
//! - `news_article`: scraped news enriched with per-topic digests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::chat::engine::ParagraphSource;
use crate::chat::keywords::find_paragraphs_with_keyword;
use crate::core::errors::ApiError;

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub session_id: String,
    pub update_time: DateTime<Utc>,
    pub abstract_text: String,
}

#[derive(Debug, Clone)]
pub struct NewsRecord {
    pub hot_topic: String,
    pub page_title: String,
    pub content_text: String,
    pub author: String,
    pub site: String,
    pub url: String,
    pub published: String,
    pub content_length: i64,
    pub abstract_text: String,
    pub keywords: String,
}

/// One row of the clustering query over the latest ingestion batch.
#[derive(Debug, Clone)]
pub struct NewsClusterRow {
    pub hot_topic: String,
    pub page_title: String,
    pub content_text: String,
    pub abstract_text: String,
    pub keywords: String,
    pub content_length: i64,
}

#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(url: &str) -> Result<Self, ApiError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS message (
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                history TEXT,
                update_time TIMESTAMPTZ NOT NULL DEFAULT now(),
                abstract TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (user_id, session_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS article (
                id BIGSERIAL PRIMARY KEY,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS news_article (
                id BIGSERIAL PRIMARY KEY,
                hot_topic TEXT NOT NULL,
                page_title TEXT NOT NULL DEFAULT '',
                content_text TEXT NOT NULL DEFAULT '',
                author TEXT NOT NULL DEFAULT '',
                site TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL DEFAULT '',
                published TEXT NOT NULL DEFAULT '',
                content_length BIGINT NOT NULL DEFAULT 0,
                abstract TEXT NOT NULL DEFAULT '',
                keywords TEXT NOT NULL DEFAULT '',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_history(&self, user_id: &str) -> Result<Vec<HistoryEntry>, ApiError> {
        let rows = sqlx::query(
            "SELECT session_id, update_time, abstract FROM message
             WHERE user_id = $1
             ORDER BY update_time DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| HistoryEntry {
                session_id: row.get("session_id"),
                update_time: row.get("update_time"),
                abstract_text: row.get("abstract"),
            })
            .collect())
    }

    pub async fn load_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<String>, ApiError> {
        let row = sqlx::query(
            "SELECT history FROM message WHERE user_id = $1 AND session_id = $2",
        )
        .bind(user_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|r| r.get::<Option<String>, _>("history")))
    }

    /// Registers a session row so it shows up in history listings even
    /// before the first save.
    pub async fn insert_session_row(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<(), ApiError> {
        sqlx::query(
            "INSERT INTO message (user_id, session_id) VALUES ($1, $2)
             ON CONFLICT (user_id, session_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn save_session(
        &self,
        user_id: &str,
        session_id: &str,
        history_json: &str,
        abstract_text: &str,
    ) -> Result<(), ApiError> {
        sqlx::query(
            "INSERT INTO message (user_id, session_id, history, update_time, abstract)
             VALUES ($1, $2, $3, now(), $4)
             ON CONFLICT (user_id, session_id) DO UPDATE
             SET history = EXCLUDED.history,
                 update_time = now(),
                 abstract = EXCLUDED.abstract",
        )
        .bind(user_id)
        .bind(session_id)
        .bind(history_json)
        .bind(abstract_text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_article(&self, title: &str, body: &str) -> Result<(), ApiError> {
        sqlx::query("INSERT INTO article (title, body) VALUES ($1, $2)")
            .bind(title)
            .bind(body)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bodies of articles containing the keyword, newest first.
    pub async fn articles_matching(
        &self,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<String>, ApiError> {
        let pattern = format!("%{}%", escape_like(keyword));
        let rows = sqlx::query(
            "SELECT body FROM article WHERE body ILIKE $1 ORDER BY updated_at DESC LIMIT $2",
        )
        .bind(pattern)
        .bind(limit.max(1) as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.get("body")).collect())
    }

    pub async fn insert_news(&self, record: &NewsRecord) -> Result<(), ApiError> {
        sqlx::query(
            "INSERT INTO news_article
             (hot_topic, page_title, content_text, author, site, url, published,
              content_length, abstract, keywords)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&record.hot_topic)
        .bind(&record.page_title)
        .bind(&record.content_text)
        .bind(&record.author)
        .bind(&record.site)
        .bind(&record.url)
        .bind(&record.published)
        .bind(record.content_length)
        .bind(&record.abstract_text)
        .bind(&record.keywords)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Rows of the most recent ingestion minute, substantial articles only,
    /// deduplicated by content length and ordered by topic.
    pub async fn latest_news_batch(&self) -> Result<Vec<NewsClusterRow>, ApiError> {
        let rows = sqlx::query(
            "SELECT hot_topic, page_title, content_text, abstract, keywords, content_length
             FROM (
                 SELECT DISTINCT ON (content_length)
                     hot_topic, page_title, content_text, abstract, keywords, content_length
                 FROM news_article
                 WHERE date_trunc('minute', created_at) = (
                     SELECT max(date_trunc('minute', created_at)) FROM news_article
                 )
                   AND content_length > 100
                 ORDER BY content_length, id
             ) AS batch
             ORDER BY hot_topic",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| NewsClusterRow {
                hot_topic: row.get("hot_topic"),
                page_title: row.get("page_title"),
                content_text: row.get("content_text"),
                abstract_text: row.get("abstract"),
                keywords: row.get("keywords"),
                content_length: row.get("content_length"),
            })
            .collect())
    }
}

/// Escapes LIKE metacharacters so user keywords match literally.
fn escape_like(keyword: &str) -> String {
    keyword
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// `ParagraphSource` backed by the article table: fetch matching article
/// bodies, then pull out the paragraphs actually containing the keyword.
pub struct ArticleParagraphs {
    db: Db,
    articles_per_keyword: usize,
}

impl ArticleParagraphs {
    pub fn new(db: Db, articles_per_keyword: usize) -> Self {
        Self {
            db,
            articles_per_keyword,
        }
    }
}

#[async_trait]
impl ParagraphSource for ArticleParagraphs {
    async fn paragraphs_for(&self, keyword: &str, limit: usize) -> Result<Vec<String>, ApiError> {
        let bodies = self
            .db
            .articles_matching(keyword, self.articles_per_keyword)
            .await?;

        let mut paragraphs = Vec::new();
        for body in &bodies {
            paragraphs.extend(find_paragraphs_with_keyword(body, keyword, limit));
            if paragraphs.len() >= limit {
                paragraphs.truncate(limit);
                break;
            }
        }
        Ok(paragraphs)
    }
}
