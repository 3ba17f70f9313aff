//! News commentary batch pipeline.
//!
//! fetch hot articles → digest each topic (abstract + keywords) → persist
//! → cluster the freshest ingestion batch → pick a stylistic reference
//! from the commentary reference index → write a long commentary and a
//! one-line take per cluster. Runs are not idempotent: every run fetches
//! and inserts anew.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::chat::keywords::strip_code_fences;
use crate::chat::prompts;
use crate::core::errors::ApiError;
use crate::db::{Db, NewsClusterRow, NewsRecord};
use crate::index::Retriever;
use crate::llm::{ChatRequest, LlmProvider};
use crate::news::fetch::{HotNewsFetcher, ScrapedArticle};

#[derive(Debug, Clone, Deserialize)]
pub struct TopicDigest {
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    #[serde(default)]
    pub keywords: String,
}

#[derive(Debug, Clone)]
pub struct NewsCommentary {
    pub topic: String,
    pub abstract_text: String,
    pub keywords: String,
    pub reference: String,
    pub commentary: String,
    pub one_liner: String,
}

pub struct NewsPipeline {
    llm: Arc<dyn LlmProvider>,
    chat_model: String,
    db: Db,
    fetcher: HotNewsFetcher,
    /// Summary index over the figure's published commentary; absent when
    /// the reference index has not been built yet.
    reference_index: Option<Arc<Retriever>>,
    persona_name: String,
    max_topics: usize,
    max_per_topic: usize,
    reference_matches: usize,
}

impl NewsPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        chat_model: impl Into<String>,
        db: Db,
        fetcher: HotNewsFetcher,
        reference_index: Option<Arc<Retriever>>,
        persona_name: impl Into<String>,
        max_topics: usize,
        max_per_topic: usize,
        reference_matches: usize,
    ) -> Self {
        Self {
            llm,
            chat_model: chat_model.into(),
            db,
            fetcher,
            reference_index,
            persona_name: persona_name.into(),
            max_topics,
            max_per_topic,
            reference_matches,
        }
    }

    pub async fn run(&self, report_path: &Path) -> Result<Vec<NewsCommentary>, ApiError> {
        let articles = self.fetcher.collect(self.max_topics, self.max_per_topic).await;
        tracing::info!("Fetched {} articles", articles.len());

        let grouped = group_by_topic(articles);
        for (topic, topic_articles) in &grouped {
            let digest = self.digest_topic(topic, topic_articles).await;
            for article in topic_articles {
                let record = NewsRecord {
                    hot_topic: topic.clone(),
                    page_title: article.page_title.clone(),
                    content_text: article.text.clone(),
                    author: String::new(),
                    site: article.site.clone(),
                    url: article.url.clone(),
                    published: String::new(),
                    content_length: article.text.chars().count() as i64,
                    abstract_text: digest.abstract_text.clone(),
                    keywords: digest.keywords.clone(),
                };
                self.db.insert_news(&record).await?;
            }
        }

        let batch = self.db.latest_news_batch().await?;
        let clusters = group_clusters(batch);
        tracing::info!("Commenting on {} topic clusters", clusters.len());

        let mut results = Vec::with_capacity(clusters.len());
        for (topic, rows) in clusters {
            let context = render_cluster_context(&rows);
            let keywords = rows
                .first()
                .map(|r| r.keywords.clone())
                .unwrap_or_default();
            let abstract_text = rows
                .first()
                .map(|r| r.abstract_text.clone())
                .unwrap_or_default();

            let reference = self.stylistic_reference(&keywords).await;
            let commentary = self
                .llm
                .chat(
                    ChatRequest::prompt(prompts::news_commentary(
                        &self.persona_name,
                        &context,
                        &reference,
                    )),
                    &self.chat_model,
                )
                .await?;
            let one_liner = self
                .llm
                .chat(
                    ChatRequest::prompt(prompts::one_line_take(&self.persona_name, &commentary)),
                    &self.chat_model,
                )
                .await?;

            results.push(NewsCommentary {
                topic,
                abstract_text,
                keywords,
                reference,
                commentary,
                one_liner,
            });
        }

        let report = render_csv(&results);
        if let Err(err) = std::fs::write(report_path, report) {
            tracing::warn!("Failed to write report {}: {}", report_path.display(), err);
        }

        Ok(results)
    }

    /// One LLM call per topic; a malformed reply degrades to an empty
    /// digest with a warning rather than aborting the whole batch.
    async fn digest_topic(&self, topic: &str, articles: &[ScrapedArticle]) -> TopicDigest {
        let raw_texts = articles
            .iter()
            .enumerate()
            .filter(|(_, a)| !a.text.is_empty())
            .map(|(i, a)| format!("Report {}:\n{}", i + 1, a.text))
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = prompts::topic_digest(topic, &raw_texts);
        match self.llm.chat(ChatRequest::prompt(prompt), &self.chat_model).await {
            Ok(reply) => match parse_digest(&reply) {
                Ok(digest) => digest,
                Err(err) => {
                    tracing::warn!("Digest for '{}' was malformed: {}", topic, err);
                    TopicDigest {
                        abstract_text: String::new(),
                        keywords: String::new(),
                    }
                }
            },
            Err(err) => {
                tracing::warn!("Digest call for '{}' failed: {}", topic, err);
                TopicDigest {
                    abstract_text: String::new(),
                    keywords: String::new(),
                }
            }
        }
    }

    /// The matched reference document with the longest text, or empty when
    /// no reference index is loaded or nothing matches.
    async fn stylistic_reference(&self, keywords: &str) -> String {
        let Some(index) = &self.reference_index else {
            return String::new();
        };

        let query = format!(
            "The topics the user wants to look up are: {keywords}. \
Which documents cover matching subjects?"
        );
        match index.summary_matches(&query, self.reference_matches).await {
            Ok(matches) => matches
                .into_iter()
                .max_by_key(|m| m.text.chars().count())
                .map(|m| m.text)
                .unwrap_or_default(),
            Err(err) => {
                tracing::warn!("Reference lookup failed: {}", err);
                String::new()
            }
        }
    }
}

pub(crate) fn parse_digest(reply: &str) -> Result<TopicDigest, ApiError> {
    let stripped = strip_code_fences(reply);
    serde_json::from_str(stripped)
        .map_err(|e| ApiError::Upstream(format!("digest reply was not valid JSON: {e}")))
}

pub(crate) fn group_by_topic(articles: Vec<ScrapedArticle>) -> BTreeMap<String, Vec<ScrapedArticle>> {
    let mut grouped: BTreeMap<String, Vec<ScrapedArticle>> = BTreeMap::new();
    for article in articles {
        grouped.entry(article.topic.clone()).or_default().push(article);
    }
    grouped
}

pub(crate) fn group_clusters(rows: Vec<NewsClusterRow>) -> BTreeMap<String, Vec<NewsClusterRow>> {
    let mut grouped: BTreeMap<String, Vec<NewsClusterRow>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.hot_topic.clone()).or_default().push(row);
    }
    grouped
}

pub(crate) fn render_cluster_context(rows: &[NewsClusterRow]) -> String {
    rows.iter()
        .map(|row| {
            format!(
                "Report:\n\n{}\n------------------------------------",
                row.content_text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn render_csv(rows: &[NewsCommentary]) -> String {
    let mut out = String::from("topic,abstract,keywords,commentary,one_liner\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            csv_escape(&row.topic),
            csv_escape(&row.abstract_text),
            csv_escape(&row.keywords),
            csv_escape(&row.commentary),
            csv_escape(&row.one_liner),
        ));
    }
    out
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_row(topic: &str, text: &str, len: i64) -> NewsClusterRow {
        NewsClusterRow {
            hot_topic: topic.to_string(),
            page_title: String::new(),
            content_text: text.to_string(),
            abstract_text: "abs".to_string(),
            keywords: "k1, k2".to_string(),
            content_length: len,
        }
    }

    #[test]
    fn digest_parses_fenced_json() {
        let digest = parse_digest(
            "```json\n{\"abstract\": \"short summary\", \"keywords\": \"a, b, c\"}\n```",
        )
        .unwrap();
        assert_eq!(digest.abstract_text, "short summary");
        assert_eq!(digest.keywords, "a, b, c");
    }

    #[test]
    fn digest_rejects_prose() {
        assert!(parse_digest("here are your keywords: a, b").is_err());
    }

    #[test]
    fn clusters_group_by_topic_in_stable_order() {
        let rows = vec![
            cluster_row("beta", "b1", 200),
            cluster_row("alpha", "a1", 150),
            cluster_row("beta", "b2", 300),
        ];
        let grouped = group_clusters(rows);
        let topics: Vec<&String> = grouped.keys().collect();
        assert_eq!(topics, vec!["alpha", "beta"]);
        assert_eq!(grouped["beta"].len(), 2);
    }

    #[test]
    fn cluster_context_concatenates_reports() {
        let rows = vec![cluster_row("t", "first text", 110), cluster_row("t", "second", 120)];
        let context = render_cluster_context(&rows);
        assert!(context.contains("first text"));
        assert!(context.contains("second"));
        assert!(context.contains("Report:"));
    }

    #[test]
    fn csv_escapes_commas_and_quotes() {
        let rows = vec![NewsCommentary {
            topic: "taxes, pensions".to_string(),
            abstract_text: "said \"no\"".to_string(),
            keywords: "k".to_string(),
            reference: String::new(),
            commentary: "multi\nline".to_string(),
            one_liner: "fin".to_string(),
        }];
        let csv = render_csv(&rows);
        assert!(csv.contains("\"taxes, pensions\""));
        assert!(csv.contains("\"said \"\"no\"\"\""));
        assert!(csv.contains("\"multi\nline\""));
    }
}
