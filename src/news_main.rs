//! News commentary batch job.
//!
//! Manually triggered: fetches the configured portal's hot topics, stores
//! the articles, and generates per-topic commentary in the figure's voice.
//! Writes a CSV report into the data directory and logs each take.

use std::sync::Arc;

use anyhow::Context;

use figura_backend::core::config::{AppPaths, Settings};
use figura_backend::db::Db;
use figura_backend::index::{store, Retriever};
use figura_backend::llm::OpenAiCompatProvider;
use figura_backend::news::{HotNewsFetcher, NewsPipeline};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let paths = AppPaths::new();
    let settings = Settings::load(&paths).context("loading settings")?;

    let db = Db::connect(&settings.database_url).await.context("connecting to database")?;
    db.ensure_schema().await.context("ensuring schema")?;

    let llm = Arc::new(OpenAiCompatProvider::new(
        settings.llm_base_url.clone(),
        settings.llm_api_key.clone(),
        settings.request_timeout_secs,
    ));

    let reference_index = match store::load(&paths.news_index_dir, &settings.embed_model) {
        Ok((chunks, summaries)) => Some(Arc::new(Retriever::new(
            llm.clone(),
            settings.embed_model.clone(),
            chunks,
            summaries,
            settings.tunables.news.reference_matches,
            settings.tunables.retrieval.k_chunks,
        ))),
        Err(err) => {
            tracing::warn!(
                "No news reference index at {} ({}); commentary will have no stylistic reference",
                paths.news_index_dir.display(),
                err
            );
            None
        }
    };

    let fetcher = HotNewsFetcher::new(
        settings.news_source_url.clone(),
        settings.request_timeout_secs,
    );
    let pipeline = NewsPipeline::new(
        llm,
        settings.chat_model.clone(),
        db,
        fetcher,
        reference_index,
        settings.persona_name.clone(),
        settings.tunables.news.max_topics,
        settings.tunables.news.max_articles_per_topic,
        settings.tunables.news.reference_matches,
    );

    let report_path = paths.data_dir.join("comments.csv");
    let results = pipeline.run(&report_path).await.context("running news pipeline")?;

    for row in &results {
        tracing::info!("[{}] {}", row.topic, row.one_liner);
    }
    tracing::info!(
        "Generated commentary for {} topics; report at {}",
        results.len(),
        report_path.display()
    );

    Ok(())
}
