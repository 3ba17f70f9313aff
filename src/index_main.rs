//! Offline index builder.
//!
//! Reads the figure's corpus, writes the articles into Postgres for
//! keyword lookup, and builds + persists the chunk and summary indexes.
//! When a reference corpus directory is configured, also builds the
//! summary-only index the news pipeline uses for stylistic references.
//!
//! Environment:
//! - `FIGURA_CORPUS_DIR` (default `<data dir>/corpus`): chat corpus
//! - `FIGURA_REFERENCE_DIR` (optional): published commentary corpus

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use figura_backend::core::config::{AppPaths, Settings};
use figura_backend::db::Db;
use figura_backend::index::builder::{load_documents, IndexBuilder};
use figura_backend::llm::OpenAiCompatProvider;

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

    let corpus_dir = env::var("FIGURA_CORPUS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| paths.data_dir.join("corpus"));

    let llm = Arc::new(OpenAiCompatProvider::new(
        settings.llm_base_url.clone(),
        settings.llm_api_key.clone(),
        settings.request_timeout_secs,
    ));
    let builder = IndexBuilder::new(
        llm.clone(),
        settings.chat_model.clone(),
        settings.embed_model.clone(),
        settings.tunables.index.chunk_size,
    );

    let documents = load_documents(&corpus_dir)
        .with_context(|| format!("loading corpus from {}", corpus_dir.display()))?;
    anyhow::ensure!(
        !documents.is_empty(),
        "no .txt documents found in {}",
        corpus_dir.display()
    );
    tracing::info!("Loaded {} documents from {}", documents.len(), corpus_dir.display());

    let db = Db::connect(&settings.database_url).await.context("connecting to database")?;
    db.ensure_schema().await.context("ensuring schema")?;
    for doc in &documents {
        db.insert_article(&doc.doc_id, &doc.text)
            .await
            .with_context(|| format!("inserting article {}", doc.doc_id))?;
    }
    tracing::info!("Wrote {} articles", documents.len());

    builder
        .build_and_persist(&documents, &paths.index_dir)
        .await
        .context("building chat index")?;
    tracing::info!("Persisted chat index to {}", paths.index_dir.display());

    if let Ok(reference_dir) = env::var("FIGURA_REFERENCE_DIR") {
        let reference_dir = PathBuf::from(reference_dir);
        let references = load_documents(&reference_dir)
            .with_context(|| format!("loading references from {}", reference_dir.display()))?;
        builder
            .build_and_persist_summary_only(&references, &paths.news_index_dir)
            .await
            .context("building news reference index")?;
        tracing::info!(
            "Persisted news reference index ({} documents) to {}",
            references.len(),
            paths.news_index_dir.display()
        );
    }

    Ok(())
}
