//! Two-tier retrieval.
//!
//! A query is matched coarsely against per-document summaries first, then
//! finely against paragraph chunks; only chunks whose parent document made
//! the summary cut survive. When the summary tier matches nothing, the
//! result is the empty string with no fallback to unfiltered chunk
//! matches.

use std::collections::HashSet;
use std::sync::Arc;

use crate::core::errors::ApiError;
use crate::index::store::{cosine_similarity, ChunkIndex, IndexedChunk, SummaryIndex};
use crate::llm::LlmProvider;

/// A document that matched the summary tier.
#[derive(Debug, Clone)]
pub struct SummaryMatch {
    pub doc_id: String,
    pub score: f32,
    pub summary: String,
    pub text: String,
}

pub struct Retriever {
    llm: Arc<dyn LlmProvider>,
    embed_model: String,
    chunks: ChunkIndex,
    summaries: SummaryIndex,
    k_summary: usize,
    k_chunks: usize,
}

impl Retriever {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        embed_model: impl Into<String>,
        chunks: ChunkIndex,
        summaries: SummaryIndex,
        k_summary: usize,
        k_chunks: usize,
    ) -> Self {
        Self {
            llm,
            embed_model: embed_model.into(),
            chunks,
            summaries,
            k_summary: k_summary.max(1),
            k_chunks: k_chunks.max(1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.summaries.is_empty() && self.chunks.chunks.is_empty()
    }

    /// Returns the concatenated text of chunks relevant to the query, or an
    /// empty string when nothing matches. Upstream embedding failures are
    /// errors, distinct from the legitimate empty result.
    pub async fn get_relevant_context(&self, query: &str) -> Result<String, ApiError> {
        if self.is_empty() {
            return Ok(String::new());
        }

        let query_embedding = self.embed_query(query).await?;

        let doc_ids = top_summary_doc_ids(&query_embedding, &self.summaries, self.k_summary);
        let top = top_chunks(&query_embedding, &self.chunks, self.k_chunks);
        Ok(join_filtered_chunks(&top, &doc_ids))
    }

    /// Summary-tier matches with their underlying document text, used by
    /// the news pipeline to pick a stylistic reference.
    pub async fn summary_matches(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<SummaryMatch>, ApiError> {
        if self.summaries.summaries.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.embed_query(query).await?;

        let mut scored: Vec<SummaryMatch> = self
            .summaries
            .summaries
            .iter()
            .map(|s| SummaryMatch {
                doc_id: s.doc_id.clone(),
                score: cosine_similarity(&query_embedding, &s.embedding),
                summary: s.summary.clone(),
                text: s.text.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k.max(1));
        Ok(scored)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, ApiError> {
        let mut embeddings = self
            .llm
            .embed(&[query.to_string()], &self.embed_model)
            .await?;
        embeddings
            .pop()
            .ok_or_else(|| ApiError::Upstream("embedding endpoint returned nothing".to_string()))
    }
}

/// Top-k summary matches, deduplicated by document id, best first.
pub(crate) fn top_summary_doc_ids(
    query_embedding: &[f32],
    summaries: &SummaryIndex,
    k: usize,
) -> HashSet<String> {
    let mut scored: Vec<(f32, &str)> = summaries
        .summaries
        .iter()
        .map(|s| (cosine_similarity(query_embedding, &s.embedding), s.doc_id.as_str()))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut seen = HashSet::new();
    for (_, doc_id) in scored {
        if seen.len() >= k {
            break;
        }
        seen.insert(doc_id.to_string());
    }
    seen
}

/// Top-k chunks by similarity, in retrieval (score) order.
pub(crate) fn top_chunks<'a>(
    query_embedding: &[f32],
    chunks: &'a ChunkIndex,
    k: usize,
) -> Vec<&'a IndexedChunk> {
    let mut scored: Vec<(f32, &IndexedChunk)> = chunks
        .chunks
        .iter()
        .map(|c| (cosine_similarity(query_embedding, &c.embedding), c))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored.into_iter().map(|(_, c)| c).collect()
}

/// Keeps chunks whose parent made the summary cut and joins their text in
/// retrieval order, blank-line separated.
pub(crate) fn join_filtered_chunks(chunks: &[&IndexedChunk], doc_ids: &HashSet<String>) -> String {
    let surviving: Vec<&str> = chunks
        .iter()
        .filter(|c| doc_ids.contains(&c.doc_id))
        .map(|c| c.text.as_str())
        .collect();
    surviving.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::store::{DocSummary, IndexedChunk};
    use crate::llm::{ChatRequest, LlmProvider};
    use async_trait::async_trait;

    fn chunk(id: &str, doc: &str, text: &str, embedding: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            chunk_id: id.to_string(),
            doc_id: doc.to_string(),
            text: text.to_string(),
            offset: 0,
            embedding,
        }
    }

    fn summary(doc: &str, embedding: Vec<f32>) -> DocSummary {
        DocSummary {
            doc_id: doc.to_string(),
            summary: format!("summary of {doc}"),
            text: format!("text of {doc}"),
            embedding,
        }
    }

    /// Provider that answers every embed call with a fixed vector.
    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl LlmProvider for FixedEmbedder {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn chat(&self, _request: ChatRequest, _model: &str) -> Result<String, ApiError> {
            Ok(String::new())
        }

        async fn embed(
            &self,
            inputs: &[String],
            _model: &str,
        ) -> Result<Vec<Vec<f32>>, ApiError> {
            Ok(inputs.iter().map(|_| self.0.clone()).collect())
        }
    }

    #[test]
    fn chunks_outside_summary_set_are_dropped() {
        let query = vec![1.0, 0.0];
        let chunks = ChunkIndex {
            chunks: vec![
                chunk("c1", "d1", "kept first", vec![1.0, 0.0]),
                chunk("c2", "d2", "dropped", vec![0.9, 0.1]),
                chunk("c3", "d1", "kept second", vec![0.8, 0.2]),
            ],
        };
        let top = top_chunks(&query, &chunks, 5);
        let doc_ids: HashSet<String> = ["d1".to_string()].into_iter().collect();

        let joined = join_filtered_chunks(&top, &doc_ids);
        assert_eq!(joined, "kept first\n\nkept second");
    }

    #[test]
    fn summary_doc_ids_are_deduplicated_and_capped() {
        let query = vec![1.0, 0.0];
        let summaries = SummaryIndex {
            summaries: vec![
                summary("d1", vec![1.0, 0.0]),
                summary("d2", vec![0.5, 0.5]),
                summary("d3", vec![0.0, 1.0]),
            ],
        };
        let ids = top_summary_doc_ids(&query, &summaries, 2);
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("d1"));
        assert!(ids.contains("d2"));
    }

    #[tokio::test]
    async fn empty_summary_tier_yields_empty_context() {
        let llm = Arc::new(FixedEmbedder(vec![1.0, 0.0]));
        let chunks = ChunkIndex {
            chunks: vec![chunk("c1", "d1", "some text", vec![1.0, 0.0])],
        };
        let retriever = Retriever::new(
            llm,
            "embed-v1",
            chunks,
            SummaryIndex::default(),
            3,
            5,
        );

        let context = retriever.get_relevant_context("anything").await.unwrap();
        assert_eq!(context, "");
    }

    #[tokio::test]
    async fn relevant_context_intersects_tiers() {
        let llm = Arc::new(FixedEmbedder(vec![1.0, 0.0]));
        let chunks = ChunkIndex {
            chunks: vec![
                chunk("c1", "d1", "about the figure", vec![1.0, 0.0]),
                chunk("c2", "d9", "unrelated doc", vec![1.0, 0.0]),
            ],
        };
        let summaries = SummaryIndex {
            summaries: vec![summary("d1", vec![1.0, 0.0])],
        };
        let retriever = Retriever::new(llm, "embed-v1", chunks, summaries, 1, 5);

        let context = retriever.get_relevant_context("query").await.unwrap();
        assert_eq!(context, "about the figure");
    }

    #[tokio::test]
    async fn summary_matches_return_document_text() {
        let llm = Arc::new(FixedEmbedder(vec![0.0, 1.0]));
        let summaries = SummaryIndex {
            summaries: vec![summary("d1", vec![0.0, 1.0]), summary("d2", vec![1.0, 0.0])],
        };
        let retriever =
            Retriever::new(llm, "embed-v1", ChunkIndex::default(), summaries, 3, 5);

        let matches = retriever.summary_matches("topic", 1).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].doc_id, "d1");
        assert_eq!(matches[0].text, "text of d1");
    }
}
