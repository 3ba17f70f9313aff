//! Offline index construction.
//!
//! Reads a directory of `.txt` files, splits each document into paragraph
//! chunks (blank-line boundaries, no overlap, bounded size), asks the LLM
//! for a short per-document abstract, embeds both chunks and abstracts,
//! and persists the result.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::core::errors::ApiError;
use crate::index::store::{
    self, ChunkIndex, DocSummary, Document, IndexMeta, IndexedChunk, SummaryIndex,
};
use crate::llm::{ChatRequest, LlmProvider};

const SUMMARY_PROMPT: &str = "Summarize the following document in one or two sentences, then \
pose one or two questions a reader could answer with it:\n\n{document}\n\n-- Abstract:";

const EMBED_BATCH: usize = 16;

pub struct IndexBuilder {
    llm: Arc<dyn LlmProvider>,
    chat_model: String,
    embed_model: String,
    chunk_size: usize,
}

impl IndexBuilder {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        chat_model: impl Into<String>,
        embed_model: impl Into<String>,
        chunk_size: usize,
    ) -> Self {
        Self {
            llm,
            chat_model: chat_model.into(),
            embed_model: embed_model.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Builds the chunk and summary indexes for a document set.
    pub async fn build(
        &self,
        documents: &[Document],
    ) -> Result<(ChunkIndex, SummaryIndex), ApiError> {
        let mut chunks = Vec::new();
        for doc in documents {
            for (i, (offset, text)) in
                split_paragraph_chunks(&doc.text, self.chunk_size).into_iter().enumerate()
            {
                chunks.push(IndexedChunk {
                    chunk_id: format!("{}#{}", doc.doc_id, i),
                    doc_id: doc.doc_id.clone(),
                    text,
                    offset,
                    embedding: Vec::new(),
                });
            }
        }

        let chunk_texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let chunk_embeddings = self.embed_all(&chunk_texts).await?;
        for (chunk, embedding) in chunks.iter_mut().zip(chunk_embeddings) {
            chunk.embedding = embedding;
        }

        let mut summaries = Vec::with_capacity(documents.len());
        for doc in documents {
            let summary = self.summarize(doc).await?;
            summaries.push(DocSummary {
                doc_id: doc.doc_id.clone(),
                summary,
                text: doc.text.clone(),
                embedding: Vec::new(),
            });
        }

        let summary_texts: Vec<String> = summaries.iter().map(|s| s.summary.clone()).collect();
        let summary_embeddings = self.embed_all(&summary_texts).await?;
        for (summary, embedding) in summaries.iter_mut().zip(summary_embeddings) {
            summary.embedding = embedding;
        }

        tracing::info!(
            "Built index: {} documents, {} chunks",
            documents.len(),
            chunks.len()
        );

        Ok((ChunkIndex { chunks }, SummaryIndex { summaries }))
    }

    /// Builds a summary-only index (the news reference corpus has no use
    /// for chunk retrieval).
    pub async fn build_summary_only(
        &self,
        documents: &[Document],
    ) -> Result<SummaryIndex, ApiError> {
        let mut summaries = Vec::with_capacity(documents.len());
        for doc in documents {
            let summary = self.summarize(doc).await?;
            summaries.push(DocSummary {
                doc_id: doc.doc_id.clone(),
                summary,
                text: doc.text.clone(),
                embedding: Vec::new(),
            });
        }

        let summary_texts: Vec<String> = summaries.iter().map(|s| s.summary.clone()).collect();
        let summary_embeddings = self.embed_all(&summary_texts).await?;
        for (summary, embedding) in summaries.iter_mut().zip(summary_embeddings) {
            summary.embedding = embedding;
        }

        Ok(SummaryIndex { summaries })
    }

    pub async fn build_and_persist(
        &self,
        documents: &[Document],
        dir: &Path,
    ) -> Result<(), ApiError> {
        let (chunks, summaries) = self.build(documents).await?;
        let meta = IndexMeta {
            embedding_model: self.embed_model.clone(),
            document_count: documents.len(),
        };
        store::persist(dir, &chunks, &summaries, &meta)
    }

    pub async fn build_and_persist_summary_only(
        &self,
        documents: &[Document],
        dir: &Path,
    ) -> Result<(), ApiError> {
        let summaries = self.build_summary_only(documents).await?;
        let meta = IndexMeta {
            embedding_model: self.embed_model.clone(),
            document_count: documents.len(),
        };
        store::persist(dir, &ChunkIndex::default(), &summaries, &meta)
    }

    async fn summarize(&self, doc: &Document) -> Result<String, ApiError> {
        let prompt = SUMMARY_PROMPT.replace("{document}", &doc.text);
        self.llm.chat(ChatRequest::prompt(prompt), &self.chat_model).await
    }

    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH) {
            let mut batch_embeddings = self.llm.embed(batch, &self.embed_model).await?;
            if batch_embeddings.len() != batch.len() {
                return Err(ApiError::Upstream(format!(
                    "embedding endpoint returned {} vectors for {} inputs",
                    batch_embeddings.len(),
                    batch.len()
                )));
            }
            embeddings.append(&mut batch_embeddings);
        }
        Ok(embeddings)
    }
}

/// Loads every `.txt` file under `dir` as one document, id'd by file stem.
/// Line endings are normalized so paragraph splitting behaves the same for
/// files written on Windows.
pub fn load_documents(dir: &Path) -> Result<Vec<Document>, ApiError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| ApiError::Internal(format!("failed to read {}: {}", dir.display(), e)))?;

    let mut documents = Vec::new();
    for entry in entries {
        let entry = entry.map_err(ApiError::internal)?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }

        let text = fs::read_to_string(&path)
            .map_err(|e| ApiError::Internal(format!("failed to read {}: {}", path.display(), e)))?;
        let text = text.replace("\r\n", "\n").replace('\r', "\n");
        if text.trim().is_empty() {
            continue;
        }

        let doc_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .to_string();
        documents.push(Document { doc_id, text });
    }

    documents.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
    Ok(documents)
}

/// Splits text on blank-line boundaries with no overlap. Paragraphs longer
/// than `chunk_size` characters are hard-split at the size limit. Returns
/// (character offset, chunk text) pairs.
pub fn split_paragraph_chunks(text: &str, chunk_size: usize) -> Vec<(usize, String)> {
    let mut chunks = Vec::new();
    let mut offset = 0usize;

    for paragraph in text.split("\n\n") {
        let para_chars = paragraph.chars().count();
        let trimmed = paragraph.trim();
        if trimmed.is_empty() {
            offset += para_chars + 2;
            continue;
        }

        let chars: Vec<char> = trimmed.chars().collect();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + chunk_size).min(chars.len());
            let piece: String = chars[start..end].iter().collect();
            chunks.push((offset + start, piece));
            start = end;
        }

        offset += para_chars + 2;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_blank_lines() {
        let text = "first paragraph\n\nsecond paragraph\n\nthird";
        let chunks = split_paragraph_chunks(text, 500);
        let texts: Vec<&str> = chunks.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(texts, vec!["first paragraph", "second paragraph", "third"]);
    }

    #[test]
    fn oversized_paragraphs_are_hard_split_without_overlap() {
        let text = "abcdefghij";
        let chunks = split_paragraph_chunks(text, 4);
        let texts: Vec<&str> = chunks.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(texts, vec!["abcd", "efgh", "ij"]);
        assert_eq!(chunks[1].0, 4);
    }

    #[test]
    fn blank_paragraphs_are_skipped() {
        let text = "one\n\n\n\ntwo";
        let chunks = split_paragraph_chunks(text, 500);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn load_documents_reads_txt_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha text").unwrap();
        std::fs::write(dir.path().join("b.md"), "ignored").unwrap();
        std::fs::write(dir.path().join("c.txt"), "gamma\r\ntext").unwrap();

        let docs = load_documents(dir.path()).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].doc_id, "a");
        assert_eq!(docs[1].doc_id, "c");
        assert_eq!(docs[1].text, "gamma\ntext");
    }
}
