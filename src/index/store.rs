//! On-disk index storage.
//!
//! Two indexes are kept per corpus: a chunk-level index (paragraph chunks
//! with their parent document id and embedding) and a document-level
//! summary index (one generated abstract per document, embedded for
//! coarse topic matching). Both are read-only at query time and rebuilt
//! offline by the `figura-index` binary. Persistence is plain JSON files
//! under the index directory, with a meta file recording the embedding
//! model so a model change invalidates the stored vectors.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

/// A unit of source text with a stable identifier (the file stem).
#[derive(Debug, Clone)]
pub struct Document {
    pub doc_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk_id: String,
    /// Parent document id.
    pub doc_id: String,
    pub text: String,
    /// Character offset within the parent document.
    pub offset: usize,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocSummary {
    pub doc_id: String,
    pub summary: String,
    /// Full document text, kept so summary matches can hand back the
    /// underlying document (the news pipeline needs it as reference text).
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkIndex {
    pub chunks: Vec<IndexedChunk>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryIndex {
    pub summaries: Vec<DocSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub embedding_model: String,
    pub document_count: usize,
}

const CHUNKS_FILE: &str = "chunks.json";
const SUMMARIES_FILE: &str = "summaries.json";
const META_FILE: &str = "meta.json";

pub fn persist(
    dir: &Path,
    chunks: &ChunkIndex,
    summaries: &SummaryIndex,
    meta: &IndexMeta,
) -> Result<(), ApiError> {
    fs::create_dir_all(dir).map_err(ApiError::internal)?;
    write_json(&dir.join(CHUNKS_FILE), chunks)?;
    write_json(&dir.join(SUMMARIES_FILE), summaries)?;
    write_json(&dir.join(META_FILE), meta)?;
    Ok(())
}

/// Loads a persisted index pair, verifying the embedding model matches the
/// configured one. Vectors computed under another model are meaningless to
/// compare against, so a mismatch is an error rather than a silent reuse.
pub fn load(
    dir: &Path,
    expected_embedding_model: &str,
) -> Result<(ChunkIndex, SummaryIndex), ApiError> {
    let meta: IndexMeta = read_json(&dir.join(META_FILE))?;
    if meta.embedding_model != expected_embedding_model {
        return Err(ApiError::Internal(format!(
            "index at {} was built with embedding model '{}' but '{}' is configured; rebuild it",
            dir.display(),
            meta.embedding_model,
            expected_embedding_model
        )));
    }

    let chunks: ChunkIndex = read_json(&dir.join(CHUNKS_FILE))?;
    let summaries: SummaryIndex = read_json(&dir.join(SUMMARIES_FILE))?;
    Ok((chunks, summaries))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ApiError> {
    let contents = serde_json::to_string(value).map_err(ApiError::internal)?;
    fs::write(path, contents).map_err(ApiError::internal)
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ApiError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| ApiError::Internal(format!("failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&contents)
        .map_err(|e| ApiError::Internal(format!("failed to parse {}: {}", path.display(), e)))
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_indexes() -> (ChunkIndex, SummaryIndex) {
        let chunks = ChunkIndex {
            chunks: vec![IndexedChunk {
                chunk_id: "c1".to_string(),
                doc_id: "d1".to_string(),
                text: "a paragraph".to_string(),
                offset: 0,
                embedding: vec![1.0, 0.0],
            }],
        };
        let summaries = SummaryIndex {
            summaries: vec![DocSummary {
                doc_id: "d1".to_string(),
                summary: "a doc about paragraphs".to_string(),
                text: "a paragraph".to_string(),
                embedding: vec![1.0, 0.0],
            }],
        };
        (chunks, summaries)
    }

    #[test]
    fn persist_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (chunks, summaries) = sample_indexes();
        let meta = IndexMeta {
            embedding_model: "embed-v1".to_string(),
            document_count: 1,
        };

        persist(dir.path(), &chunks, &summaries, &meta).unwrap();
        let (loaded_chunks, loaded_summaries) = load(dir.path(), "embed-v1").unwrap();

        assert_eq!(loaded_chunks.chunks.len(), 1);
        assert_eq!(loaded_chunks.chunks[0].doc_id, "d1");
        assert_eq!(loaded_summaries.summaries[0].summary, "a doc about paragraphs");
    }

    #[test]
    fn embedding_model_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (chunks, summaries) = sample_indexes();
        let meta = IndexMeta {
            embedding_model: "embed-v1".to_string(),
            document_count: 1,
        };

        persist(dir.path(), &chunks, &summaries, &meta).unwrap();
        let err = load(dir.path(), "embed-v2").unwrap_err();
        assert!(err.to_string().contains("rebuild"));
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) > 0.99);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
