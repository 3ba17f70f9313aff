use async_trait::async_trait;

use super::types::ChatRequest;
use crate::core::errors::ApiError;

/// Seam for the model backends. Everything that talks to a language model
/// or an embedding model goes through this trait, which keeps the chat
/// engine, retriever, and pipelines testable without a live endpoint.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// return the provider name (e.g. "openai-compat")
    fn name(&self) -> &str;

    /// chat completion (non-streaming)
    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, ApiError>;

    /// generate embeddings
    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, ApiError>;
}
