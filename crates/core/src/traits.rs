use crate::error::{LlmError, SearchError};
use crate::models::{RetrievedHit, VectorRecord};
use async_trait::async_trait;

/// Persistent nearest-neighbour store over chunk vectors.
///
/// `query` returns hits ordered by ascending distance.
#[async_trait]
pub trait VectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), SearchError>;

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievedHit>, SearchError>;

    async fn count(&self) -> Result<usize, SearchError>;

    /// Removes every vector of the document with this `document_id`.
    async fn delete_document(&self, document_id: &str) -> Result<(), SearchError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[async_trait]
pub trait LanguageModel {
    async fn generate(&self, prompt: &str, params: GenerationParams) -> Result<String, LlmError>;
}
