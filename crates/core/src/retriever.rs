use crate::embeddings::Embedder;
use crate::error::SearchError;
use crate::index::VectorIndex;
use crate::models::{DocumentSummary, RetrievalOptions, RetrievedHit};
use crate::traits::VectorStore;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    /// Every hit the store returned, in rank order.
    pub hits: Vec<RetrievedHit>,
    /// Unique documents under the distance threshold, in first-hit order.
    pub documents: Vec<DocumentSummary>,
}

pub struct Retriever<'a, E, S> {
    index: &'a VectorIndex<E, S>,
    options: RetrievalOptions,
}

impl<'a, E, S> Retriever<'a, E, S>
where
    E: Embedder + Send + Sync,
    S: VectorStore + Send + Sync,
{
    pub fn new(index: &'a VectorIndex<E, S>, options: RetrievalOptions) -> Self {
        Self { index, options }
    }

    pub async fn search(&self, query: &str, k: usize) -> Result<RetrievalOutcome, SearchError> {
        let hits = self.index.query_text(query, k).await?;
        let documents = select_documents(
            &hits,
            self.options.distance_threshold,
            self.options.max_documents,
        );

        debug!(
            query,
            hits = hits.len(),
            documents = documents.len(),
            "retrieval finished"
        );
        Ok(RetrievalOutcome { hits, documents })
    }
}

/// First `max_documents` distinct source files whose hit lies under `threshold`.
pub fn select_documents(
    hits: &[RetrievedHit],
    threshold: f32,
    max_documents: usize,
) -> Vec<DocumentSummary> {
    let mut seen = HashSet::new();
    let mut documents = Vec::new();

    for hit in hits {
        if documents.len() == max_documents {
            break;
        }
        if hit.distance < threshold && seen.insert(hit.metadata.source_file.as_str()) {
            documents.push(DocumentSummary::from_hit(hit));
        }
    }

    documents
}
