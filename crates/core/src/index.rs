use crate::embeddings::Embedder;
use crate::error::{IngestError, SearchError};
use crate::models::{RetrievedHit, ThesisChunk, ThesisMetadata, VectorRecord};
use crate::traits::VectorStore;

/// An embedder paired with the vector store it feeds.
pub struct VectorIndex<E, S> {
    embedder: E,
    store: S,
}

impl<E, S> VectorIndex<E, S>
where
    E: Embedder + Send + Sync,
    S: VectorStore + Send + Sync,
{
    pub fn new(embedder: E, store: S) -> Self {
        Self { embedder, store }
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Embeds and upserts all chunks of one document as a single batch.
    pub async fn upsert_document(
        &self,
        chunks: &[ThesisChunk],
        metadata: &ThesisMetadata,
    ) -> Result<usize, IngestError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = self.embedder.encode(&texts);

        if embeddings.len() != chunks.len() {
            return Err(IngestError::Embedding(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let dimensions = self.embedder.dimensions();
        let records = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                if embedding.len() != dimensions {
                    return Err(IngestError::Embedding(format!(
                        "embedding dimension {} != {}",
                        embedding.len(),
                        dimensions
                    )));
                }

                Ok(VectorRecord {
                    id: chunk.chunk_id.clone(),
                    embedding,
                    document: chunk.text.clone(),
                    metadata: metadata.to_record_metadata(chunk),
                })
            })
            .collect::<Result<Vec<_>, IngestError>>()?;

        self.store.upsert(&records).await?;
        Ok(records.len())
    }

    pub async fn remove_document(&self, document_id: &str) -> Result<(), SearchError> {
        self.store.delete_document(document_id).await
    }

    pub async fn query_text(&self, text: &str, k: usize) -> Result<Vec<RetrievedHit>, SearchError> {
        let vector = self.embedder.embed(text);
        self.store.query(&vector, k).await
    }

    pub async fn count(&self) -> Result<usize, SearchError> {
        self.store.count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::stores::LocalVectorStore;
    use crate::{build_chunks, Embedder};
    use tempfile::tempdir;

    struct ShortEmbedder;

    impl Embedder for ShortEmbedder {
        fn dimensions(&self) -> usize {
            8
        }

        fn embed(&self, _text: &str) -> Vec<f32> {
            vec![1.0; 4]
        }
    }

    #[tokio::test]
    async fn upserted_records_carry_flattened_metadata() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalVectorStore::open(dir.path().join("vectors.json")).await?;
        let index = VectorIndex::new(CharacterNgramEmbedder::default(), store);
        let metadata = ThesisMetadata {
            title: "Soil carbon in upland farms".to_string(),
            subjects: vec!["Soil Science".to_string(), "carbon".to_string()],
            ..ThesisMetadata::default()
        };
        let chunks = build_chunks("doc", "soil.txt", "Soil carbon was measured. It rose.", 200)?;

        assert_eq!(index.upsert_document(&chunks, &metadata).await?, 1);

        let hits = index.query_text("soil carbon", 5).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.subjects, "Soil Science, carbon");
        assert_eq!(hits[0].metadata.call_no, "");
        assert_eq!(hits[0].metadata.source_file, "soil.txt");
        Ok(())
    }

    #[tokio::test]
    async fn wrong_embedding_dimension_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalVectorStore::open(dir.path().join("vectors.json")).await?;
        let index = VectorIndex::new(ShortEmbedder, store);
        let chunks = build_chunks("doc", "a.txt", "Some text here.", 200)?;

        let result = index.upsert_document(&chunks, &ThesisMetadata::default()).await;
        assert!(matches!(result, Err(IngestError::Embedding(_))));
        assert_eq!(index.count().await?, 0);
        Ok(())
    }
}
