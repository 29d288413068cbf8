use crate::models::{RecordMetadata, RetrievedHit, VectorRecord};
use crate::traits::VectorStore;
use crate::SearchError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;
use uuid::Uuid;

const BACKEND: &str = "qdrant";

/// Qdrant collection accessed over its REST API with cosine distance.
///
/// Chunk metadata is stored flat in the point payload so `delete_document` can
/// filter on `document_id`.
pub struct QdrantStore {
    base_url: Url,
    collection: String,
    http: Client,
    dimensions: usize,
}

#[derive(Serialize)]
struct PointPayload<'a> {
    record_id: &'a str,
    document: &'a str,
    #[serde(flatten)]
    metadata: &'a RecordMetadata,
}

#[derive(Deserialize)]
struct StoredPayload {
    #[serde(default)]
    record_id: String,
    #[serde(default)]
    document: String,
    #[serde(flatten)]
    metadata: RecordMetadata,
}

#[derive(Deserialize)]
struct ScoredPoint {
    score: f64,
    payload: StoredPayload,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Deserialize)]
struct CountResult {
    count: usize,
}

impl From<ScoredPoint> for RetrievedHit {
    fn from(point: ScoredPoint) -> Self {
        RetrievedHit {
            id: point.payload.record_id,
            chunk_text: point.payload.document,
            metadata: point.payload.metadata,
            distance: (1.0 - point.score) as f32,
        }
    }
}

impl QdrantStore {
    pub fn new(
        base_url: &str,
        collection: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            collection: collection.into(),
            http: Client::new(),
            dimensions,
        })
    }

    fn collection_url(&self, suffix: &str) -> Result<Url, SearchError> {
        Ok(self
            .base_url
            .join(&format!("collections/{}{}", self.collection, suffix))?)
    }

    fn check_dimensions(&self, what: &str, len: usize) -> Result<(), SearchError> {
        if len == self.dimensions {
            Ok(())
        } else {
            Err(SearchError::Request(format!(
                "{what} has {len} dimensions, collection {} expects {}",
                self.collection, self.dimensions
            )))
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, SearchError> {
        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(backend_error(response.status().to_string()))
        }
    }

    /// Creates the collection with cosine distance unless it already exists.
    pub async fn ensure_collection(&self) -> Result<(), SearchError> {
        let existing = self.http.get(self.collection_url("")?).send().await?;
        match existing.status() {
            StatusCode::OK => return Ok(()),
            StatusCode::NOT_FOUND => {}
            other => return Err(backend_error(other.to_string())),
        }

        let create = self.http.put(self.collection_url("")?).json(&json!({
            "vectors": { "size": self.dimensions, "distance": "Cosine" }
        }));
        self.send(create).await?;
        Ok(())
    }
}

/// Qdrant only accepts integer or UUID point ids; record ids are hex digests.
fn point_id(record_id: &str) -> Uuid {
    let prefix: String = record_id.chars().take(32).collect();
    u128::from_str_radix(&prefix, 16)
        .map(Uuid::from_u128)
        .unwrap_or_else(|_| Uuid::new_v4())
}

fn backend_error(details: String) -> SearchError {
    SearchError::BackendResponse {
        backend: BACKEND.to_string(),
        details,
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), SearchError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut points = Vec::with_capacity(records.len());
        for record in records {
            self.check_dimensions("embedding", record.embedding.len())?;
            let payload = serde_json::to_value(PointPayload {
                record_id: &record.id,
                document: &record.document,
                metadata: &record.metadata,
            })?;
            points.push(json!({
                "id": point_id(&record.id),
                "vector": record.embedding,
                "payload": payload,
            }));
        }

        let request = self
            .http
            .put(self.collection_url("/points?wait=true")?)
            .json(&json!({ "points": points }));
        self.send(request).await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievedHit>, SearchError> {
        self.check_dimensions("query vector", vector.len())?;

        let request = self
            .http
            .post(self.collection_url("/points/search")?)
            .json(&json!({ "vector": vector, "limit": k, "with_payload": true }));
        let found: SearchResponse = self.send(request).await?.json().await?;

        Ok(found.result.into_iter().map(RetrievedHit::from).collect())
    }

    async fn count(&self) -> Result<usize, SearchError> {
        let response = self
            .http
            .post(self.collection_url("/points/count")?)
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        // A collection that was never created holds nothing.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status().to_string()));
        }

        let counted: CountResponse = response.json().await?;
        Ok(counted.result.count)
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), SearchError> {
        let request = self
            .http
            .post(self.collection_url("/points/delete?wait=true")?)
            .json(&json!({
                "filter": {
                    "must": [{ "key": "document_id", "match": { "value": document_id } }]
                }
            }));
        self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_are_stable_uuids_of_record_digests() {
        let digest = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        assert_eq!(point_id(digest), point_id(digest));
        assert_eq!(
            point_id(digest).to_string(),
            "01234567-89ab-cdef-0123-456789abcdef"
        );
    }

    #[test]
    fn collection_urls_join_onto_endpoint() -> Result<(), SearchError> {
        let store = QdrantStore::new("http://localhost:6333/", "theses", 8)?;
        assert_eq!(
            store.collection_url("/points/search")?.as_str(),
            "http://localhost:6333/collections/theses/points/search"
        );
        Ok(())
    }

    #[test]
    fn payload_is_flat_with_document_id_at_top_level() -> Result<(), serde_json::Error> {
        let metadata = RecordMetadata {
            document_id: "9f2c".to_string(),
            title: "Mangrove Nursery Habitats".to_string(),
            source_file: "mangrove.pdf".to_string(),
            chunk_idx: 3,
            ..RecordMetadata::default()
        };
        let payload = serde_json::to_value(PointPayload {
            record_id: "abc",
            document: "Mangrove roots shelter juvenile fish.",
            metadata: &metadata,
        })?;

        assert_eq!(payload["document_id"], "9f2c");
        assert_eq!(payload["source_file"], "mangrove.pdf");
        assert_eq!(payload["record_id"], "abc");
        assert_eq!(payload["chunk_idx"], 3);
        Ok(())
    }

    #[test]
    fn search_results_become_hits_with_cosine_distance() -> Result<(), serde_json::Error> {
        let body = r#"{
            "result": [{
                "id": "01234567-89ab-cdef-0123-456789abcdef",
                "version": 4,
                "score": 0.75,
                "payload": {
                    "record_id": "abc",
                    "document": "Coral colonies bleached.",
                    "title": "Coral Bleaching Along Reef Flats",
                    "author": "",
                    "degree": "",
                    "university": "",
                    "call_no": "",
                    "abstract": "",
                    "publication_year": "2019",
                    "subjects": "Marine Science",
                    "source_file": "coral.pdf",
                    "chunk_idx": 0
                }
            }],
            "status": "ok",
            "time": 0.001
        }"#;

        let found: SearchResponse = serde_json::from_str(body)?;
        let hits: Vec<RetrievedHit> = found.result.into_iter().map(RetrievedHit::from).collect();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "abc");
        assert_eq!(hits[0].chunk_text, "Coral colonies bleached.");
        assert_eq!(hits[0].metadata.source_file, "coral.pdf");
        assert_eq!(hits[0].metadata.publication_year, "2019");
        assert!((hits[0].distance - 0.25).abs() < 1e-6);
        Ok(())
    }
}
