use crate::embeddings::cosine_distance;
use crate::error::SearchError;
use crate::models::{RetrievedHit, VectorRecord};
use crate::traits::VectorStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    records: Vec<VectorRecord>,
}

/// Brute-force cosine store persisted as one JSON snapshot.
///
/// Every mutation rewrites the snapshot through a temporary file and a rename,
/// so a crash mid-write leaves the previous snapshot intact.
pub struct LocalVectorStore {
    path: PathBuf,
    records: RwLock<Vec<VectorRecord>>,
}

impl LocalVectorStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SearchError> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Snapshot>(&bytes)?.records,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(error) => return Err(error.into()),
        };

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &[VectorRecord]) -> Result<(), SearchError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let snapshot = serde_json::to_vec(&SnapshotRef { records })?;
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, snapshot).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    records: &'a [VectorRecord],
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), SearchError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut stored = self.records.write().await;
        let mut updated = stored.clone();
        for record in records {
            match updated.iter_mut().find(|existing| existing.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => updated.push(record.clone()),
            }
        }

        self.persist(&updated).await?;
        *stored = updated;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievedHit>, SearchError> {
        let stored = self.records.read().await;
        let mut hits: Vec<RetrievedHit> = stored
            .iter()
            .map(|record| RetrievedHit {
                id: record.id.clone(),
                chunk_text: record.document.clone(),
                metadata: record.metadata.clone(),
                distance: cosine_distance(vector, &record.embedding),
            })
            .collect();

        hits.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize, SearchError> {
        Ok(self.records.read().await.len())
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), SearchError> {
        let mut stored = self.records.write().await;
        if !stored
            .iter()
            .any(|record| record.metadata.document_id == document_id)
        {
            return Ok(());
        }

        let kept: Vec<VectorRecord> = stored
            .iter()
            .filter(|record| record.metadata.document_id != document_id)
            .cloned()
            .collect();

        self.persist(&kept).await?;
        *stored = kept;
        Ok(())
    }
}
