use crate::chunking::build_chunks;
use crate::embeddings::Embedder;
use crate::extractor::{extract_document_text, OcrClient};
use crate::index::VectorIndex;
use crate::manifest::Manifest;
use crate::metadata::MetadataExtractor;
use crate::models::IndexingOptions;
use crate::traits::VectorStore;
use crate::IngestError;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const SOURCE_EXTENSIONS: [&str; 2] = ["pdf", "txt"];

/// A source document known by path and modification time only.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

/// A source document with its text already materialised.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
    pub text: String,
}

pub fn discover_source_files(folder: &Path) -> Vec<SourceFile> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_source = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SOURCE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });
        if !is_source {
            continue;
        }

        match modified_at(entry.path()) {
            Ok(modified) => files.push(SourceFile {
                path: entry.path().to_path_buf(),
                modified,
            }),
            Err(error) => {
                warn!(path = %entry.path().display(), error = %error, "cannot read mtime")
            }
        }
    }

    files.sort_unstable_by(|left, right| left.path.cmp(&right.path));
    files
}

pub fn modified_at(path: &Path) -> Result<DateTime<Utc>, IngestError> {
    Ok(DateTime::<Utc>::from(fs::metadata(path)?.modified()?))
}

#[derive(Debug, Clone)]
pub struct SkippedDocument {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IndexingReport {
    pub indexed: Vec<String>,
    pub unchanged: usize,
    pub recovered: usize,
    pub chunks_written: usize,
    pub skipped: Vec<SkippedDocument>,
}

struct Pass {
    manifest: Manifest,
    report: IndexingReport,
}

/// Runs indexing passes against one [`VectorIndex`].
///
/// Takes `&mut self` for every pass: one indexer is the single writer of the
/// manifest, text cache and store.
pub struct Indexer<'a, E, S> {
    index: &'a VectorIndex<E, S>,
    extractor: MetadataExtractor<&'a E>,
    options: IndexingOptions,
    ocr: Option<OcrClient>,
}

impl<'a, E, S> Indexer<'a, E, S>
where
    E: Embedder + Send + Sync,
    S: VectorStore + Send + Sync,
{
    pub fn new(index: &'a VectorIndex<E, S>, options: IndexingOptions) -> Result<Self, IngestError> {
        Ok(Self {
            index,
            extractor: MetadataExtractor::new(index.embedder())?,
            options,
            ocr: None,
        })
    }

    pub fn with_ocr(mut self, ocr: Option<OcrClient>) -> Self {
        self.ocr = ocr;
        self
    }

    /// Indexes stale files, loading text only for the ones that need it.
    pub async fn index_files(&mut self, files: Vec<SourceFile>) -> Result<IndexingReport, IngestError> {
        let mut pass = self.begin_pass().await?;

        for file in files {
            let key = source_key(&file.path);
            if !pass.manifest.is_stale(&key, file.modified) {
                pass.report.unchanged += 1;
                continue;
            }

            let text = match extract_document_text(
                &file.path,
                self.options.min_native_text_chars,
                self.ocr.as_ref(),
            )
            .await
            {
                Ok(text) => text,
                Err(error) => {
                    warn!(path = %key, error = %error, "skipping unreadable document");
                    pass.report.skipped.push(SkippedDocument {
                        path: key,
                        reason: error.to_string(),
                    });
                    continue;
                }
            };

            let document = SourceDocument {
                path: file.path,
                modified: file.modified,
                text,
            };
            self.index_document(&document, &mut pass).await?;
        }

        self.finish_pass(pass)
    }

    pub async fn index_documents(
        &mut self,
        documents: Vec<SourceDocument>,
    ) -> Result<IndexingReport, IngestError> {
        let mut pass = self.begin_pass().await?;

        for document in documents {
            if !pass
                .manifest
                .is_stale(&source_key(&document.path), document.modified)
            {
                pass.report.unchanged += 1;
                continue;
            }
            self.index_document(&document, &mut pass).await?;
        }

        self.finish_pass(pass)
    }

    async fn begin_pass(&self) -> Result<Pass, IngestError> {
        let manifest = Manifest::load(&self.options.manifest_path)?;
        let mut report = IndexingReport::default();

        if !manifest.is_empty() && self.index.count().await? == 0 {
            info!(documents = manifest.len(), "vector store is empty, rebuilding from manifest");
            self.recover(&manifest, &mut report).await?;
        }

        Ok(Pass { manifest, report })
    }

    /// Re-embeds every manifest document from its cached text.
    async fn recover(&self, manifest: &Manifest, report: &mut IndexingReport) -> Result<(), IngestError> {
        for key in manifest.paths() {
            let cache_path = self.cache_path(key);
            let text = match fs::read_to_string(&cache_path) {
                Ok(text) => text,
                Err(error) => {
                    warn!(path = %key, cache = %cache_path.display(), error = %error, "cached text missing, document not recovered");
                    report.skipped.push(SkippedDocument {
                        path: key.to_string(),
                        reason: format!("cached text missing: {error}"),
                    });
                    continue;
                }
            };

            let written = self.embed_text(Path::new(key), &text).await?;
            report.recovered += 1;
            report.chunks_written += written;
        }

        Ok(())
    }

    async fn index_document(&self, document: &SourceDocument, pass: &mut Pass) -> Result<(), IngestError> {
        let key = source_key(&document.path);

        self.index
            .remove_document(&generate_document_id(&document.path))
            .await?;
        let written = self.embed_text(&document.path, &document.text).await?;

        let cache_path = self.cache_path(&key);
        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&cache_path, &document.text)?;

        debug!(path = %key, chunks = written, "indexed document");
        pass.manifest.record(key.clone(), document.modified);
        pass.report.indexed.push(key);
        pass.report.chunks_written += written;
        Ok(())
    }

    async fn embed_text(&self, path: &Path, text: &str) -> Result<usize, IngestError> {
        let file_name = source_file_name(path)?;
        let metadata = self.extractor.extract(text);
        let chunks = build_chunks(
            &generate_document_id(path),
            &file_name,
            text,
            self.options.chunk_size,
        )?;

        self.index.upsert_document(&chunks, &metadata).await
    }

    fn finish_pass(&self, pass: Pass) -> Result<IndexingReport, IngestError> {
        pass.manifest.save(&self.options.manifest_path)?;
        info!(
            indexed = pass.report.indexed.len(),
            unchanged = pass.report.unchanged,
            recovered = pass.report.recovered,
            skipped = pass.report.skipped.len(),
            chunks = pass.report.chunks_written,
            "indexing pass finished"
        );
        Ok(pass.report)
    }

    fn cache_path(&self, key: &str) -> PathBuf {
        self.options
            .text_cache_dir
            .join(format!("{}.txt", generate_document_id(Path::new(key))))
    }
}

fn source_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn source_file_name(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

fn generate_document_id(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}
