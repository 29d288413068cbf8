use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::PathBuf;

/// Bibliographic fields derived from the raw text of one thesis.
///
/// A field that could not be found is an empty string (or an empty list);
/// only `call_no` distinguishes "absent" with `None`.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThesisMetadata {
    pub title: String,
    pub author: String,
    pub degree: String,
    pub university: String,
    pub call_no: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub publication_year: String,
    /// `subjects[0]` is the controlled-vocabulary main subject when one matched.
    pub subjects: Vec<String>,
}

impl ThesisMetadata {
    /// Flattens the record into scalar fields for one chunk of a document.
    pub fn to_record_metadata(&self, chunk: &ThesisChunk) -> RecordMetadata {
        RecordMetadata {
            document_id: chunk.document_id.clone(),
            title: self.title.clone(),
            author: self.author.clone(),
            degree: self.degree.clone(),
            university: self.university.clone(),
            call_no: self.call_no.clone().unwrap_or_default(),
            abstract_text: self.abstract_text.clone(),
            publication_year: self.publication_year.clone(),
            subjects: self.subjects.join(", "),
            source_file: chunk.source_file.clone(),
            chunk_idx: chunk.chunk_idx,
        }
    }
}

/// Metadata as stored next to a vector. Every field is a scalar so no list or
/// null value can reach the store.
///
/// `document_id` identifies the source path and is what re-indexing deletes by;
/// `source_file` is the bare file name shown to users and used for dedup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordMetadata {
    #[serde(default)]
    pub document_id: String,
    pub title: String,
    pub author: String,
    pub degree: String,
    pub university: String,
    pub call_no: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub publication_year: String,
    pub subjects: String,
    pub source_file: String,
    pub chunk_idx: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThesisChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub source_file: String,
    pub chunk_idx: u64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub document: String,
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedHit {
    pub id: String,
    pub chunk_text: String,
    pub metadata: RecordMetadata,
    /// Lower is closer.
    pub distance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub query: String,
    pub overview: String,
}

/// One unique thesis selected for a query, summarised from its best hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentSummary {
    pub title: String,
    pub author: String,
    pub publication_year: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub file: String,
    pub degree: String,
    pub call_no: String,
    pub subjects: String,
    pub distance: f32,
}

impl DocumentSummary {
    pub fn from_hit(hit: &RetrievedHit) -> Self {
        let metadata = &hit.metadata;
        Self {
            title: metadata.title.clone(),
            author: metadata.author.clone(),
            publication_year: metadata.publication_year.clone(),
            abstract_text: metadata.abstract_text.clone(),
            file: metadata.source_file.clone(),
            degree: metadata.degree.clone(),
            call_no: metadata.call_no.clone(),
            subjects: metadata.subjects.clone(),
            distance: hit.distance,
        }
    }
}

/// A cited source in final reference order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceReference {
    pub number: usize,
    pub title: String,
    pub author: String,
    pub publication_year: String,
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchAnswer {
    pub query: String,
    pub resolved_query: String,
    pub overview: String,
    pub documents: Vec<DocumentSummary>,
    pub sources: Vec<SourceReference>,
}

#[derive(Debug, Clone)]
pub struct IndexingOptions {
    pub chunk_size: usize,
    pub manifest_path: PathBuf,
    pub text_cache_dir: PathBuf,
    pub min_native_text_chars: usize,
}

impl IndexingOptions {
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            manifest_path: data_dir.join("indexed_documents.json"),
            text_cache_dir: data_dir.join("text_cache"),
            ..Self::default()
        }
    }
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            manifest_path: PathBuf::from("data/indexed_documents.json"),
            text_cache_dir: PathBuf::from("data/text_cache"),
            min_native_text_chars: 100,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub distance_threshold: f32,
    pub max_documents: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 20,
            distance_threshold: 1.0,
            max_documents: 10,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SynthesisOptions {
    pub max_sources: usize,
    pub relevance_threshold: f32,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Issue one follow-up prompt when a selected source is never cited.
    pub reprompt_on_missing: bool,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            max_sources: 5,
            relevance_threshold: 1.0,
            temperature: 0.3,
            max_output_tokens: 2048,
            reprompt_on_missing: false,
        }
    }
}
