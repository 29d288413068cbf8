pub mod chunking;
pub mod conversation;
pub mod embeddings;
pub mod error;
pub mod extractor;
#[cfg(test)]
mod http_stub;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod manifest;
pub mod metadata;
pub mod models;
pub mod orchestrator;
pub mod retriever;
pub mod stores;
pub mod synthesis;
pub mod traits;

pub use chunking::{build_chunks, chunk_text, normalize_whitespace, split_sentences};
pub use conversation::{ConversationManager, ConversationSession};
pub use embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{IngestError, LlmError, SearchError};
pub use extractor::{extract_document_text, OcrClient, OcrEndpointConfig};
pub use index::VectorIndex;
pub use ingest::{discover_source_files, Indexer, IndexingReport, SkippedDocument, SourceDocument, SourceFile};
pub use llm::{GeminiClient, GeminiConfig};
pub use manifest::Manifest;
pub use metadata::MetadataExtractor;
pub use models::{
    ConversationTurn, DocumentSummary, IndexingOptions, RecordMetadata, RetrievalOptions,
    RetrievedHit, SearchAnswer, SourceReference, SynthesisOptions, ThesisChunk, ThesisMetadata,
    VectorRecord,
};
pub use orchestrator::ThesisSearchService;
pub use retriever::{select_documents, RetrievalOutcome, Retriever};
pub use stores::{LocalVectorStore, QdrantStore};
pub use synthesis::{AnswerSynthesizer, Synthesis, NO_RESULTS_MESSAGE};
pub use traits::{GenerationParams, LanguageModel, VectorStore};
