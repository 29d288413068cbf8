//! Failure types of the indexing pipeline, the search path and model calls.

use thiserror::Error;

/// Failures while turning source files into indexed chunks.
///
/// Per-document variants (unreadable text, OCR) end up in the indexing report;
/// store and manifest failures abort the pass.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("could not read source: {0}")]
    Io(#[from] std::io::Error),

    #[error("unreadable pdf: {0}")]
    PdfParse(String),

    #[error("invalid pattern: {0}")]
    RegexError(#[from] regex::Error),

    #[error("no file name in {0}")]
    MissingFileName(String),

    #[error("invalid chunking: {0}")]
    InvalidChunkConfig(String),

    #[error("ocr request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ocr returned no usable text: {0}")]
    OcrFailed(String),

    #[error("manifest or cache is not valid json: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector store failed: {0}")]
    Store(#[from] SearchError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("{backend} answered with something unexpected: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("vector store unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bad store url: {0}")]
    Url(#[from] url::ParseError),

    #[error("vector snapshot is not valid json: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("vector snapshot io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid pattern: {0}")]
    RegexError(#[from] regex::Error),

    #[error("rejected search request: {0}")]
    Request(String),
}

/// Every failure of a language model call collapses into this type so the
/// synthesizer can render it inline instead of propagating it.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("model endpoint unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bad model url: {0}")]
    Url(#[from] url::ParseError),

    #[error("{status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}
