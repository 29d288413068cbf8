//! Source text for indexing. Plain text files are read as they are; PDFs go
//! through lopdf, with an OCR endpoint standing in for scanned documents.

use crate::error::IngestError;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

const OCR_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub number: u32,
    pub text: String,
}

/// Native text layer of a PDF, one entry per page that has any text.
pub trait PdfTextSource {
    fn pages(&self, path: &Path) -> Result<Vec<ExtractedPage>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfSource;

impl PdfTextSource for LopdfSource {
    fn pages(&self, path: &Path) -> Result<Vec<ExtractedPage>, IngestError> {
        let document = Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        document
            .get_pages()
            .into_keys()
            .map(|number| {
                document
                    .extract_text(&[number])
                    .map(|text| ExtractedPage { number, text })
                    .map_err(|error| IngestError::PdfParse(format!("page {number}: {error}")))
            })
            .filter(|page| !matches!(page, Ok(page) if page.text.trim().is_empty()))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl OcrEndpointConfig {
    /// Reads `LLM_OCR_ENDPOINT` and `LLM_OCR_API_KEY`; `None` when no endpoint is set.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            endpoint: non_empty_env("LLM_OCR_ENDPOINT")?,
            api_key: non_empty_env("LLM_OCR_API_KEY"),
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Serialize)]
struct OcrRequest<'a> {
    pdf_base64: String,
    source_path: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Vec<OcrPage>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OcrPage {
    #[serde(default)]
    text: Option<String>,
}

impl OcrResponse {
    /// Per-page text when the endpoint lists pages, otherwise the flat text
    /// split on form feeds. `None` when both are blank.
    fn into_text(self) -> Option<String> {
        let listed: Vec<String> = self
            .pages
            .into_iter()
            .filter_map(|page| page.text)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .collect();
        if !listed.is_empty() {
            return Some(listed.join("\n"));
        }

        let flat: Vec<&str> = self
            .text
            .as_deref()
            .unwrap_or_default()
            .split('\u{000c}')
            .map(str::trim)
            .filter(|page| !page.is_empty())
            .collect();
        (!flat.is_empty()).then(|| flat.join("\n"))
    }
}

/// Posts whole PDFs, base64-encoded, to a multimodal OCR endpoint.
#[derive(Clone)]
pub struct OcrClient {
    config: OcrEndpointConfig,
    client: Client,
}

impl OcrClient {
    pub fn new(config: OcrEndpointConfig) -> Result<Self, IngestError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(OCR_TIMEOUT_SECS))
            .build()?;
        Ok(Self { config, client })
    }

    pub async fn recognize(&self, path: &Path) -> Result<String, IngestError> {
        let pdf = tokio::fs::read(path).await?;
        let source_path = path.to_string_lossy();
        let body = OcrRequest {
            pdf_base64: STANDARD.encode(pdf),
            source_path: &source_path,
        };

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "{} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        response
            .json::<OcrResponse>()
            .await?
            .into_text()
            .ok_or_else(|| IngestError::OcrFailed(format!("no text recognised in {}", path.display())))
    }
}

/// Plain text of one source document.
///
/// A PDF whose native text is shorter than `min_native_chars` (or unreadable)
/// goes to `ocr` when one is given; if OCR fails the native text is kept when
/// there is any. Every other extension is read as UTF-8.
pub async fn extract_document_text(
    path: &Path,
    min_native_chars: usize,
    ocr: Option<&OcrClient>,
) -> Result<String, IngestError> {
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        return Ok(tokio::fs::read_to_string(path).await?);
    }

    let native = LopdfSource.pages(path).map(|pages| join_pages(&pages));
    let native_chars = native
        .as_ref()
        .map_or(0, |text| text.trim().chars().count());
    if native_chars >= min_native_chars {
        return native;
    }

    let Some(ocr) = ocr else {
        debug!(path = %path.display(), native_chars, "native text is short and no OCR endpoint is set");
        return native;
    };

    warn!(path = %path.display(), native_chars, "native text is short, falling back to OCR");
    match (ocr.recognize(path).await, native) {
        (Ok(text), _) => Ok(text),
        (Err(ocr_error), Ok(text)) => {
            warn!(path = %path.display(), error = %ocr_error, "OCR failed, keeping native text");
            Ok(text)
        }
        (Err(ocr_error), Err(parse_error)) => Err(IngestError::PdfParse(format!(
            "{parse_error}; OCR fallback failed: {ocr_error}"
        ))),
    }
}

fn join_pages(pages: &[ExtractedPage]) -> String {
    pages
        .iter()
        .map(|page| page.text.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}
