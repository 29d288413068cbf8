use crate::error::LlmError;
use crate::traits::{GenerationParams, LanguageModel};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            api_key: api_key.into(),
            timeout_secs: 60,
        }
    }
}

/// `generateContent` client. A single attempt per call, bounded by the
/// configured timeout.
///
/// The API key travels in a header, never in the URL, so transport errors
/// rendered into answers or logs cannot carry it.
#[derive(Clone)]
pub struct GeminiClient {
    url: Url,
    api_key: String,
    timeout_secs: u64,
    client: Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, LlmError> {
        let url = Url::parse(&config.endpoint)?
            .join(&format!("v1beta/models/{}:generateContent", config.model))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            url,
            api_key: config.api_key,
            timeout_secs: config.timeout_secs,
            client,
        })
    }

    fn transport_error(&self, error: reqwest::Error) -> LlmError {
        if error.is_timeout() {
            LlmError::Timeout(self.timeout_secs)
        } else {
            LlmError::Http(error.without_url())
        }
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate(&self, prompt: &str, params: GenerationParams) -> Result<String, LlmError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(self.url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|error| self.transport_error(error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|error| self.transport_error(error))?;
        parse_generated_text(&body)
    }
}

fn parse_generated_text(body: &str) -> Result<String, LlmError> {
    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|error| LlmError::MalformedResponse(error.to_string()))?;

    let text = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| LlmError::MalformedResponse("response has no candidate text".to_string()))?;

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_stub;

    #[test]
    fn candidate_parts_are_concatenated() -> Result<(), LlmError> {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Rice "},{"text":"tolerates salt. [1]"}]}}]}"#;
        assert_eq!(parse_generated_text(body)?, "Rice tolerates salt. [1]");
        Ok(())
    }

    #[test]
    fn empty_or_invalid_bodies_are_malformed() {
        assert!(matches!(
            parse_generated_text(r#"{"candidates":[]}"#),
            Err(LlmError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_generated_text("<html>"),
            Err(LlmError::MalformedResponse(_))
        ));
    }

    #[test]
    fn client_targets_model_generate_content() -> Result<(), LlmError> {
        let client = GeminiClient::new(GeminiConfig::new("key"))?;
        assert_eq!(
            client.url.as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
        Ok(())
    }

    fn local_config(endpoint: String, timeout_secs: u64) -> GeminiConfig {
        GeminiConfig {
            endpoint,
            model: "m".to_string(),
            api_key: "SECRETKEY123".to_string(),
            timeout_secs,
        }
    }

    fn params() -> GenerationParams {
        GenerationParams {
            temperature: 0.2,
            max_output_tokens: 256,
        }
    }

    #[tokio::test]
    async fn api_key_is_sent_as_header() -> Result<(), Box<dyn std::error::Error>> {
        let (endpoint, server) = http_stub::respond_once(
            200,
            r#"{"candidates":[{"content":{"parts":[{"text":"Rice tolerates salt [1]."}]}}]}"#,
        )
        .await?;
        let client = GeminiClient::new(local_config(endpoint, 5))?;

        let text = client.generate("prompt", params()).await?;
        let request = server.await??;

        assert_eq!(text, "Rice tolerates salt [1].");
        let request_line = request.lines().next().unwrap_or_default();
        assert_eq!(request_line, "POST /v1beta/models/m:generateContent HTTP/1.1");
        assert!(request.to_lowercase().contains("x-goog-api-key: secretkey123"));
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_endpoint_error_does_not_reveal_the_key() -> Result<(), Box<dyn std::error::Error>> {
        let endpoint = http_stub::closed_endpoint().await?;
        let client = GeminiClient::new(local_config(endpoint, 5))?;

        let error = match client.generate("prompt", params()).await {
            Err(error) => error,
            Ok(text) => return Err(format!("expected a transport error, got {text}").into()),
        };

        assert!(matches!(error, LlmError::Http(_)));
        assert!(!error.to_string().contains("SECRETKEY123"));
        Ok(())
    }

    #[tokio::test]
    async fn silent_endpoint_times_out() -> Result<(), Box<dyn std::error::Error>> {
        let (endpoint, _listener) = http_stub::silent_endpoint().await?;
        let client = GeminiClient::new(local_config(endpoint, 1))?;

        let result = client.generate("prompt", params()).await;

        assert!(matches!(result, Err(LlmError::Timeout(1))));
        Ok(())
    }
}
