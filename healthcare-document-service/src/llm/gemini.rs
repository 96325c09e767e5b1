use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

use super::{GenerationConfig, LanguageModel, LlmError, OCR_PROMPT, non_empty, with_timeout};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini `generateContent` over plain HTTP.
pub struct GeminiClient {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
}

impl From<&GenerationConfig> for GeminiGenerationConfig {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            top_p: config.top_p,
            top_k: config.top_k,
        }
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
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
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            api_key,
            model,
            base_url: GEMINI_BASE_URL.to_string(),
            timeout,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_body(parts: Vec<Value>, config: &GenerationConfig) -> Value {
        let mut body = json!({
            "contents": [
                {
                    "role": "user",
                    "parts": parts
                }
            ]
        });
        if *config != GenerationConfig::PROVIDER_DEFAULT {
            body["generationConfig"] = json!(GeminiGenerationConfig::from(config));
        }
        body
    }

    async fn call(&self, body: Value) -> Result<String, LlmError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!(model = %self.model, "Calling Gemini generateContent");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response.json().await?;
        parse_generate_response(payload)
    }
}

/// Concatenates the text parts of the first candidate.
fn parse_generate_response(payload: Value) -> Result<String, LlmError> {
    let parsed: GenerateContentResponse = serde_json::from_value(payload)
        .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

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
        .unwrap_or_default();

    non_empty(text)
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String, LlmError> {
        let body = Self::request_body(vec![json!({ "text": prompt })], config);
        let text = with_timeout(self.timeout, self.call(body)).await?;
        info!(chars = text.len(), "Gemini reply received");
        Ok(text)
    }

    async fn transcribe_image(&self, png: &[u8]) -> Result<String, LlmError> {
        let parts = vec![
            json!({ "text": OCR_PROMPT }),
            json!({
                "inlineData": {
                    "mimeType": "image/png",
                    "data": STANDARD.encode(png)
                }
            }),
        ];
        let body = Self::request_body(parts, &GenerationConfig::PROVIDER_DEFAULT);
        with_timeout(self.timeout, self.call(body)).await
    }
}
