use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::Client;
use rig::{client::CompletionClient, completion::Prompt, providers::openrouter};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, info};

use super::{GenerationConfig, LanguageModel, LlmError, OCR_PROMPT, non_empty, with_timeout};

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

const PREAMBLE: &str =
    "You are a healthcare insurance documentation assistant. Follow the output format you are given exactly.";

/// OpenRouter provider: text prompts go through a `rig` agent, image
/// transcription through the raw chat-completions endpoint.
pub struct OpenRouterClient {
    client: openrouter::Client,
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl OpenRouterClient {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            client: openrouter::Client::new(&api_key),
            http: Client::new(),
            api_key,
            model,
            base_url: OPENROUTER_BASE_URL.to_string(),
            timeout,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn prompt_agent(&self, prompt: &str, config: &GenerationConfig) -> Result<String, LlmError> {
        let mut builder = self.client.agent(&self.model).preamble(PREAMBLE);
        if let Some(temperature) = config.temperature {
            builder = builder.temperature(temperature);
        }
        if let Some(max_tokens) = config.max_output_tokens {
            builder = builder.max_tokens(max_tokens);
        }
        if let Some(params) = sampling_params(config) {
            builder = builder.additional_params(params);
        }
        let agent = builder.build();

        agent
            .prompt(prompt.to_string())
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))
    }

    async fn chat_completion(&self, content: Vec<Value>) -> Result<String, LlmError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "user",
                    "content": content
                }
            ]
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&payload)
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

        let response_json: Value = response.json().await?;
        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".into()))?;

        non_empty(content.to_string())
    }
}

/// `top_p` / `top_k` are not first-class agent settings, so they ride along
/// as extra request parameters.
fn sampling_params(config: &GenerationConfig) -> Option<Value> {
    let mut params = Map::new();
    if let Some(top_p) = config.top_p {
        params.insert("top_p".to_string(), json!(top_p));
    }
    if let Some(top_k) = config.top_k {
        params.insert("top_k".to_string(), json!(top_k));
    }
    (!params.is_empty()).then_some(Value::Object(params))
}

#[async_trait]
impl LanguageModel for OpenRouterClient {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String, LlmError> {
        debug!(model = %self.model, "Prompting OpenRouter agent");
        let text = with_timeout(self.timeout, self.prompt_agent(prompt, config)).await?;
        info!(chars = text.len(), "OpenRouter reply received");
        non_empty(text)
    }

    async fn transcribe_image(&self, png: &[u8]) -> Result<String, LlmError> {
        let content = vec![
            json!({
                "type": "text",
                "text": OCR_PROMPT
            }),
            json!({
                "type": "image_url",
                "image_url": {
                    "url": format!("data:image/png;base64,{}", STANDARD.encode(png))
                }
            }),
        ];
        with_timeout(self.timeout, self.chat_completion(content)).await
    }
}
