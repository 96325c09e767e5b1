//! Generative-text providers.
//!
//! Pipelines only see the [`LanguageModel`] trait. Two providers implement it:
//! Google Gemini over its REST API and OpenRouter through `rig`. Every call is
//! bounded by the configured timeout, and a timeout is reported like any other
//! API failure.

pub mod gemini;
pub mod openrouter;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{AppConfig, LlmProvider};

pub use gemini::GeminiClient;
pub use openrouter::OpenRouterClient;

/// Prompt used when a vision model stands in for OCR.
pub const OCR_PROMPT: &str = "You are an OCR engine for scanned healthcare documents. \
Transcribe ALL text visible in this image exactly as written, preserving line structure, \
numbers, dates and medical terminology. Return ONLY the transcribed text without commentary.";

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("empty response from provider")]
    EmptyResponse,

    #[error("invalid response format: {0}")]
    InvalidResponse(String),

    #[error("no response within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("failed to encode request: {0}")]
    Encoding(String),
}

/// Sampling parameters. `None` leaves the provider default in place.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GenerationConfig {
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<u64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
}

impl GenerationConfig {
    /// Near-deterministic settings for JSON field extraction.
    pub const EXTRACTION: Self = Self {
        temperature: Some(0.1),
        max_output_tokens: Some(800),
        top_p: Some(0.8),
        top_k: Some(40),
    };

    /// Letter drafting.
    pub const DRAFTING: Self = Self {
        temperature: Some(0.3),
        max_output_tokens: Some(1500),
        top_p: Some(0.8),
        top_k: Some(40),
    };

    pub const PROVIDER_DEFAULT: Self = Self {
        temperature: None,
        max_output_tokens: None,
        top_p: None,
        top_k: None,
    };
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send a single prompt and return the reply text.
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String, LlmError>;

    /// Read the text out of a PNG image.
    async fn transcribe_image(&self, png: &[u8]) -> Result<String, LlmError>;
}

/// Builds the provider selected in the configuration.
pub fn build_language_model(config: &AppConfig) -> Arc<dyn LanguageModel> {
    let timeout = config.llm_timeout;
    match config.provider {
        LlmProvider::Gemini => {
            let client = GeminiClient::new(config.api_key.clone(), config.model.clone(), timeout);
            match &config.base_url {
                Some(url) => Arc::new(client.with_base_url(url)),
                None => Arc::new(client),
            }
        }
        LlmProvider::OpenRouter => {
            let client =
                OpenRouterClient::new(config.api_key.clone(), config.model.clone(), timeout);
            match &config.base_url {
                Some(url) => Arc::new(client.with_base_url(url)),
                None => Arc::new(client),
            }
        }
    }
}

pub(crate) async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, LlmError>
where
    F: Future<Output = Result<T, LlmError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| LlmError::Timeout(limit))?
}

pub(crate) fn non_empty(text: String) -> Result<String, LlmError> {
    if text.trim().is_empty() {
        Err(LlmError::EmptyResponse)
    } else {
        Ok(text)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_calls_surface_as_timeouts() {
        let result: Result<(), LlmError> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(LlmError::Timeout(_))));
    }

    #[test]
    fn blank_replies_are_empty_responses() {
        assert!(matches!(
            non_empty("  \n".to_string()),
            Err(LlmError::EmptyResponse)
        ));
        assert_eq!(non_empty("ok".to_string()).unwrap(), "ok");
    }
}
