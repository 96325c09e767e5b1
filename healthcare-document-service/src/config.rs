use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const DEFAULT_SECRETS_FILE: &str = "secrets.toml";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} not found. Set it in the secrets file or as an environment variable")]
    MissingCredential(&'static str),

    #[error("Unknown LLM_PROVIDER '{0}' (expected 'gemini' or 'openrouter')")]
    UnknownProvider(String),

    #[error("Unknown OCR_ENGINE '{0}' (expected 'vision' or 'tesseract')")]
    UnknownOcrEngine(String),

    #[error("OCR_ENGINE=tesseract requires building with the `tesseract` feature")]
    OcrEngineUnavailable,

    #[error("{key} must be a positive number, got '{value}'")]
    InvalidNumber { key: &'static str, value: String },

    #[error("Failed to read secrets file {path}: {reason}")]
    Secrets { path: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    OpenRouter,
}

impl LlmProvider {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(LlmProvider::Gemini),
            "openrouter" => Ok(LlmProvider::OpenRouter),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }

    pub fn credential_key(self) -> &'static str {
        match self {
            LlmProvider::Gemini => "GEMINI_API_KEY",
            LlmProvider::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            LlmProvider::Gemini => "gemini-1.5-flash",
            LlmProvider::OpenRouter => "openai/gpt-4o-mini",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrEngineKind {
    Vision,
    Tesseract,
}

impl OcrEngineKind {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "vision" => Ok(OcrEngineKind::Vision),
            "tesseract" => Ok(OcrEngineKind::Tesseract),
            other => Err(ConfigError::UnknownOcrEngine(other.to_string())),
        }
    }
}

/// Top-level string keys from a TOML secrets file.
#[derive(Debug, Default, Clone)]
pub struct Secrets(toml::Table);

impl Secrets {
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        content.parse::<toml::Table>().map(Secrets)
    }

    /// Missing file means no secrets; an unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No secrets file, using environment only");
            return Ok(Self::default());
        }
        let secrets_error = |reason: String| ConfigError::Secrets {
            path: path.display().to_string(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| secrets_error(e.to_string()))?;
        Self::parse(&content).map_err(|e| secrets_error(e.to_string()))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .and_then(|value| value.as_str())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub provider: LlmProvider,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub llm_timeout: Duration,
    pub port: u16,
    pub max_upload_bytes: usize,
    pub ocr_engine: OcrEngineKind,
}

impl AppConfig {
    /// Resolve configuration from the process environment and the secrets file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let secrets_path = std::env::var("SECRETS_FILE")
            .unwrap_or_else(|_| DEFAULT_SECRETS_FILE.to_string());
        let secrets = Secrets::load(Path::new(&secrets_path))?;
        Self::from_sources(|key| std::env::var(key).ok(), &secrets)
    }

    /// Credentials come from the secrets store first, then the environment.
    pub fn from_sources<F>(env: F, secrets: &Secrets) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let setting = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let provider = match setting("LLM_PROVIDER") {
            Some(value) => LlmProvider::parse(&value)?,
            None => LlmProvider::Gemini,
        };

        let credential_key = provider.credential_key();
        let api_key = secrets
            .get(credential_key)
            .or_else(|| setting(credential_key))
            .ok_or(ConfigError::MissingCredential(credential_key))?;

        let model = setting("LLM_MODEL").unwrap_or_else(|| provider.default_model().to_string());

        let llm_timeout = Duration::from_secs(parse_number(
            "LLM_TIMEOUT_SECS",
            setting("LLM_TIMEOUT_SECS"),
            DEFAULT_TIMEOUT_SECS,
        )?);
        let port = parse_number("PORT", setting("PORT"), DEFAULT_PORT)?;
        let max_upload_bytes = parse_number(
            "MAX_UPLOAD_BYTES",
            setting("MAX_UPLOAD_BYTES"),
            DEFAULT_MAX_UPLOAD_BYTES,
        )?;

        let ocr_engine = match setting("OCR_ENGINE") {
            Some(value) => OcrEngineKind::parse(&value)?,
            None => OcrEngineKind::Vision,
        };

        info!(
            provider = ?provider,
            model = %model,
            timeout_secs = llm_timeout.as_secs(),
            ocr_engine = ?ocr_engine,
            "Configuration resolved"
        );

        Ok(Self {
            provider,
            api_key,
            model,
            base_url: setting("LLM_BASE_URL"),
            llm_timeout,
            port,
            max_upload_bytes,
            ocr_engine,
        })
    }
}

fn parse_number<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match value {
        None => Ok(default),
        Some(raw) => match raw.parse::<T>() {
            Ok(parsed) if parsed > T::default() => Ok(parsed),
            _ => Err(ConfigError::InvalidNumber { key, value: raw }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn missing_credential_is_fatal() {
        let err = AppConfig::from_sources(env_of(&[]), &Secrets::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential("GEMINI_API_KEY")));
    }

    #[test]
    fn secrets_store_wins_over_environment() {
        let secrets = Secrets::parse("GEMINI_API_KEY = \"from-secrets\"").unwrap();
        let config =
            AppConfig::from_sources(env_of(&[("GEMINI_API_KEY", "from-env")]), &secrets).unwrap();
        assert_eq!(config.api_key, "from-secrets");
        assert_eq!(config.provider, LlmProvider::Gemini);
        assert_eq!(config.model, "gemini-1.5-flash");
        assert_eq!(config.llm_timeout, Duration::from_secs(60));
        assert_eq!(config.port, 3000);
        assert_eq!(config.ocr_engine, OcrEngineKind::Vision);
    }

    #[test]
    fn blank_secret_falls_back_to_environment() {
        let secrets = Secrets::parse("GEMINI_API_KEY = \"  \"").unwrap();
        let config =
            AppConfig::from_sources(env_of(&[("GEMINI_API_KEY", "from-env")]), &secrets).unwrap();
        assert_eq!(config.api_key, "from-env");
    }

    #[test]
    fn openrouter_needs_its_own_key() {
        let env = env_of(&[("LLM_PROVIDER", "OpenRouter"), ("GEMINI_API_KEY", "g")]);
        let err = AppConfig::from_sources(env, &Secrets::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential("OPENROUTER_API_KEY")));

        let env = env_of(&[
            ("LLM_PROVIDER", "openrouter"),
            ("OPENROUTER_API_KEY", "k"),
            ("LLM_TIMEOUT_SECS", "15"),
            ("OCR_ENGINE", "tesseract"),
        ]);
        let config = AppConfig::from_sources(env, &Secrets::default()).unwrap();
        assert_eq!(config.model, "openai/gpt-4o-mini");
        assert_eq!(config.llm_timeout, Duration::from_secs(15));
        assert_eq!(config.ocr_engine, OcrEngineKind::Tesseract);
    }

    #[test]
    fn rejects_bad_settings() {
        let env = env_of(&[("GEMINI_API_KEY", "k"), ("PORT", "0")]);
        assert!(matches!(
            AppConfig::from_sources(env, &Secrets::default()),
            Err(ConfigError::InvalidNumber { key: "PORT", .. })
        ));

        let env = env_of(&[("GEMINI_API_KEY", "k"), ("LLM_PROVIDER", "mystery")]);
        assert!(matches!(
            AppConfig::from_sources(env, &Secrets::default()),
            Err(ConfigError::UnknownProvider(_))
        ));
    }

    #[test]
    fn absent_secrets_file_is_empty() {
        let secrets = Secrets::load(Path::new("/definitely/not/here/secrets.toml")).unwrap();
        assert!(secrets.get("GEMINI_API_KEY").is_none());
    }
}
