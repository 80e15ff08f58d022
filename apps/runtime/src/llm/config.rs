use std::time::Duration;

use super::errors::{ApiClientError, ApiResult};

pub const DEFAULT_API_VERSION: &str = "2024-02-15-preview";

/// Settings for the completion client
///
/// `endpoint`, `api_key` and `deployment` are required; everything else has
/// a default.
#[derive(Clone)]
pub struct ApiClientConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
    pub max_retries: u32,
    /// Base delay before the first retry, doubled on every further attempt
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Budget for a single attempt
    pub timeout: Duration,
    pub requests_per_minute: u32,
}

impl ApiClientConfig {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            deployment: deployment.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            max_retry_delay: Duration::from_millis(30_000),
            timeout: Duration::from_millis(60_000),
            requests_per_minute: 60,
        }
    }

    /// Build from the environment (and `.env` when present)
    ///
    /// Required: `AZURE_OPENAI_ENDPOINT`, `AZURE_OPENAI_API_KEY`,
    /// `AZURE_OPENAI_DEPLOYMENT`. Optional: `AZURE_OPENAI_API_VERSION`,
    /// `LLM_MAX_RETRIES`, `LLM_RETRY_DELAY_MS`, `LLM_MAX_RETRY_DELAY_MS`,
    /// `LLM_TIMEOUT_MS`, `LLM_REQUESTS_PER_MINUTE`.
    pub fn from_env() -> ApiResult<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::new(
            std::env::var("AZURE_OPENAI_ENDPOINT").unwrap_or_default(),
            std::env::var("AZURE_OPENAI_API_KEY").unwrap_or_default(),
            std::env::var("AZURE_OPENAI_DEPLOYMENT").unwrap_or_default(),
        );

        if let Ok(version) = std::env::var("AZURE_OPENAI_API_VERSION") {
            config.api_version = version;
        }
        if let Some(n) = optional_env("LLM_MAX_RETRIES")? {
            config.max_retries = n;
        }
        if let Some(ms) = optional_env("LLM_RETRY_DELAY_MS")? {
            config.retry_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = optional_env("LLM_MAX_RETRY_DELAY_MS")? {
            config.max_retry_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = optional_env("LLM_TIMEOUT_MS")? {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(n) = optional_env("LLM_REQUESTS_PER_MINUTE")? {
            config.requests_per_minute = n;
        }

        config.validate()?;
        Ok(config)
    }

    /// Fail fast on missing required settings
    pub fn validate(&self) -> ApiResult<()> {
        let required = [
            ("endpoint", &self.endpoint),
            ("api key", &self.api_key),
            ("deployment", &self.deployment),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(ApiClientError::Configuration(format!(
                "missing required setting(s): {}",
                missing.join(", ")
            )));
        }

        if self.requests_per_minute == 0 {
            return Err(ApiClientError::Configuration(
                "requests_per_minute must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint.trim_end_matches('/'),
            self.deployment,
            self.api_version
        )
    }
}

fn optional_env<T: std::str::FromStr>(name: &str) -> ApiResult<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ApiClientError::Configuration(format!("{} is not a valid number: {:?}", name, raw))),
        Err(_) => Ok(None),
    }
}

impl std::fmt::Debug for ApiClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClientConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("deployment", &self.deployment)
            .field("api_version", &self.api_version)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("max_retry_delay", &self.max_retry_delay)
            .field("timeout", &self.timeout)
            .field("requests_per_minute", &self.requests_per_minute)
            .finish()
    }
}
