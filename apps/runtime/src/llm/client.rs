// Resilient chat completion client
//
// Every logical request runs through one pipeline: take a rate-limit token,
// make a single attempt under its own timeout, classify the outcome, and
// back off before the next attempt when the failure is retryable.

use reqwest::{Client, Response, StatusCode};
use std::sync::Arc;
use tracing::{debug, info};

use super::config::ApiClientConfig;
use super::errors::{ApiClientError, ApiResult};
use super::rate_limit::RateLimiter;
use super::retry::RetryPolicy;
use super::stream::{decode_event_stream, ChunkStream};
use super::types::{ChatCompletionRequest, ChatCompletionResponse, ErrorEnvelope};

const API_KEY_HEADER: &str = "api-key";

/// Client for a remote chat completion deployment
///
/// Cheap to share behind an `Arc`; all callers draw from the same token bucket.
pub struct CompletionClient {
    http: Client,
    config: ApiClientConfig,
    url: String,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl CompletionClient {
    /// Validate the configuration and build a client
    ///
    /// Missing endpoint, api key or deployment fails here and is never retried.
    pub fn new(config: ApiClientConfig) -> ApiResult<Self> {
        config.validate()?;

        let http = Client::builder()
            .build()
            .map_err(|e| ApiClientError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        let url = config.completions_url();
        let limiter = Arc::new(RateLimiter::per_minute(config.requests_per_minute));
        let retry = RetryPolicy::new(config.max_retries, config.retry_delay, config.max_retry_delay);

        info!(
            endpoint = %config.endpoint,
            deployment = %config.deployment,
            requests_per_minute = config.requests_per_minute,
            "completion client ready"
        );

        Ok(Self {
            http,
            config,
            url,
            limiter,
            retry,
        })
    }

    pub fn config(&self) -> &ApiClientConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Request a complete (non-streamed) chat completion
    pub async fn create_chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> ApiResult<ChatCompletionResponse> {
        if request.is_streaming() {
            return Err(ApiClientError::InvalidRequest(
                "stream=true is not supported here; use create_chat_completion_stream".to_string(),
            ));
        }

        let timeout = self.config.timeout;
        self.retry
            .run(&self.limiter, |attempt| async move {
                debug!(attempt, "sending chat completion request");
                let exchange = async {
                    let response = self.send(request).await?;
                    // a body cut off mid-read is a transport failure, not a bad payload
                    let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
                    serde_json::from_slice::<ChatCompletionResponse>(&body)
                        .map_err(|e| ApiClientError::Decode(e.to_string()))
                };
                tokio::time::timeout(timeout, exchange)
                    .await
                    .map_err(|_| ApiClientError::Timeout(timeout))?
            })
            .await
    }

    /// Request a streamed chat completion
    ///
    /// Retries cover establishing the stream; once chunks flow, a body error
    /// ends the stream with that error.
    pub async fn create_chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> ApiResult<ChunkStream> {
        let mut request = request.clone();
        request.stream = Some(true);
        let request = &request;

        let timeout = self.config.timeout;
        let response = self
            .retry
            .run(&self.limiter, |attempt| async move {
                debug!(attempt, "opening chat completion stream");
                tokio::time::timeout(timeout, self.send(request))
                    .await
                    .map_err(|_| ApiClientError::Timeout(timeout))?
            })
            .await?;

        Ok(decode_event_stream(response.bytes_stream()))
    }

    /// One HTTP attempt; non-success statuses become [`ApiClientError::Http`]
    async fn send(&self, request: &ChatCompletionRequest) -> ApiResult<Response> {
        let response = self
            .http
            .post(&self.url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(http_error(status, &body))
    }

    fn transport_error(&self, e: reqwest::Error) -> ApiClientError {
        if e.is_timeout() {
            ApiClientError::Timeout(self.config.timeout)
        } else {
            ApiClientError::Network(e.to_string())
        }
    }
}

fn http_error(status: StatusCode, body: &str) -> ApiClientError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();

    let code = parsed
        .as_ref()
        .and_then(|envelope| envelope.error.code.as_ref())
        .map(|code| match code {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| format!("http_{}", status.as_u16()));

    let message = parsed
        .and_then(|envelope| envelope.error.message)
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                body.to_string()
            }
        });

    ApiClientError::Http {
        status: status.as_u16(),
        code,
        message,
    }
}

impl std::fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionClient")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ChatMessage;

    fn config() -> ApiClientConfig {
        ApiClientConfig::new("http://127.0.0.1:9", "key", "gpt")
    }

    #[test]
    fn test_construction_fails_fast_on_missing_credential() {
        let mut config = config();
        config.api_key = String::new();

        let error = CompletionClient::new(config).unwrap_err();

        assert!(matches!(error, ApiClientError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_streaming_flag_is_rejected_before_any_request() {
        let mut config = config();
        config.requests_per_minute = 1;
        let client = CompletionClient::new(config).unwrap();
        let mut request = ChatCompletionRequest::new(vec![ChatMessage::user("hi")]);
        request.stream = Some(true);

        let error = client.create_chat_completion(&request).await.unwrap_err();

        assert!(matches!(error, ApiClientError::InvalidRequest(_)));
        // the single admission is still unused
        assert!(client.rate_limiter().try_acquire());
    }

    #[test]
    fn test_http_error_prefers_remote_code() {
        let error = http_error(
            StatusCode::BAD_REQUEST,
            r#"{"error": {"code": "context_length_exceeded", "message": "too long"}}"#,
        );

        assert_eq!(error.status(), Some(400));
        assert_eq!(error.code(), "context_length_exceeded");
        assert!(!error.is_retryable());
        assert!(error.to_string().contains("too long"));
    }

    #[test]
    fn test_http_error_without_body() {
        let error = http_error(StatusCode::SERVICE_UNAVAILABLE, "");

        assert_eq!(error.code(), "http_503");
        assert!(error.is_retryable());
    }
}
