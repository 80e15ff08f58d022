// Resilient API client for a remote chat completion endpoint
//
// Bounded retry with exponential backoff, a shared continuous token bucket,
// and server-sent event streaming.

pub mod client;
pub mod config;
pub mod errors;
pub mod rate_limit;
pub mod retry;
pub mod stream;
pub mod types;

pub use client::CompletionClient;
pub use config::ApiClientConfig;
pub use errors::{ApiClientError, ApiErrorKind, ApiResult};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use stream::ChunkStream;
pub use types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, FunctionDefinition,
    ToolDefinition,
};
