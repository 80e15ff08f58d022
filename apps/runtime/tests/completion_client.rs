//! Completion client integration tests
//!
//! A stub chat completion endpoint served by axum on an ephemeral port stands
//! in for the remote deployment. Each stub counts the requests it receives so
//! retry behaviour can be asserted exactly.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swarm_runtime::llm::{
    ApiClientConfig, ApiClientError, ApiErrorKind, ChatCompletionRequest, ChatMessage, CompletionClient,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// What the stub answers on a given call
struct Reply {
    status: StatusCode,
    content_type: &'static str,
    body: String,
    delay: Duration,
}

impl Reply {
    fn json(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    fn event_stream(body: String) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "text/event-stream",
            body,
            delay: Duration::ZERO,
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Script = Arc<dyn Fn(usize) -> Reply + Send + Sync>;

#[derive(Clone)]
struct Stub {
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
    script: Script,
}

#[derive(Debug, Clone)]
struct SeenRequest {
    deployment: String,
    api_version: Option<String>,
    api_key: Option<String>,
    body: Value,
}

async fn completions(
    State(stub): State<Stub>,
    Path(deployment): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let call = stub.calls.fetch_add(1, Ordering::SeqCst);
    stub.seen.lock().unwrap().push(SeenRequest {
        deployment,
        api_version: query.get("api-version").cloned(),
        api_key: headers
            .get("api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: serde_json::from_str(&body).unwrap_or(Value::Null),
    });

    let reply = (stub.script)(call);
    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }
    (reply.status, [(header::CONTENT_TYPE, reply.content_type)], reply.body).into_response()
}

/// Serve `script` on an ephemeral port and return the base URL with the stub
async fn serve(script: impl Fn(usize) -> Reply + Send + Sync + 'static) -> (String, Stub) {
    let stub = Stub {
        calls: Arc::new(AtomicUsize::new(0)),
        seen: Arc::new(Mutex::new(Vec::new())),
        script: Arc::new(script),
    };
    let app = Router::new()
        .route("/openai/deployments/:deployment/chat/completions", post(completions))
        .with_state(stub.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub listener");
    let addr = listener.local_addr().expect("stub address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("stub server");
    });

    (format!("http://{}", addr), stub)
}

fn client_for(endpoint: &str) -> CompletionClient {
    let mut config = ApiClientConfig::new(endpoint, "test-key", "gpt-test");
    config.retry_delay = Duration::from_millis(10);
    config.max_retry_delay = Duration::from_millis(50);
    config.timeout = Duration::from_secs(5);
    config.requests_per_minute = 6_000;
    CompletionClient::new(config).expect("valid config")
}

fn completion_body(content: &str) -> Value {
    json!({
        "id": "cmpl-1",
        "object": "chat.completion",
        "created": 1,
        "model": "gpt-test",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
    })
}

fn chunk_line(content: &str) -> String {
    let chunk = json!({
        "id": "chunk",
        "object": "chat.completion.chunk",
        "created": 1,
        "model": "gpt-test",
        "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
    });
    format!("data: {}\n\n", chunk)
}

fn request() -> ChatCompletionRequest {
    ChatCompletionRequest::new(vec![ChatMessage::system("be brief"), ChatMessage::user("hello")])
}

#[tokio::test]
async fn test_server_error_then_success_makes_two_calls() {
    let (endpoint, stub) = serve(|call| {
        if call == 0 {
            Reply::json(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": {"message": "try later"}}))
        } else {
            Reply::json(StatusCode::OK, completion_body("hi there"))
        }
    })
    .await;

    let response = client_for(&endpoint)
        .create_chat_completion(&request())
        .await
        .expect("second attempt succeeds");

    assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
    assert_eq!(response.first_content(), Some("hi there"));
    assert_eq!(response.usage.unwrap().total_tokens, 4);
}

#[tokio::test]
async fn test_bad_request_is_terminal_after_one_call() {
    let (endpoint, stub) = serve(|_| {
        Reply::json(
            StatusCode::BAD_REQUEST,
            json!({"error": {"code": "invalid_messages", "message": "messages must not be empty"}}),
        )
    })
    .await;

    let error = client_for(&endpoint)
        .create_chat_completion(&request())
        .await
        .unwrap_err();

    assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    assert_eq!(error.kind(), ApiErrorKind::Http);
    assert_eq!(error.status(), Some(400));
    assert_eq!(error.code(), "invalid_messages");
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn test_rate_limited_until_retries_run_out() {
    let (endpoint, stub) = serve(|_| Reply::json(StatusCode::TOO_MANY_REQUESTS, json!({})))
        .await;

    let error = client_for(&endpoint)
        .create_chat_completion(&request())
        .await
        .unwrap_err();

    // one attempt plus three retries
    assert_eq!(stub.calls.load(Ordering::SeqCst), 4);
    assert_eq!(error.status(), Some(429));
    assert!(error.is_retryable());
}

#[tokio::test]
async fn test_slow_attempt_times_out_and_next_gets_fresh_budget() {
    let (endpoint, stub) = serve(|call| {
        let reply = Reply::json(StatusCode::OK, completion_body("eventually"));
        if call == 0 {
            reply.delayed(Duration::from_millis(600))
        } else {
            reply
        }
    })
    .await;
    let mut config = ApiClientConfig::new(&endpoint, "test-key", "gpt-test");
    config.retry_delay = Duration::from_millis(10);
    config.timeout = Duration::from_millis(200);
    let client = CompletionClient::new(config).unwrap();

    let response = client.create_chat_completion(&request()).await.unwrap();

    assert_eq!(response.first_content(), Some("eventually"));
    assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_request_carries_credentials_route_and_body() {
    let (endpoint, stub) = serve(|_| Reply::json(StatusCode::OK, completion_body("ok"))).await;
    let mut request = request();
    request.temperature = Some(0.2);

    client_for(&endpoint).create_chat_completion(&request).await.unwrap();

    let seen = stub.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].deployment, "gpt-test");
    assert_eq!(seen[0].api_version.as_deref(), Some("2024-02-15-preview"));
    assert_eq!(seen[0].api_key.as_deref(), Some("test-key"));
    assert_eq!(seen[0].body["messages"][1]["content"], "hello");
    assert!(seen[0].body.get("stream").is_none());
}

#[tokio::test]
async fn test_unreachable_endpoint_is_a_retryable_network_error() {
    // bind then drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = ApiClientConfig::new(format!("http://{}", addr), "k", "d");
    config.max_retries = 1;
    config.retry_delay = Duration::from_millis(5);
    let error = CompletionClient::new(config)
        .unwrap()
        .create_chat_completion(&request())
        .await
        .unwrap_err();

    assert!(matches!(error, ApiClientError::Network(_)));
    assert!(error.is_retryable());
}

/// Read one HTTP request, headers and declared body
async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return;
            }
        }
    }
}

#[tokio::test]
async fn test_body_cut_off_mid_read_is_retried() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let served = Arc::clone(&calls);
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let call = served.fetch_add(1, Ordering::SeqCst);
            let response = if call == 0 {
                // promise 500 bytes, send a few, hang up
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 500\r\nconnection: close\r\n\r\n{\"id\":"
                    .to_string()
            } else {
                let body = completion_body("recovered").to_string();
                format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                )
            };
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
    });

    let response = client_for(&format!("http://{}", addr))
        .create_chat_completion(&request())
        .await
        .expect("second attempt succeeds");

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(response.first_content(), Some("recovered"));
}

#[tokio::test]
async fn test_stream_yields_chunks_in_order() {
    let (endpoint, stub) = serve(|_| {
        Reply::event_stream(format!(
            "{}{}{}data: [DONE]\n\n",
            chunk_line("one"),
            chunk_line("two"),
            chunk_line("three")
        ))
    })
    .await;

    let stream = client_for(&endpoint)
        .create_chat_completion_stream(&request())
        .await
        .unwrap();
    let contents: Vec<String> = stream
        .map(|chunk| chunk.unwrap().delta_content().unwrap_or_default().to_string())
        .collect()
        .await;

    assert_eq!(contents, vec!["one", "two", "three"]);
    let seen = stub.seen.lock().unwrap().clone();
    assert_eq!(seen[0].body["stream"], true);
}

#[tokio::test]
async fn test_stream_skips_malformed_line() {
    let (endpoint, _stub) = serve(|_| {
        Reply::event_stream(format!(
            "{}data: {{not json\n\n{}{}data: [DONE]\n\n",
            chunk_line("a"),
            chunk_line("b"),
            chunk_line("c")
        ))
    })
    .await;

    let stream = client_for(&endpoint)
        .create_chat_completion_stream(&request())
        .await
        .unwrap();
    let contents: Vec<String> = stream
        .map(|chunk| chunk.unwrap().delta_content().unwrap_or_default().to_string())
        .collect()
        .await;

    assert_eq!(contents, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_stream_setup_is_retried() {
    let (endpoint, stub) = serve(|call| {
        if call == 0 {
            Reply::json(StatusCode::SERVICE_UNAVAILABLE, json!({}))
        } else {
            Reply::event_stream(format!("{}data: [DONE]\n\n", chunk_line("up")))
        }
    })
    .await;

    let mut stream = client_for(&endpoint)
        .create_chat_completion_stream(&request())
        .await
        .unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.delta_content(), Some("up"));
    assert!(stream.next().await.is_none());
    assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
}
