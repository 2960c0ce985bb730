//! OpenAI-compatible model service.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, LM Studio, and any
//! endpoint exposing `/v1/chat/completions` with SSE streaming.
//!
//! Supports:
//! - Streaming chat completions, stopped promptly on cancellation
//! - Model listing (used for lazy default-model selection)

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use stepwise_core::error::ProviderError;
use stepwise_core::message::{Message, Role};
use stepwise_core::provider::{ChunkReceiver, CompletionRequest, ModelService, StreamChunk};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible model service.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new(
            "openrouter",
            "https://openrouter.ai/api/v1",
            Some(api_key.into()),
            Duration::from_secs(120),
        )
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Result<Self, ProviderError> {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            None,
            Duration::from_secs(300),
        )
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                },
                content: m.content.clone(),
            })
            .collect()
    }

    fn request_body(request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": true,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        body
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }
}

/// Map non-success HTTP statuses onto provider errors.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ));
    }

    if status == 404 {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::ModelNotFound(body));
    }

    if !(200..300).contains(&status) {
        let error_body = response.text().await.unwrap_or_default();
        warn!(status, body = %error_body, "Provider returned error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

fn network_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// One parsed line of an SSE body.
#[derive(Debug, PartialEq)]
enum SseLine {
    /// Blank line, comment, non-data field, or a chunk without text
    Skip,
    /// `data: [DONE]`
    Done,
    /// A content delta
    Delta(String),
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();

    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<StreamResponse>(data) {
        Ok(resp) => resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty())
            .map(SseLine::Delta)
            .unwrap_or(SseLine::Skip),
        Err(e) => {
            trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
            SseLine::Skip
        }
    }
}

#[async_trait]
impl ModelService for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<ChunkReceiver, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let send = self
            .authorized(self.client.post(&url))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            response = send => response.map_err(network_error)?,
        };
        let response = check_status(response).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let cancel = cancel.clone();
        let provider_name = self.name.clone();

        // Read the SSE byte stream on a separate task; it stops as soon as
        // the request is cancelled or the receiver is dropped.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(provider = %provider_name, "Stream cancelled");
                        return;
                    }
                    next = byte_stream.next() => next,
                };

                let bytes = match next {
                    Some(Ok(b)) => b,
                    Some(Err(e)) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                    None => break,
                };
                buffer.extend_from_slice(&bytes);

                while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
                    let line_bytes: Vec<u8> = buffer.drain(..=line_end).collect();
                    let line = String::from_utf8_lossy(&line_bytes);
                    let line = line.trim_end_matches(['\r', '\n']);

                    match parse_sse_line(line) {
                        SseLine::Skip => {}
                        SseLine::Done => {
                            let _ = tx.send(Ok(StreamChunk::finished())).await;
                            return;
                        }
                        SseLine::Delta(content) => {
                            if tx.send(Ok(StreamChunk::text(content))).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(StreamChunk::finished())).await;
        });

        Ok(rx)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(network_error)?;
        let response = check_status(response).await?;

        let body: ModelList = response
            .json()
            .await
            .map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse model list: {e}"),
            })?;

        Ok(body.data.into_iter().map(|m| m.id).collect())
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new(
            "test",
            server.uri(),
            Some("test_key".into()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn sse_body(deltas: &[&str]) -> String {
        let mut body = String::new();
        for d in deltas {
            let chunk = serde_json::json!({
                "choices": [{ "delta": { "content": d }, "finish_reason": null }]
            });
            body.push_str(&format!("data: {chunk}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    #[test]
    fn openrouter_constructor() {
        let p = OpenAiCompatProvider::openrouter("sk-test").unwrap();
        assert_eq!(p.name(), "openrouter");
        assert!(p.base_url.contains("openrouter.ai"));
    }

    #[test]
    fn ollama_constructor_needs_no_key() {
        let p = OpenAiCompatProvider::ollama(None).unwrap();
        assert_eq!(p.name(), "ollama");
        assert!(p.api_key.is_none());
    }

    #[test]
    fn message_conversion() {
        let msgs = vec![Message::user("Hello"), Message::assistant("Hi there")];
        let api = OpenAiCompatProvider::to_api_messages(&msgs);
        assert_eq!(api[0].role, "user");
        assert_eq!(api[1].role, "assistant");
        assert_eq!(api[1].content, "Hi there");
    }

    #[test]
    fn request_body_includes_max_tokens_only_when_set() {
        let mut req = CompletionRequest::new("m", vec![Message::user("x")]);
        assert!(OpenAiCompatProvider::request_body(&req).get("max_tokens").is_none());
        req.max_tokens = Some(256);
        let body = OpenAiCompatProvider::request_body(&req);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn parse_stream_content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        assert_eq!(parse_sse_line(line), SseLine::Delta("Hel".into()));
    }

    #[test]
    fn parse_stream_non_data_lines() {
        assert_eq!(parse_sse_line(""), SseLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(parse_sse_line("event: message"), SseLine::Skip);
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
    }

    #[test]
    fn parse_stream_empty_and_garbage_deltas() {
        let finish = r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert_eq!(parse_sse_line(finish), SseLine::Skip);
        assert_eq!(parse_sse_line("data: {not json"), SseLine::Skip);
    }

    #[tokio::test]
    async fn complete_collects_streamed_deltas() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test_key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(sse_body(&[r#"{"type":"final","#, r#""content":"done"}"#]), "text/event-stream"),
            )
            .mount(&server)
            .await;

        let text = provider(&server)
            .complete(
                CompletionRequest::new("m", vec![Message::user("hi")]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(text, r#"{"type":"final","content":"done"}"#);
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = provider(&server)
            .complete(CompletionRequest::new("m", vec![]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn server_error_maps_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .complete(CompletionRequest::new("m", vec![]), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ProviderError::ApiError {
                status_code,
                message,
            } => {
                assert_eq!(status_code, 500);
                assert_eq!(message, "overloaded");
            }
            other => panic!("expected ApiError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_before_send() {
        let server = MockServer::start().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = provider(&server)
            .stream(CompletionRequest::new("m", vec![]), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
    }

    #[tokio::test]
    async fn list_models_reads_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"id": "qwen2.5-coder"}, {"id": "llama3.1"}]
            })))
            .mount(&server)
            .await;

        let models = provider(&server).list_models().await.unwrap();
        assert_eq!(models, ["qwen2.5-coder", "llama3.1"]);
    }
}
