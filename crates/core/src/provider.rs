//! Model service trait: the abstraction over LLM backends.
//!
//! A `ModelService` streams a completion for a list of messages. The agent
//! loop only ever needs the whole completion as one string, so the provided
//! [`ModelService::complete`] collects the stream, stopping as soon as the
//! cancellation token fires.
//!
//! Implementations: OpenAI-compatible endpoints (see `stepwise-providers`),
//! scripted models in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::Message;

/// A request for one completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model hint (e.g., "openai/gpt-4o-mini")
    pub model: String,

    /// The transcript so far
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.2
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,
}

impl StreamChunk {
    /// A content delta.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            done: false,
        }
    }

    /// The end-of-stream marker.
    pub fn finished() -> Self {
        Self {
            content: None,
            done: true,
        }
    }
}

/// Receiving half of a completion stream.
pub type ChunkReceiver = mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// A stream that yields `text` as a single, final chunk.
pub fn completed_stream(text: impl Into<String>) -> ChunkReceiver {
    let (tx, rx) = mpsc::channel(1);
    let _ = tx.try_send(Ok(StreamChunk {
        content: Some(text.into()),
        done: true,
    }));
    rx
}

/// Collect a completion stream into one string.
///
/// Returns `ProviderError::Cancelled` as soon as `cancel` fires, even when
/// the producer is still sending.
pub async fn collect_stream(
    mut rx: ChunkReceiver,
    cancel: &CancellationToken,
) -> std::result::Result<String, ProviderError> {
    let mut text = String::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            next = rx.recv() => match next {
                Some(Ok(chunk)) => {
                    if let Some(content) = chunk.content {
                        text.push_str(&content);
                    }
                    if chunk.done {
                        break;
                    }
                }
                Some(Err(e)) => return Err(e),
                None => break,
            },
        }
    }
    Ok(text)
}

/// The Model Invocation Service.
///
/// Every LLM backend implements this trait. The agent loop calls
/// `complete()` without knowing which backend is being used.
#[async_trait]
pub trait ModelService: Send + Sync {
    /// A human-readable name for this service (e.g., "openrouter").
    fn name(&self) -> &str;

    /// Start a completion and return a stream of chunks.
    ///
    /// Implementations should check `cancel` before doing any I/O and stop
    /// producing chunks once it fires.
    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<ChunkReceiver, ProviderError>;

    /// Run a completion and collect the streamed response into one string.
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        let rx = self.stream(request, cancel).await?;
        collect_stream(rx, cancel).await
    }

    /// List available models for this service.
    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }
}
