//! Shared test doubles for loop tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use stepwise_core::error::{ProviderError, ToolError};
use stepwise_core::provider::{
    ChunkReceiver, CompletionRequest, ModelService, StreamChunk, completed_stream,
};
use stepwise_core::tool::{Tool, ToolContext, ToolResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type Responder = Box<dyn Fn(usize) -> Result<String, ProviderError> + Send + Sync>;

/// A model that replies from a script and records every request.
///
/// Asking for more replies than the script holds panics inside the loop,
/// which `AgentLoop::run` turns into `LoopOutcome::Failed`. Tests that care
/// about extra calls assert on `call_count` or the outcome.
pub struct ScriptedModel {
    responder: Responder,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    /// Reply with `responses` in order.
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let responses: Vec<String> = responses.into_iter().map(Into::into).collect();
        Self::from_fn(move |call| match responses.get(call) {
            Some(text) => Ok(text.clone()),
            None => panic!(
                "ScriptedModel: no more responses (call #{call}, have {})",
                responses.len()
            ),
        })
    }

    /// Reply with whatever `f` returns for the zero-based call index.
    pub fn from_fn(
        f: impl Fn(usize) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(f),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fail every call with `error`.
    pub fn failing(error: ProviderError) -> Self {
        Self::from_fn(move |_| Err(error.clone()))
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Content of the last message sent on call `index`.
    pub fn last_message(&self, index: usize) -> String {
        let requests = self.requests.lock().unwrap();
        requests[index].messages.last().unwrap().content.clone()
    }
}

#[async_trait]
impl ModelService for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        _cancel: &CancellationToken,
    ) -> Result<ChunkReceiver, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len() - 1
        };
        (self.responder)(call).map(|text| completed_stream(text))
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec!["scripted-model".into()])
    }
}

/// A model whose stream starts but never finishes.
#[derive(Default)]
pub struct HangingModel {
    senders: Mutex<Vec<mpsc::Sender<Result<StreamChunk, ProviderError>>>>,
    hang_listing: bool,
}

impl HangingModel {
    /// Also never answers `list_models`.
    pub fn unlisted() -> Self {
        Self {
            hang_listing: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ModelService for HangingModel {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn stream(
        &self,
        _request: CompletionRequest,
        _cancel: &CancellationToken,
    ) -> Result<ChunkReceiver, ProviderError> {
        let (tx, rx) = mpsc::channel(4);
        let _ = tx.try_send(Ok(StreamChunk::text("{\"type\":")));
        self.senders.lock().unwrap().push(tx);
        Ok(rx)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        if self.hang_listing {
            std::future::pending::<()>().await;
        }
        Ok(Vec::new())
    }
}

/// A tool that counts its executions and echoes its input.
pub struct CountingTool {
    name: String,
    calls: Arc<AtomicUsize>,
}

impl CountingTool {
    pub fn new(name: &str) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                name: name.to_string(),
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Counts calls and echoes input"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ToolResult::success(format!("{} call {n}: {input}", self.name)))
    }
}

/// A tool that always panics.
pub struct PanickingTool;

#[async_trait]
impl Tool for PanickingTool {
    fn name(&self) -> &str {
        "explode"
    }

    fn description(&self) -> &str {
        "Always panics"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        _input: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        panic!("tool blew up");
    }
}

/// Wire form of a tool action.
pub fn tool_action(name: &str, input: serde_json::Value) -> String {
    serde_json::json!({"type": "tool", "tool": name, "input": input}).to_string()
}

/// Wire form of a final action.
pub fn final_action(content: &str) -> String {
    serde_json::json!({"type": "final", "content": content}).to_string()
}
