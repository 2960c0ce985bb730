//! The agent loop controller.
//!
//! One request runs as a bounded cycle:
//!
//! ```text
//! AwaitingModel -> ParsingAction -> DispatchingTool | Finalizing | Retrying -> AwaitingModel
//! ```
//!
//! ending in `Done`, `Exhausted` or `Failed`. Each request owns a fresh
//! [`LoopState`]; the only state shared between requests is the
//! [`ModelSelector`].
//!
//! Termination is guaranteed within `max_iterations + 1` model calls: once
//! the budget is spent, one forced call asks for a final answer and whatever
//! comes back ends the request.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use stepwise_config::AppConfig;
use stepwise_core::error::{Error, ProviderError};
use stepwise_core::history::HistoryTurn;
use stepwise_core::message::{Message, Transcript};
use stepwise_core::provider::{CompletionRequest, ModelService};
use stepwise_core::tool::{ToolContext, ToolRegistry, ToolResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{Action, format_observation, parse_action, signature};
use crate::guards::{ParseFailureGuard, RefusalGuard, RepeatCheck, RepeatGuard};
use crate::model_selection::ModelSelector;
use crate::prompt::{
    CAPABILITY_RETRY, FORCED_FINAL, FORMAT_RETRY, REPEAT_WARNING, controlling_prompt,
};
use crate::stream_event::LoopEvent;
use crate::transcript::build_transcript;

/// Message surfaced when a request is cancelled.
pub const CANCELLED_MESSAGE: &str = "request cancelled";

/// How a request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    /// The model gave a final answer.
    Answered { content: String, iterations: u32 },
    /// Two consecutive unparsable replies; the second one, verbatim.
    Degraded { raw: String },
    /// The iteration budget ran out; the forced reply (its content, or its
    /// raw text when it was not a final action).
    Exhausted { content: String },
    /// The model service failed, the request was cancelled, or the loop
    /// itself broke.
    Failed { message: String },
}

impl LoopOutcome {
    /// The text shown to the user.
    pub fn text(&self) -> &str {
        match self {
            Self::Answered { content, .. } | Self::Exhausted { content } => content,
            Self::Degraded { raw } => raw,
            Self::Failed { message } => message,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    fn terminal_event(&self) -> LoopEvent {
        match self {
            Self::Failed { message } => LoopEvent::Failure {
                message: message.clone(),
            },
            other => LoopEvent::Answer {
                content: other.text().to_string(),
            },
        }
    }
}

/// Per-request state, discarded when the request ends.
struct LoopState {
    iteration_count: u32,
    transcript: Transcript,
    repeats: RepeatGuard,
    parse_failures: ParseFailureGuard,
    refusals: RefusalGuard,
}

impl LoopState {
    /// Controlling prompt, then prior turns, then the new prompt.
    fn new(control: String, history: &[HistoryTurn], prompt: &str) -> Self {
        let seed = std::iter::once(Message::user(control))
            .chain(build_transcript(history))
            .chain(std::iter::once(Message::user(prompt)));
        Self {
            iteration_count: 0,
            transcript: Transcript::seeded(seed),
            repeats: RepeatGuard::new(),
            parse_failures: ParseFailureGuard::new(),
            refusals: RefusalGuard::new(),
        }
    }
}

/// What the controller does after handling one model reply.
enum Transition {
    AwaitModel,
    Finish(LoopOutcome),
}

/// The core agent loop that orchestrates model calls and tool execution.
pub struct AgentLoop {
    /// The model service to use
    service: Arc<dyn ModelService>,

    /// Tool registry
    tools: Arc<ToolRegistry>,

    /// Active model, configured or lazily resolved
    selector: ModelSelector,

    /// Model calls allowed before the forced final call
    max_iterations: u32,

    /// Temperature setting
    temperature: f32,

    /// Max tokens per model reply
    max_tokens: Option<u32>,

    /// Root directory handed to tools
    workspace: PathBuf,
}

impl AgentLoop {
    /// Create a new agent loop.
    pub fn new(service: Arc<dyn ModelService>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            service,
            tools,
            selector: ModelSelector::new(None),
            max_iterations: 10,
            temperature: 0.2,
            max_tokens: None,
            workspace: PathBuf::from("."),
        }
    }

    /// Create an agent loop with every setting taken from `config`.
    pub fn from_config(
        service: Arc<dyn ModelService>,
        tools: Arc<ToolRegistry>,
        config: &AppConfig,
    ) -> Self {
        Self::new(service, tools)
            .with_model(config.model.clone())
            .with_max_iterations(config.agent.max_iterations)
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
            .with_workspace(config.tools.workspace_root())
    }

    /// Pin the model. `None` means "first model the service lists".
    pub fn with_model(self, model: Option<String>) -> Self {
        self.selector.reconfigure(model);
        self
    }

    /// Set the maximum number of model calls before the forced final call.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the default max tokens per model reply.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    /// Apply a configuration change to the model choice.
    ///
    /// Any lazily resolved default model is forgotten.
    pub fn reconfigure_model(&self, model: Option<String>) {
        self.selector.reconfigure(model);
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run one request to completion.
    ///
    /// Progress and warnings go to `events` as they happen; exactly one
    /// terminal event (`Answer` or `Failure`) is sent last. A closed
    /// receiver does not stop the loop.
    pub async fn run(
        &self,
        prompt: &str,
        history: &[HistoryTurn],
        events: &mpsc::Sender<LoopEvent>,
        cancel: &CancellationToken,
    ) -> LoopOutcome {
        info!(
            history_turns = history.len(),
            max_iterations = self.max_iterations,
            "Processing request"
        );

        let outcome = match AssertUnwindSafe(self.drive(prompt, history, events, cancel))
            .catch_unwind()
            .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(Error::Provider(ProviderError::Cancelled))) => LoopOutcome::Failed {
                message: CANCELLED_MESSAGE.into(),
            },
            Ok(Err(e)) => {
                warn!(error = %e, "Request failed");
                LoopOutcome::Failed {
                    message: e.to_string(),
                }
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                warn!(reason = %reason, "Agent loop panicked");
                LoopOutcome::Failed {
                    message: Error::Internal(reason).to_string(),
                }
            }
        };

        match &outcome {
            LoopOutcome::Answered { iterations, .. } => {
                info!(iterations, "Request answered")
            }
            LoopOutcome::Degraded { .. } => info!("Request ended with unparsable reply"),
            LoopOutcome::Exhausted { .. } => info!("Request ended after iteration budget"),
            LoopOutcome::Failed { message } => info!(message = %message, "Request failed"),
        }

        emit(events, outcome.terminal_event()).await;
        outcome
    }

    /// Run one request on a background task.
    ///
    /// The returned receiver yields the request's events and closes after
    /// the terminal one.
    pub fn spawn(
        self: Arc<Self>,
        prompt: String,
        history: Vec<HistoryTurn>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<LoopEvent> {
        let (tx, rx) = mpsc::channel(128);
        tokio::spawn(async move {
            self.run(&prompt, &history, &tx, &cancel).await;
        });
        rx
    }

    async fn drive(
        &self,
        prompt: &str,
        history: &[HistoryTurn],
        events: &mpsc::Sender<LoopEvent>,
        cancel: &CancellationToken,
    ) -> Result<LoopOutcome, Error> {
        let control = controlling_prompt(&self.tools.definitions());
        let mut state = LoopState::new(control, history, prompt);
        let model = self
            .selector
            .resolve(self.service.as_ref(), cancel)
            .await?;
        info!(
            transcript = %state.transcript.id,
            model = %model,
            history = history.len(),
            "Request started"
        );

        loop {
            state.iteration_count += 1;
            if state.iteration_count > self.max_iterations {
                return self.force_final(&mut state, &model, events, cancel).await;
            }
            debug!(
                transcript = %state.transcript.id,
                iteration = state.iteration_count,
                "Awaiting model"
            );

            let raw = self.call_model(&mut state, &model, events, cancel).await?;
            match self.handle_reply(&mut state, raw, events, cancel).await {
                Transition::AwaitModel => continue,
                Transition::Finish(outcome) => return Ok(outcome),
            }
        }
    }

    /// Ask the model for its next reply and record it.
    ///
    /// The raw reply is appended whether or not it parses.
    async fn call_model(
        &self,
        state: &mut LoopState,
        model: &str,
        events: &mpsc::Sender<LoopEvent>,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled.into());
        }

        emit(
            events,
            LoopEvent::Progress {
                message: format!("Asking {model}"),
            },
        )
        .await;

        let request = CompletionRequest {
            model: model.to_string(),
            messages: state.transcript.messages().to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let raw = self.service.complete(request, cancel).await?;
        state.transcript.push(Message::assistant(raw.clone()));
        Ok(raw)
    }

    async fn handle_reply(
        &self,
        state: &mut LoopState,
        raw: String,
        events: &mpsc::Sender<LoopEvent>,
        cancel: &CancellationToken,
    ) -> Transition {
        let Some(action) = parse_action(&raw) else {
            return self.retry_format(state, raw, events).await;
        };
        state.parse_failures.record_success();

        match action {
            Action::Final { content } => {
                if state.refusals.should_retry(&content) {
                    warn!(
                        transcript = %state.transcript.id,
                        iteration = state.iteration_count,
                        "Final answer claims a missing capability, retrying"
                    );
                    state.transcript.push(Message::user(CAPABILITY_RETRY));
                    return Transition::AwaitModel;
                }
                debug!(iteration = state.iteration_count, "Finalizing");
                Transition::Finish(LoopOutcome::Answered {
                    content,
                    iterations: state.iteration_count,
                })
            }
            Action::Tool { name, input } => {
                self.dispatch_tool(state, name, input, events, cancel).await;
                Transition::AwaitModel
            }
        }
    }

    async fn retry_format(
        &self,
        state: &mut LoopState,
        raw: String,
        events: &mpsc::Sender<LoopEvent>,
    ) -> Transition {
        if state.parse_failures.record_failure() {
            warn!(
                transcript = %state.transcript.id,
                iteration = state.iteration_count,
                failures = state.parse_failures.consecutive(),
                "Giving up on unparsable replies"
            );
            emit(
                events,
                LoopEvent::Warning {
                    message: "The model did not follow the action format; showing its reply as is."
                        .into(),
                },
            )
            .await;
            return Transition::Finish(LoopOutcome::Degraded { raw });
        }

        warn!(
            transcript = %state.transcript.id,
            iteration = state.iteration_count,
            "Unparsable reply, retrying"
        );
        emit(
            events,
            LoopEvent::Warning {
                message: "The model reply was not a valid action; asking again.".into(),
            },
        )
        .await;
        state.transcript.push(Message::user(FORMAT_RETRY));
        Transition::AwaitModel
    }

    async fn dispatch_tool(
        &self,
        state: &mut LoopState,
        name: String,
        input: serde_json::Value,
        events: &mpsc::Sender<LoopEvent>,
        cancel: &CancellationToken,
    ) {
        let signature = signature(&name, &input);

        let result = match state.repeats.check(&signature) {
            RepeatCheck::Blocked { consecutive } => {
                warn!(
                    transcript = %state.transcript.id,
                    tool = %name,
                    signature = %signature,
                    consecutive,
                    "Blocking repeated tool call"
                );
                emit(
                    events,
                    LoopEvent::Warning {
                        message: format!("Skipped repeated call to {name}"),
                    },
                )
                .await;
                ToolResult::failure(REPEAT_WARNING)
            }
            RepeatCheck::Allowed => {
                debug!(iteration = state.iteration_count, tool = %name, "Dispatching tool");
                emit(
                    events,
                    LoopEvent::Progress {
                        message: format!("Running {name}"),
                    },
                )
                .await;

                let ctx = ToolContext::new(cancel.clone(), self.workspace.clone());
                let result = self.tools.execute(&name, input, &ctx).await;
                if !result.ok {
                    let error = result.error.as_deref().unwrap_or("unknown error");
                    warn!(tool = %name, error = %error, "Tool call failed");
                    emit(
                        events,
                        LoopEvent::Warning {
                            message: format!("{name} failed: {error}"),
                        },
                    )
                    .await;
                }
                result
            }
        };

        state
            .transcript
            .push(Message::user(format_observation(&name, &result)));
    }

    /// The one extra call made after the iteration budget is spent.
    async fn force_final(
        &self,
        state: &mut LoopState,
        model: &str,
        events: &mpsc::Sender<LoopEvent>,
        cancel: &CancellationToken,
    ) -> Result<LoopOutcome, Error> {
        warn!(
            transcript = %state.transcript.id,
            max_iterations = self.max_iterations,
            "Iteration budget spent, forcing a final answer"
        );
        emit(
            events,
            LoopEvent::Warning {
                message: format!(
                    "Reached the limit of {} steps; asking for a final answer.",
                    self.max_iterations
                ),
            },
        )
        .await;

        state.transcript.push(Message::user(FORCED_FINAL));
        let raw = self.call_model(state, model, events, cancel).await?;

        let content = match parse_action(&raw) {
            Some(Action::Final { content }) => content,
            _ => raw,
        };
        Ok(LoopOutcome::Exhausted { content })
    }
}

/// Send an event; a dropped receiver is not an error for the loop.
async fn emit(events: &mpsc::Sender<LoopEvent>, event: LoopEvent) {
    if events.send(event).await.is_err() {
        debug!("Event receiver dropped");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "agent loop panicked".to_string()
    }
}
