//! # stepwise core
//!
//! Domain types, traits, and error definitions for the stepwise coding
//! assistant. Everything the agent loop talks to (the model, the tools, the
//! conversation history) is described here as a trait or a plain value type.
//!
//! Implementations live in their own crates: `stepwise-providers` for the
//! model, `stepwise-tools` for the built-in tools.

pub mod error;
pub mod history;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError};
pub use history::{HistoryTurn, ResponseFragment};
pub use message::{Message, Role, Transcript};
pub use provider::{CompletionRequest, ModelService, StreamChunk};
pub use tool::{Tool, ToolContext, ToolDefinition, ToolRegistry, ToolResult};

/// Cancellation token threaded through every model and tool call.
pub use tokio_util::sync::CancellationToken;
