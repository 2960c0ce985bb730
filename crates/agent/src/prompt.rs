//! The controlling prompt and the fixed corrective instructions.
//!
//! Chat endpoints differ in how they treat system messages, so the
//! controlling prompt travels as the first `User` message of every
//! transcript.

use serde_json::{Value, json};
use stepwise_core::tool::ToolDefinition;

use crate::codec::OBSERVATION_MARKER;

/// Sent after an unparsable reply.
pub const FORMAT_RETRY: &str = "Your last reply was not a valid action. Reply with exactly one JSON object and nothing else: either {\"type\":\"tool\",\"tool\":\"<tool name>\",\"input\":{...}} or {\"type\":\"final\",\"content\":\"<answer>\"}.";

/// Sent after a final answer that claims a capability is missing.
pub const CAPABILITY_RETRY: &str = "You do have tools for this. You can read files, list directories, search text and run commands in the user's workspace through the tools listed at the start of this conversation. Use them now instead of saying you cannot; reply with a single tool action.";

/// Error carried by the synthetic observation for a blocked repeated call.
pub const REPEAT_WARNING: &str = "Blocked: this exact tool call was already made twice in a row and was not executed again. Use the previous results, change the input, try a different tool, or give your final answer.";

/// Sent once the iteration budget is spent.
pub const FORCED_FINAL: &str = "You have used all available steps. Do not call any more tools. Reply now with exactly one JSON object of the form {\"type\":\"final\",\"content\":\"<answer>\"} summarizing what you found.";

/// Build the controlling prompt for the given tools.
pub fn controlling_prompt(tools: &[ToolDefinition]) -> String {
    let definitions: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.input_schema,
            })
        })
        .collect();
    let definitions = Value::Array(definitions);

    format!(
        "You are a coding assistant working inside the user's workspace. You act by calling tools, \
one at a time, and finish by answering the user.

Every reply must be exactly one JSON object, with no other text:

- To call a tool: {{\"type\":\"tool\",\"tool\":\"<tool name>\",\"input\":{{...}}}}
- To answer the user: {{\"type\":\"final\",\"content\":\"<markdown answer>\"}}

After each tool call you receive a message whose first line is {OBSERVATION_MARKER} followed \
by a JSON object {{\"tool\",\"ok\",\"output\",\"error\",\"metadata\"}}. Read it before deciding \
what to do next. Do not repeat a call whose result you already have.

Available tools:
{definitions:#}"
    )
}
