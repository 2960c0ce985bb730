//! Action protocol codec.
//!
//! The model answers every turn with a single JSON object:
//!
//! - `{"type":"final","content":"..."}` to answer the user, or
//! - `{"type":"tool","tool":"<name>","input":{...}}` to call a tool.
//!
//! Models are sloppy about this, so [`parse_action`] looks for the object in
//! three places, in order: the whole reply, every fenced code block, and
//! the first balanced `{...}` embedded in prose. It is a total function:
//! malformed input yields `None`, never an error. Retry policy lives in the
//! loop, not here.
//!
//! Tool results go back to the model as an observation: the
//! [`OBSERVATION_MARKER`] line followed by one JSON object.

use serde::Deserialize;
use serde_json::{Map, Value, json};
use stepwise_core::tool::ToolResult;

/// First line of every observation message.
pub const OBSERVATION_MARKER: &str = "[tool_observation]";

/// A decision parsed from model output.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Invoke a registered tool
    Tool { name: String, input: Value },
    /// Answer the user and stop
    Final { content: String },
}

impl Action {
    /// The wire form of this action.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Tool { name, input } => json!({"type": "tool", "tool": name, "input": input}),
            Self::Final { content } => json!({"type": "final", "content": content}),
        }
    }
}

/// Extract one action from raw model output.
pub fn parse_action(text: &str) -> Option<Action> {
    let trimmed = text.trim();
    let whole = (trimmed.starts_with('{') && trimmed.ends_with('}')).then_some(trimmed);

    whole
        .into_iter()
        .chain(fenced_blocks(text))
        .chain(first_balanced_object(text))
        .find_map(|candidate| {
            serde_json::from_str::<Value>(candidate)
                .ok()
                .and_then(|value| normalize(&value))
        })
}

fn normalize(value: &Value) -> Option<Action> {
    let obj = value.as_object()?;
    let kind = obj.get("type")?.as_str()?.to_ascii_lowercase();

    match kind.as_str() {
        "final" => Some(Action::Final {
            content: obj
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        "tool" => {
            let name = obj
                .get("tool")?
                .as_str()
                .map(str::trim)
                .filter(|n| !n.is_empty())?;
            let input = obj
                .get("input")
                .filter(|v| v.is_object())
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()));
            Some(Action::Tool {
                name: name.to_string(),
                input,
            })
        }
        _ => None,
    }
}

/// Bodies of every ``` fenced block, in order of appearance.
///
/// An info string (`json`, `JSON`, ...) on the opening line is dropped.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let Some(close) = after.find("```") else {
            break;
        };
        let body = &after[..close];
        let body = match body.find('\n') {
            Some(nl) if !body[..nl].contains('{') => &body[nl + 1..],
            _ => body,
        };
        blocks.push(body.trim());
        rest = &after[close + 3..];
    }

    blocks
}

/// The first top-level balanced `{...}` in `text`.
///
/// Braces inside string literals (including escaped quotes) do not count.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Serialize a JSON value with object keys sorted at every level.
pub fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let body: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), canonicalize(v)))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

/// Repeat-detection signature of a tool call.
pub fn signature(name: &str, input: &Value) -> String {
    format!("{name}{}", canonicalize(input))
}

/// Render a tool result as the observation message fed back to the model.
pub fn format_observation(tool: &str, result: &ToolResult) -> String {
    let mut body = json!({
        "tool": tool,
        "ok": result.ok,
        "output": result.output,
        "error": result.error,
    });
    if let Some(metadata) = &result.metadata {
        body["metadata"] = Value::Object(metadata.clone());
    }
    format!("{OBSERVATION_MARKER}\n{body}")
}

#[derive(Deserialize)]
struct ObservationWire {
    tool: String,
    ok: bool,
    output: String,
    error: Option<String>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

/// Read back an observation produced by [`format_observation`].
///
/// Returns the tool name and its result.
pub fn parse_observation(text: &str) -> Option<(String, ToolResult)> {
    let body = text.trim_start().strip_prefix(OBSERVATION_MARKER)?;
    let wire: ObservationWire = serde_json::from_str(body.trim()).ok()?;
    Some((
        wire.tool,
        ToolResult {
            ok: wire.ok,
            output: wire.output,
            error: wire.error,
            metadata: wire.metadata,
        },
    ))
}
