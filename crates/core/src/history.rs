//! Prior conversation turns as handed over by the host.
//!
//! The host keeps its own loosely-typed record of earlier turns. Each turn
//! carries either the user's prompt or the assistant's response, the latter
//! as a list of fragments in one of a few shapes. The shapes are modeled as
//! a closed union with one extraction function, [`ResponseFragment::text`].

use serde::{Deserialize, Serialize};

/// One prior turn of the conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    /// The user's prompt, for request turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// The assistant's response fragments, for response turns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response: Vec<ResponseFragment>,
}

impl HistoryTurn {
    /// A turn carrying a user prompt.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            prompt: Some(text.into()),
            response: Vec::new(),
        }
    }

    /// A turn carrying assistant response fragments.
    pub fn response(fragments: Vec<ResponseFragment>) -> Self {
        Self {
            prompt: None,
            response: fragments,
        }
    }
}

/// `{ "value": "..." }` nested one level deeper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedText {
    pub value: String,
}

/// A single piece of an assistant response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseFragment {
    /// `"..."`
    Text(String),
    /// `{ "value": "..." }`
    Value { value: String },
    /// `{ "value": { "value": "..." } }`
    NestedValue { value: NestedText },
    /// `{ "text": "..." }`
    TextPart { text: String },
    /// Anything else (tool invocations, references, progress markers)
    Other(serde_json::Value),
}

impl ResponseFragment {
    /// The textual content of this fragment, if it has any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Value { value } => Some(value),
            Self::NestedValue { value } => Some(&value.value),
            Self::TextPart { text } => Some(text),
            Self::Other(_) => None,
        }
    }
}

impl From<&str> for ResponseFragment {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(json: &str) -> ResponseFragment {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn all_fragment_shapes_yield_text() {
        assert_eq!(fragment(r#""plain""#).text(), Some("plain"));
        assert_eq!(fragment(r#"{"value":"one"}"#).text(), Some("one"));
        assert_eq!(fragment(r#"{"value":{"value":"two"}}"#).text(), Some("two"));
        assert_eq!(fragment(r#"{"text":"three"}"#).text(), Some("three"));
    }

    #[test]
    fn unknown_fragment_has_no_text() {
        let f = fragment(r#"{"toolName":"search_text","input":{}}"#);
        assert!(matches!(f, ResponseFragment::Other(_)));
        assert_eq!(f.text(), None);

        assert_eq!(fragment(r#"{"value":42}"#).text(), None);
    }

    #[test]
    fn turn_deserializes_with_missing_fields() {
        let turn: HistoryTurn = serde_json::from_str(r#"{"prompt":"hi"}"#).unwrap();
        assert_eq!(turn, HistoryTurn::prompt("hi"));

        let turn: HistoryTurn =
            serde_json::from_str(r#"{"response":["a",{"text":"b"}]}"#).unwrap();
        assert_eq!(turn.response.len(), 2);
        assert!(turn.prompt.is_none());
    }
}
