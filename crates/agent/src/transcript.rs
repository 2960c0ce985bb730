//! Transcript builder: host history turns to seed messages.

use stepwise_core::history::HistoryTurn;
use stepwise_core::message::Message;

/// Convert prior turns into the messages that seed a loop.
///
/// A turn with a non-empty prompt becomes one `User` message. Otherwise its
/// textual response fragments are concatenated into one `Assistant`
/// message. Turns yielding neither are skipped. Order is preserved.
pub fn build_transcript(history: &[HistoryTurn]) -> Vec<Message> {
    history.iter().filter_map(turn_message).collect()
}

fn turn_message(turn: &HistoryTurn) -> Option<Message> {
    if let Some(prompt) = turn.prompt.as_deref().filter(|p| !p.is_empty()) {
        return Some(Message::user(prompt));
    }

    let text: String = turn
        .response
        .iter()
        .filter_map(|fragment| fragment.text())
        .filter(|text| !text.is_empty())
        .collect();

    (!text.is_empty()).then(|| Message::assistant(text))
}
