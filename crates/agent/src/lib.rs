//! The agent loop for stepwise.
//!
//! The agent follows an **Act → Observe** cycle driven by a JSON action
//! protocol:
//!
//! 1. **Seed** the transcript (controlling prompt, prior turns, new prompt)
//! 2. **Ask** the model service for its next reply
//! 3. **Parse** the reply into an [`Action`]
//! 4. **If tool**: dispatch it, feed the observation back, loop to step 2
//! 5. **If final**: return the answer to the caller
//!
//! Guards bound the cycle: repeated identical calls are blocked, malformed
//! replies get one retry, false capability refusals get one retry, and the
//! iteration budget ends in one forced final call.

pub mod codec;
pub mod guards;
pub mod loop_runner;
pub mod model_selection;
pub mod prompt;
pub mod stream_event;
pub mod transcript;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use codec::{Action, parse_action};
pub use loop_runner::{AgentLoop, LoopOutcome};
pub use model_selection::ModelSelector;
pub use stream_event::LoopEvent;
pub use transcript::build_transcript;
