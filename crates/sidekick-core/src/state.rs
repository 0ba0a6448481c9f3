//! Per-thread conversation state, checkpointed between steps.

use serde::{Deserialize, Serialize};

use crate::message::ChatMessage;
use crate::safety::SafetyAssessment;

/// Everything the graph persists for one thread.
///
/// `messages` is append-only within a turn: steps extend the sequence and
/// never rewrite history. `safety` holds the most recent screening result
/// and is overwritten by each screening step. `is_last_step` flags
/// step-budget exhaustion for the current turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety: Option<SafetyAssessment>,
    #[serde(default)]
    pub is_last_step: bool,
}

impl ConversationState {
    pub fn append(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}
