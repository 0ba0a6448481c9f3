//! Turn events relayed to streaming consumers.

use serde::Serialize;

use crate::message::ChatMessage;

/// One discrete, ordered record produced while a turn executes.
///
/// Serialized with a `type`/`content` envelope, e.g.
/// `{"type": "token", "content": "hello"}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum TurnEvent {
    /// A durable message appended by a completed step. The caller's own
    /// input is never echoed back.
    Message(ChatMessage),
    /// One textual delta from the model step; emitted only when token
    /// streaming was requested.
    Token(String),
    /// In-band failure report; the stream itself continues to the sentinel.
    Error(String),
    /// End-of-stream sentinel.
    End,
}
