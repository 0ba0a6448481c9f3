//! Conversation message model shared by the graph, the wire, and checkpoints.

use serde::{Deserialize, Serialize};

/// A structured tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Closed set of message kinds flowing through a conversation.
///
/// The `type` tag is the discriminant on the wire and in checkpoints.
/// `run_id` tags messages produced during a single invocation; it is never
/// carried forward into later turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatMessage {
    Human {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
    },
    Ai {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
    },
    Tool {
        content: String,
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
    },
}

impl ChatMessage {
    pub fn human(content: impl Into<String>) -> Self {
        Self::Human {
            content: content.into(),
            run_id: None,
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::Ai {
            content: content.into(),
            tool_calls: Vec::new(),
            run_id: None,
        }
    }

    pub fn ai_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Ai {
            content: content.into(),
            tool_calls,
            run_id: None,
        }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
            run_id: None,
        }
    }

    pub fn with_run_id(mut self, run_id: &str) -> Self {
        let slot = match &mut self {
            Self::Human { run_id, .. } | Self::Ai { run_id, .. } | Self::Tool { run_id, .. } => {
                run_id
            }
        };
        *slot = Some(run_id.to_string());
        self
    }

    /// Wire name of the variant (`human`, `ai`, `tool`).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Human { .. } => "human",
            Self::Ai { .. } => "ai",
            Self::Tool { .. } => "tool",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Human { content, .. } | Self::Ai { content, .. } | Self::Tool { content, .. } => {
                content
            }
        }
    }

    /// Tool calls carried by the message; empty for non-assistant messages.
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Ai { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        match self {
            Self::Human { run_id, .. } | Self::Ai { run_id, .. } | Self::Tool { run_id, .. } => {
                run_id.as_deref()
            }
        }
    }
}
