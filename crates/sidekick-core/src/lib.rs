//! Sidekick core: the agent execution graph and its collaborators.
//!
//! One conversational turn flows through input-safety screening, a model
//! call with bound tools, a conditional tool-execution loop, and
//! output-safety screening, with per-thread state checkpointed after every
//! step and token-level streaming relayed to consumers.

mod checkpoint;
mod config;
mod error;
mod events;
mod graph;
mod message;
mod model;
mod safety;
mod security;
mod state;
mod tools;

pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore};
pub use config::{AgentSection, ClassifierConfig, Config, ConfigLoader, LlmConfig, LoggingConfig};
pub use error::AgentError;
pub use events::TurnEvent;
pub use graph::{AgentGraph, AgentOptions, RunContext};
pub use message::{ChatMessage, ToolCall};
pub use model::{ChatModel, ChatRequest, OpenAiChatModel};
pub use safety::{SafetyAssessment, SafetyClassifier, SafetyVerdict, ScreenedRole};
pub use security::{SecretValue, require_env};
pub use state::ConversationState;
pub use tools::{CalculatorTool, SearchTool, Tool, ToolRegistry, ToolSpec};
