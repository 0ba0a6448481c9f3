//! Chat-completion provider access.
//!
//! [`ChatModel`] is the seam the graph talks through; the production
//! implementation speaks the OpenAI-compatible chat-completions protocol
//! over HTTP, with SSE decoding for the streaming path. Only plain textual
//! deltas are surfaced token by token — tool-call fragments are accumulated
//! and reconstructed into the finished assistant message.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::message::{ChatMessage, ToolCall};
use crate::security::SecretValue;
use crate::tools::ToolSpec;

const STREAM_DONE: &str = "[DONE]";

/// One completion request: optional system instructions, the message
/// history, and the tool declarations bound for this call.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            system: None,
            messages,
            tools: Vec::new(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// Seam to the chat-completion provider.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Single-shot completion returning the assistant message.
    async fn complete(&self, request: ChatRequest) -> Result<ChatMessage, AgentError>;

    /// Streaming completion. Plain textual deltas are pushed to `deltas` as
    /// they arrive; tool-call fragments never appear there and are instead
    /// reconstructed into the returned message.
    async fn complete_streaming(
        &self,
        request: ChatRequest,
        deltas: mpsc::UnboundedSender<String>,
    ) -> Result<ChatMessage, AgentError>;
}

/// OpenAI-compatible chat-completions client.
pub struct OpenAiChatModel {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretValue,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(base_url: impl Into<String>, api_key: SecretValue, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.extend(request.messages.iter().map(wire_message));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if !request.tools.is_empty() {
            body["tools"] = request.tools.iter().map(tool_declaration).collect();
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, AgentError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .bearer_auth(self.api_key.expose())
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, request: ChatRequest) -> Result<ChatMessage, AgentError> {
        let body = self.request_body(&request, false);
        let response = self.send(&body).await?;
        let completion: CompletionResponse = response.json().await?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Provider("completion response with no choices".into()))?;
        ChatMessage::try_from(choice.message)
    }

    async fn complete_streaming(
        &self,
        request: ChatRequest,
        deltas: mpsc::UnboundedSender<String>,
    ) -> Result<ChatMessage, AgentError> {
        let body = self.request_body(&request, true);
        let response = self.send(&body).await?;

        let mut stream = response.bytes_stream().eventsource();
        let mut accumulator = StreamAccumulator::default();

        while let Some(event) = stream.next().await {
            let event = event
                .map_err(|err| AgentError::Provider(format!("stream decode failure: {err}")))?;
            if event.data == STREAM_DONE {
                break;
            }
            let chunk: StreamChunk = serde_json::from_str(&event.data)
                .map_err(|err| AgentError::Provider(format!("malformed stream chunk: {err}")))?;
            if let Some(text) = accumulator.push(chunk) {
                // A gone consumer is not an error: the stream is drained to
                // the end so the finished message can still be checkpointed.
                let _ = deltas.send(text);
            }
        }

        Ok(accumulator.finish())
    }
}

fn wire_message(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::Human { content, .. } => json!({"role": "user", "content": content}),
        ChatMessage::Ai {
            content,
            tool_calls,
            ..
        } => {
            let mut value = json!({"role": "assistant", "content": content});
            if !tool_calls.is_empty() {
                value["tool_calls"] = tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            },
                        })
                    })
                    .collect();
            }
            value
        }
        ChatMessage::Tool {
            content,
            tool_call_id,
            ..
        } => json!({"role": "tool", "content": content, "tool_call_id": tool_call_id}),
    }
}

fn tool_declaration(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.parameters,
        },
    })
}

/// Provider message shape, richer than [`ChatMessage`].
#[derive(Debug, Deserialize)]
pub struct WireMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    pub function: WireFunction,
}

#[derive(Debug, Deserialize)]
pub struct WireFunction {
    pub name: String,
    pub arguments: String,
}

/// The single factory from provider messages into the closed message set.
impl TryFrom<WireMessage> for ChatMessage {
    type Error = AgentError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let content = wire.content.unwrap_or_default();
        match wire.role.as_str() {
            "user" | "human" => Ok(ChatMessage::human(content)),
            "assistant" | "ai" => {
                let tool_calls = wire
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .map(|call| ToolCall {
                        id: call.id,
                        name: call.function.name,
                        arguments: parse_arguments(&call.function.arguments),
                    })
                    .collect();
                Ok(ChatMessage::ai_with_tool_calls(content, tool_calls))
            }
            "tool" => match wire.tool_call_id {
                Some(id) => Ok(ChatMessage::tool(content, id)),
                None => Err(AgentError::message_shape(
                    "a tool message without tool_call_id",
                )),
            },
            other => Err(AgentError::message_shape(format!(
                "a message with role {other:?}"
            ))),
        }
    }
}

/// Providers ship tool arguments as a JSON-encoded string; malformed
/// payloads are preserved verbatim so the tool layer can report them.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunction>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Rebuilds the assistant message from streamed fragments.
#[derive(Debug, Default)]
struct StreamAccumulator {
    content: String,
    tool_calls: Vec<PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl StreamAccumulator {
    /// Feed one chunk; returns the textual delta to relay, if any.
    fn push(&mut self, chunk: StreamChunk) -> Option<String> {
        let choice = chunk.choices.into_iter().next()?;

        if let Some(fragments) = choice.delta.tool_calls {
            for fragment in fragments {
                if self.tool_calls.len() <= fragment.index {
                    self.tool_calls
                        .resize_with(fragment.index + 1, PartialToolCall::default);
                }
                let slot = &mut self.tool_calls[fragment.index];
                if let Some(id) = fragment.id {
                    slot.id = id;
                }
                if let Some(function) = fragment.function {
                    if let Some(name) = function.name {
                        slot.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        slot.arguments.push_str(&arguments);
                    }
                }
            }
        }

        let text = choice.delta.content.filter(|text| !text.is_empty())?;
        self.content.push_str(&text);
        Some(text)
    }

    fn finish(self) -> ChatMessage {
        let tool_calls = self
            .tool_calls
            .into_iter()
            .filter(|call| !call.name.is_empty())
            .map(|call| ToolCall {
                id: call.id,
                name: call.name,
                arguments: parse_arguments(&call.arguments),
            })
            .collect();
        ChatMessage::ai_with_tool_calls(self.content, tool_calls)
    }
}
