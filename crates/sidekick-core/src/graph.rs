//! The agent execution graph: one conversational turn as an explicit state
//! machine.
//!
//! `GuardInput → {BlockUnsafe | Model}`, `Model → {Tools | Done}`,
//! `Tools → Model`, `BlockUnsafe → Done`. The machine is small and fully
//! enumerable, so it is written out directly instead of going through a
//! graph-execution framework. State is checkpointed after every step so an
//! interrupted turn can resume from the last completed step.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::checkpoint::CheckpointStore;
use crate::error::AgentError;
use crate::events::TurnEvent;
use crate::message::ChatMessage;
use crate::model::{ChatModel, ChatRequest};
use crate::safety::{SafetyAssessment, SafetyClassifier, ScreenedRole};
use crate::state::ConversationState;
use crate::tools::ToolRegistry;

const BLOCK_NOTICE_PREFIX: &str = "This conversation was flagged for unsafe content: ";
const LAST_STEP_NOTICE: &str = "Sorry, need more steps to process this request.";

const DEFAULT_INSTRUCTIONS: &str = "You are a helpful research assistant with access to web \
    search and a calculator. Use the tools when they improve your answer, and reply concisely.";

/// Ephemeral per-invocation context; never persisted.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub thread_id: String,
    pub selected_model: Option<String>,
}

impl RunContext {
    /// Missing thread ids are generated fresh, starting a new thread.
    pub fn new(thread_id: Option<String>, selected_model: Option<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            thread_id: thread_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            selected_model,
        }
    }
}

/// Tunables applied at graph construction; no process-wide registry.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Fixed system instructions prepended to every model call.
    pub instructions: String,
    /// Maximum model rounds per turn. `is_last_step` trips on the final
    /// permitted round.
    pub max_model_rounds: usize,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            max_model_rounds: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    GuardInput,
    BlockUnsafe,
    Model,
    Tools,
    Done,
}

/// Orchestrates a single conversational turn across the model, the safety
/// classifier, the tool registry, and the checkpoint store.
pub struct AgentGraph {
    model: Arc<dyn ChatModel>,
    classifier: SafetyClassifier,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn CheckpointStore>,
    options: AgentOptions,
}

impl AgentGraph {
    pub fn new(
        model: Arc<dyn ChatModel>,
        classifier: SafetyClassifier,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            model,
            classifier,
            tools,
            store,
            options: AgentOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AgentOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> Arc<dyn CheckpointStore> {
        Arc::clone(&self.store)
    }

    /// Run one turn to completion and return the final assistant message.
    #[instrument(name = "graph.invoke", skip_all, fields(run_id = %ctx.run_id, thread_id = %ctx.thread_id))]
    pub async fn invoke(&self, ctx: &RunContext, input: &str) -> Result<ChatMessage, AgentError> {
        let sink = EventSink::silent();
        let state = self.run_turn(ctx, input, &sink).await?;
        state
            .messages
            .iter()
            .rev()
            .find(|message| matches!(message, ChatMessage::Ai { .. }))
            .cloned()
            .ok_or_else(|| AgentError::message_shape("a turn with no assistant reply"))
    }

    /// Run one turn, relaying events to the returned receiver.
    ///
    /// The turn is driven by a spawned task. Dropping the receiver cancels
    /// outstanding work at the next step boundary; steps already persisted
    /// stay persisted. Failures arrive as in-band `error` events and the
    /// stream always terminates with the `End` sentinel.
    pub fn stream(
        self: &Arc<Self>,
        ctx: RunContext,
        input: String,
        stream_tokens: bool,
    ) -> mpsc::UnboundedReceiver<TurnEvent> {
        let (events, receiver) = mpsc::unbounded_channel();
        let graph = Arc::clone(self);
        tokio::spawn(async move {
            let sink = EventSink::streaming(events.clone(), stream_tokens);
            if let Err(err) = graph.run_turn(&ctx, &input, &sink).await {
                error!(run_id = %ctx.run_id, error = %err, "turn failed");
                let _ = events.send(TurnEvent::Error(err.to_string()));
            }
            let _ = events.send(TurnEvent::End);
        });
        receiver
    }

    async fn run_turn(
        &self,
        ctx: &RunContext,
        input: &str,
        sink: &EventSink,
    ) -> Result<ConversationState, AgentError> {
        let run_id = ctx.run_id.to_string();
        let mut state = self.store.load(&ctx.thread_id).await?.unwrap_or_default();
        state.append(ChatMessage::human(input).with_run_id(&run_id));

        let mut rounds = 0usize;
        let mut step = Step::GuardInput;
        loop {
            step = match step {
                Step::GuardInput => self.guard_input(&mut state).await?,
                Step::BlockUnsafe => self.block_unsafe(&mut state, &run_id, sink),
                Step::Model => {
                    rounds += 1;
                    state.is_last_step = rounds >= self.options.max_model_rounds;
                    self.call_model(ctx, &mut state, &run_id, sink).await?
                }
                Step::Tools => self.run_tools(&mut state, &run_id, sink).await?,
                Step::Done => break,
            };
            self.store.save(&ctx.thread_id, &state).await?;
            if sink.is_closed() {
                debug!(run_id = %run_id, "stream consumer disconnected, ending turn early");
                break;
            }
        }
        Ok(state)
    }

    /// Screen the accumulated input. ERROR verdicts route permissively:
    /// a broken classifier must not block legitimate conversation.
    async fn guard_input(&self, state: &mut ConversationState) -> Result<Step, AgentError> {
        let assessment = self
            .classifier
            .assess(ScreenedRole::User, &state.messages)
            .await?;
        let next = if assessment.is_unsafe() {
            Step::BlockUnsafe
        } else {
            Step::Model
        };
        state.safety = Some(assessment);
        Ok(next)
    }

    fn block_unsafe(&self, state: &mut ConversationState, run_id: &str, sink: &EventSink) -> Step {
        let message = block_notice(state.safety.as_ref()).with_run_id(run_id);
        sink.message(&message);
        state.append(message);
        Step::Done
    }

    async fn call_model(
        &self,
        ctx: &RunContext,
        state: &mut ConversationState,
        run_id: &str,
        sink: &EventSink,
    ) -> Result<Step, AgentError> {
        if let Some(requested) = ctx.selected_model.as_deref() {
            // Per-request selection is not honored yet; the configured
            // default always wins.
            debug!(requested, "ignoring per-request model selection");
        }

        let request = ChatRequest::new(state.messages.clone())
            .with_system(self.options.instructions.clone())
            .with_tools(self.tools.specs());

        let reply = if sink.wants_tokens() {
            self.stream_model_call(request, sink).await?
        } else {
            self.model.complete(request).await?
        };
        if !matches!(reply, ChatMessage::Ai { .. }) {
            return Err(AgentError::message_shape(reply.kind()));
        }

        let mut screened = state.messages.clone();
        screened.push(reply.clone());
        let assessment = self
            .classifier
            .assess(ScreenedRole::Agent, &screened)
            .await?;
        let blocked = assessment.is_unsafe();
        state.safety = Some(assessment);

        // An unsafe completion is discarded outright; only the notice is
        // ever stored.
        let mut message = if blocked {
            block_notice(state.safety.as_ref())
        } else {
            reply
        };

        if state.is_last_step && !message.tool_calls().is_empty() {
            message = ChatMessage::ai(LAST_STEP_NOTICE);
        }

        let message = message.with_run_id(run_id);
        sink.message(&message);
        let next = if message.tool_calls().is_empty() {
            Step::Done
        } else {
            Step::Tools
        };
        state.append(message);
        Ok(next)
    }

    /// Model call with a live token relay between the provider stream and
    /// the event sink.
    async fn stream_model_call(
        &self,
        request: ChatRequest,
        sink: &EventSink,
    ) -> Result<ChatMessage, AgentError> {
        let (deltas, mut delta_rx) = mpsc::unbounded_channel();
        let relay = sink.events.clone().map(|events| {
            tokio::spawn(async move {
                while let Some(text) = delta_rx.recv().await {
                    if events.send(TurnEvent::Token(text)).is_err() {
                        break;
                    }
                }
            })
        });

        let reply = self.model.complete_streaming(request, deltas).await;
        if let Some(relay) = relay {
            // The relay drains once the provider call drops its sender.
            let _ = relay.await;
        }
        reply
    }

    /// Resolve every tool call on the last assistant message. Dispatch is
    /// concurrent; results append in declared call order so ids and
    /// ordering stay correlated.
    async fn run_tools(
        &self,
        state: &mut ConversationState,
        run_id: &str,
        sink: &EventSink,
    ) -> Result<Step, AgentError> {
        let calls = match state.last() {
            Some(ChatMessage::Ai { tool_calls, .. }) => tool_calls.clone(),
            Some(other) => return Err(AgentError::message_shape(other.kind())),
            None => return Err(AgentError::message_shape("an empty conversation")),
        };

        let dispatches = calls
            .iter()
            .map(|call| self.tools.dispatch(&call.name, call.arguments.clone()));
        let outputs = join_all(dispatches).await;

        for (call, output) in calls.iter().zip(outputs) {
            let message = ChatMessage::tool(output, call.id.clone()).with_run_id(run_id);
            sink.message(&message);
            state.append(message);
        }
        Ok(Step::Model)
    }
}

fn block_notice(assessment: Option<&SafetyAssessment>) -> ChatMessage {
    let categories = assessment
        .map(|assessment| assessment.categories.join(", "))
        .unwrap_or_default();
    ChatMessage::ai(format!("{BLOCK_NOTICE_PREFIX}{categories}"))
}

/// Push side of the event relay.
///
/// Sends are best-effort: a disconnected consumer flips `closed` and the
/// turn stops scheduling provider calls at the next step boundary.
struct EventSink {
    events: Option<mpsc::UnboundedSender<TurnEvent>>,
    stream_tokens: bool,
    closed: AtomicBool,
}

impl EventSink {
    fn silent() -> Self {
        Self {
            events: None,
            stream_tokens: false,
            closed: AtomicBool::new(false),
        }
    }

    fn streaming(events: mpsc::UnboundedSender<TurnEvent>, stream_tokens: bool) -> Self {
        Self {
            events: Some(events),
            stream_tokens,
            closed: AtomicBool::new(false),
        }
    }

    fn wants_tokens(&self) -> bool {
        self.stream_tokens && self.events.is_some() && !self.is_closed()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn send(&self, event: TurnEvent) {
        if let Some(events) = &self.events
            && events.send(event).is_err()
        {
            self.closed.store(true, Ordering::Relaxed);
        }
    }

    fn message(&self, message: &ChatMessage) {
        self.send(TurnEvent::Message(message.clone()));
    }
}
