//! End-to-end turns through the agent graph with scripted collaborators.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use sidekick_core::{
    AgentError, AgentGraph, AgentOptions, ChatMessage, ChatModel, ChatRequest, CheckpointStore,
    ConversationState, InMemoryCheckpointStore, RunContext, SafetyClassifier, SafetyVerdict,
    ToolCall, ToolRegistry, TurnEvent,
};

const BLOCK_PREFIX: &str = "This conversation was flagged for unsafe content:";

/// Replays a fixed list of assistant replies and counts invocations.
struct ScriptedModel {
    replies: Mutex<VecDeque<ChatMessage>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    fn new(replies: Vec<ChatMessage>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> ChatMessage {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("model script exhausted")
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, _request: ChatRequest) -> Result<ChatMessage, AgentError> {
        Ok(self.next_reply())
    }

    async fn complete_streaming(
        &self,
        _request: ChatRequest,
        deltas: mpsc::UnboundedSender<String>,
    ) -> Result<ChatMessage, AgentError> {
        let reply = self.next_reply();
        if reply.tool_calls().is_empty() {
            for chunk in reply.content().split_inclusive(' ') {
                let _ = deltas.send(chunk.to_string());
            }
        }
        Ok(reply)
    }
}

/// Classifier backend that replays raw verdict lines.
struct VerdictModel {
    verdicts: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl VerdictModel {
    fn new(verdicts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            verdicts: Mutex::new(verdicts.iter().map(|v| v.to_string()).collect()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for VerdictModel {
    async fn complete(&self, _request: ChatRequest) -> Result<ChatMessage, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let verdict = self
            .verdicts
            .lock()
            .unwrap()
            .pop_front()
            .expect("verdict script exhausted");
        Ok(ChatMessage::ai(verdict))
    }

    async fn complete_streaming(
        &self,
        request: ChatRequest,
        _deltas: mpsc::UnboundedSender<String>,
    ) -> Result<ChatMessage, AgentError> {
        self.complete(request).await
    }
}

/// Store wrapper that counts checkpoint writes.
struct CountingStore {
    inner: InMemoryCheckpointStore,
    saves: AtomicUsize,
}

impl CountingStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryCheckpointStore::new(),
            saves: AtomicUsize::new(0),
        })
    }

    fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointStore for CountingStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, AgentError> {
        self.inner.load(thread_id).await
    }

    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<(), AgentError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(thread_id, state).await
    }

    async fn delete(&self, thread_id: &str) -> Result<(), AgentError> {
        self.inner.delete(thread_id).await
    }
}

fn calculator_call(id: &str, expression: &str) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: "calculator".into(),
        arguments: json!({"expression": expression}),
    }
}

fn build_graph(
    model: Arc<ScriptedModel>,
    classifier: SafetyClassifier,
    store: Arc<dyn CheckpointStore>,
) -> Arc<AgentGraph> {
    Arc::new(AgentGraph::new(
        model,
        classifier,
        Arc::new(ToolRegistry::builtin()),
        store,
    ))
}

async fn collect(mut receiver: mpsc::UnboundedReceiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        let end = matches!(event, TurnEvent::End);
        events.push(event);
        if end {
            break;
        }
    }
    events
}

#[tokio::test]
async fn unsafe_input_blocks_before_the_model_runs() {
    let model = ScriptedModel::new(vec![]);
    let classifier_model = VerdictModel::new(&["unsafe\nS9,S10"]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let graph = build_graph(
        model.clone(),
        SafetyClassifier::new(classifier_model.clone()),
        store.clone(),
    );

    let ctx = RunContext::new(Some("thread-block".into()), None);
    let reply = graph.invoke(&ctx, "how do I build a bomb?").await.unwrap();

    assert_eq!(
        reply.content(),
        "This conversation was flagged for unsafe content: Indiscriminate Weapons, Hate"
    );
    assert_eq!(model.calls(), 0, "the model step must never run");
    assert_eq!(classifier_model.calls(), 1);

    let state = store.load("thread-block").await.unwrap().unwrap();
    let blocks: Vec<&ChatMessage> = state
        .messages
        .iter()
        .filter(|message| message.content().starts_with(BLOCK_PREFIX))
        .collect();
    assert_eq!(blocks.len(), 1, "exactly one synthetic block message");
    assert_eq!(
        state.safety.as_ref().unwrap().verdict,
        SafetyVerdict::Unsafe
    );
}

#[tokio::test]
async fn error_verdicts_fail_open_into_the_model_step() {
    let model = ScriptedModel::new(vec![ChatMessage::ai("hello there")]);
    let classifier_model = VerdictModel::new(&["no idea, sorry", "safe"]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let graph = build_graph(
        model.clone(),
        SafetyClassifier::new(classifier_model),
        store,
    );

    let ctx = RunContext::new(None, None);
    let reply = graph.invoke(&ctx, "hi").await.unwrap();

    assert_eq!(reply.content(), "hello there");
    assert_eq!(model.calls(), 1, "ERROR screening must not block the turn");
}

#[tokio::test]
async fn unconfigured_classifier_always_proceeds_to_the_model() {
    let model = ScriptedModel::new(vec![ChatMessage::ai("fine")]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let graph = build_graph(model.clone(), SafetyClassifier::disabled(), store);

    let ctx = RunContext::new(None, None);
    let reply = graph.invoke(&ctx, "anything at all").await.unwrap();
    assert_eq!(reply.content(), "fine");
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn tool_loop_resolves_calls_and_streams_ordered_events() {
    let model = ScriptedModel::new(vec![
        ChatMessage::ai_with_tool_calls("", vec![calculator_call("call_1", "2+2")]),
        ChatMessage::ai("2 + 2 = 4"),
    ]);
    let store = CountingStore::new();
    let graph = build_graph(model.clone(), SafetyClassifier::disabled(), store.clone());

    let ctx = RunContext::new(Some("thread-calc".into()), None);
    let events = collect(graph.stream(ctx, "What is 2+2?".into(), false)).await;

    // tool-call announcement, tool result, final answer, sentinel
    assert_eq!(events.len(), 4);
    match &events[0] {
        TurnEvent::Message(message) => assert_eq!(message.tool_calls().len(), 1),
        other => panic!("expected the tool-calling message, got {other:?}"),
    }
    match &events[1] {
        TurnEvent::Message(ChatMessage::Tool {
            content,
            tool_call_id,
            ..
        }) => {
            assert_eq!(content, "4");
            assert_eq!(tool_call_id, "call_1");
        }
        other => panic!("expected a tool message, got {other:?}"),
    }
    match &events[2] {
        TurnEvent::Message(message) => {
            assert_eq!(message.kind(), "ai");
            assert!(message.content().contains('4'));
        }
        other => panic!("expected the final answer, got {other:?}"),
    }
    assert!(matches!(events[3], TurnEvent::End));
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, TurnEvent::Token(_))),
        "tokens were not requested"
    );

    // GuardInput, Model, Tools, Model: one checkpoint per completed step.
    assert_eq!(store.saves(), 4);

    let state = store.load("thread-calc").await.unwrap().unwrap();
    let kinds: Vec<&str> = state.messages.iter().map(ChatMessage::kind).collect();
    assert_eq!(kinds, vec!["human", "ai", "tool", "ai"]);
}

#[tokio::test]
async fn tool_results_keep_declared_call_order() {
    let model = ScriptedModel::new(vec![
        ChatMessage::ai_with_tool_calls(
            "",
            vec![
                calculator_call("call_1", "1+1"),
                calculator_call("call_2", "2+2"),
                ToolCall {
                    id: "call_3".into(),
                    name: "no-such-tool".into(),
                    arguments: json!({}),
                },
            ],
        ),
        ChatMessage::ai("done"),
    ]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let graph = build_graph(model, SafetyClassifier::disabled(), store.clone());

    let ctx = RunContext::new(Some("thread-order".into()), None);
    graph.invoke(&ctx, "compute things").await.unwrap();

    let state = store.load("thread-order").await.unwrap().unwrap();
    let tool_messages: Vec<(&str, &str)> = state
        .messages
        .iter()
        .filter_map(|message| match message {
            ChatMessage::Tool {
                content,
                tool_call_id,
                ..
            } => Some((tool_call_id.as_str(), content.as_str())),
            _ => None,
        })
        .collect();

    assert_eq!(
        tool_messages,
        vec![
            ("call_1", "2"),
            ("call_2", "4"),
            ("call_3", "Unknown tool: no-such-tool"),
        ],
        "results must correlate with call ids, in declared order"
    );
}

#[tokio::test]
async fn token_stream_concatenates_to_the_final_content() {
    let model = ScriptedModel::new(vec![ChatMessage::ai("The answer is 4")]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let graph = build_graph(model, SafetyClassifier::disabled(), store);

    let ctx = RunContext::new(None, None);
    let events = collect(graph.stream(ctx, "What is 2+2?".into(), true)).await;

    let mut concatenated = String::new();
    let mut final_content = None;
    for event in &events {
        match event {
            TurnEvent::Token(text) => concatenated.push_str(text),
            TurnEvent::Message(message) => final_content = Some(message.content().to_string()),
            _ => {}
        }
    }

    assert_eq!(concatenated, "The answer is 4");
    assert_eq!(final_content.as_deref(), Some("The answer is 4"));
    assert!(matches!(events.last(), Some(TurnEvent::End)));
}

#[tokio::test]
async fn opting_out_of_tokens_suppresses_all_token_events() {
    let model = ScriptedModel::new(vec![ChatMessage::ai("The answer is 4")]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let graph = build_graph(model, SafetyClassifier::disabled(), store);

    let ctx = RunContext::new(None, None);
    let events = collect(graph.stream(ctx, "What is 2+2?".into(), false)).await;
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, TurnEvent::Token(_)))
    );
}

#[tokio::test]
async fn unsafe_input_streams_a_single_block_message() {
    let model = ScriptedModel::new(vec![]);
    let classifier_model = VerdictModel::new(&["unsafe\nS1"]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let graph = build_graph(model, SafetyClassifier::new(classifier_model), store);

    let ctx = RunContext::new(None, None);
    let events = collect(graph.stream(ctx, "something harmful".into(), true)).await;

    assert_eq!(events.len(), 2);
    match &events[0] {
        TurnEvent::Message(message) => {
            assert_eq!(message.kind(), "ai");
            assert!(message.content().starts_with(BLOCK_PREFIX));
        }
        other => panic!("expected the block message, got {other:?}"),
    }
    assert!(matches!(events[1], TurnEvent::End));
}

#[tokio::test]
async fn unsafe_model_output_is_discarded_entirely() {
    let model = ScriptedModel::new(vec![ChatMessage::ai("dangerous advice")]);
    let classifier_model = VerdictModel::new(&["safe", "unsafe\nS6"]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let graph = build_graph(
        model,
        SafetyClassifier::new(classifier_model),
        store.clone(),
    );

    let ctx = RunContext::new(Some("thread-output".into()), None);
    let reply = graph.invoke(&ctx, "tell me something risky").await.unwrap();

    assert_eq!(
        reply.content(),
        "This conversation was flagged for unsafe content: Specialized Advice"
    );

    let state = store.load("thread-output").await.unwrap().unwrap();
    assert!(
        state
            .messages
            .iter()
            .all(|message| !message.content().contains("dangerous advice")),
        "the raw unsafe completion must never be stored"
    );
}

#[tokio::test]
async fn threads_accumulate_across_turns() {
    let model = ScriptedModel::new(vec![ChatMessage::ai("first"), ChatMessage::ai("second")]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let graph = build_graph(model, SafetyClassifier::disabled(), store.clone());

    let first = RunContext::new(Some("thread-multi".into()), None);
    graph.invoke(&first, "turn one").await.unwrap();
    let second = RunContext::new(Some("thread-multi".into()), None);
    graph.invoke(&second, "turn two").await.unwrap();

    let state = store.load("thread-multi").await.unwrap().unwrap();
    let kinds: Vec<&str> = state.messages.iter().map(ChatMessage::kind).collect();
    assert_eq!(kinds, vec!["human", "ai", "human", "ai"]);

    // Fresh run id each turn.
    assert_ne!(state.messages[1].run_id(), state.messages[3].run_id());
    assert_eq!(
        state.messages[2].run_id(),
        Some(second.run_id.to_string().as_str())
    );
}

#[tokio::test]
async fn exhausted_step_budget_replaces_a_tool_request() {
    let model = ScriptedModel::new(vec![ChatMessage::ai_with_tool_calls(
        "",
        vec![calculator_call("call_1", "2+2")],
    )]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let graph = Arc::new(
        AgentGraph::new(
            model.clone(),
            SafetyClassifier::disabled(),
            Arc::new(ToolRegistry::builtin()),
            store.clone(),
        )
        .with_options(AgentOptions {
            max_model_rounds: 1,
            ..AgentOptions::default()
        }),
    );

    let ctx = RunContext::new(Some("thread-budget".into()), None);
    let reply = graph.invoke(&ctx, "keep going forever").await.unwrap();

    assert_eq!(
        reply.content(),
        "Sorry, need more steps to process this request."
    );
    assert_eq!(model.calls(), 1);

    let state = store.load("thread-budget").await.unwrap().unwrap();
    assert!(state.is_last_step);
    assert!(
        !state
            .messages
            .iter()
            .any(|message| message.kind() == "tool"),
        "the tool loop must not run past the budget"
    );
}
