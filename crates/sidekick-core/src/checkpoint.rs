//! Persisted conversation snapshots keyed by thread id.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::AgentError;
use crate::state::ConversationState;

/// Key-value checkpoint store for per-thread state.
///
/// The graph saves after every step so interrupted turns can resume from
/// the last completed step. Concurrent turns on one thread id race on
/// load/save; callers that need consistency must serialize turns per
/// thread — the store itself guarantees nothing beyond last-writer-wins.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, AgentError>;

    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<(), AgentError>;

    /// Removing a thread is a store-level operation; the graph never calls
    /// this.
    async fn delete(&self, thread_id: &str) -> Result<(), AgentError>;
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    threads: DashMap<String, ConversationState>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, AgentError> {
        Ok(self.threads.get(thread_id).map(|entry| entry.clone()))
    }

    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<(), AgentError> {
        self.threads.insert(thread_id.to_string(), state.clone());
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), AgentError> {
        self.threads.remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChatMessage;

    #[tokio::test]
    async fn missing_thread_loads_as_none() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemoryCheckpointStore::new();
        let mut state = ConversationState::default();
        state.append(ChatMessage::human("hello"));

        store.save("thread-1", &state).await.unwrap();
        let loaded = store.load("thread-1").await.unwrap().unwrap();
        assert_eq!(loaded, state);

        store.delete("thread-1").await.unwrap();
        assert!(store.load("thread-1").await.unwrap().is_none());
    }
}
