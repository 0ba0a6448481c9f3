use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use sidekick_core::{AgentGraph, CheckpointStore};
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    graph: Arc<AgentGraph>,
    feedback: Arc<FeedbackLog>,
}

impl AppState {
    pub fn new(graph: Arc<AgentGraph>) -> Self {
        Self {
            graph,
            feedback: Arc::new(FeedbackLog::default()),
        }
    }

    pub fn graph(&self) -> Arc<AgentGraph> {
        Arc::clone(&self.graph)
    }

    pub fn store(&self) -> Arc<dyn CheckpointStore> {
        self.graph.store()
    }

    pub fn feedback(&self) -> Arc<FeedbackLog> {
        Arc::clone(&self.feedback)
    }
}

/// In-process feedback capture keyed by run id.
///
/// Run ids are not validated against known runs; feedback for unknown runs
/// is recorded as-is.
#[derive(Default)]
pub struct FeedbackLog {
    records: DashMap<String, Vec<FeedbackRecord>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackRecord {
    pub key: String,
    pub score: f64,
    pub kwargs: serde_json::Value,
}

impl FeedbackLog {
    pub fn record(&self, run_id: &str, record: FeedbackRecord) {
        info!(run_id, key = %record.key, score = record.score, "feedback received");
        self.records
            .entry(run_id.to_string())
            .or_default()
            .push(record);
    }

    pub fn for_run(&self, run_id: &str) -> Vec<FeedbackRecord> {
        self.records
            .get(run_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }
}
