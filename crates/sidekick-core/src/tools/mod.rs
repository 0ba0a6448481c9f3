//! Named tools the model can invoke during a turn.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

mod calculator;
mod search;

pub use calculator::CalculatorTool;
pub use search::SearchTool;

/// Declaration bound to the model alongside the conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments object.
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;

    async fn invoke(&self, arguments: Value) -> anyhow::Result<String>;
}

/// Fixed set of tools invocable by name.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    /// The stock tool set: web search and a calculator.
    pub fn builtin() -> Self {
        Self::new(vec![
            Arc::new(SearchTool::default()),
            Arc::new(CalculatorTool),
        ])
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    /// Invoke a tool by name. Unknown names and invocation failures become
    /// the result text; a single bad call must never abort the turn.
    pub async fn dispatch(&self, name: &str, arguments: Value) -> String {
        match self.get(name) {
            Some(tool) => match tool.invoke(arguments).await {
                Ok(output) => output,
                Err(err) => {
                    warn!(tool = name, error = %err, "tool invocation failed");
                    format!("Error invoking tool {name}: {err}")
                }
            },
            None => {
                warn!(tool = name, "unknown tool requested");
                format!("Unknown tool: {name}")
            }
        }
    }
}
