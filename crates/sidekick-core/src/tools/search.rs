//! Web search backed by the DuckDuckGo Instant Answer API.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::Tool;

const DEFAULT_ENDPOINT: &str = "https://api.duckduckgo.com";

pub struct SearchTool {
    http: reqwest::Client,
    endpoint: String,
}

impl SearchTool {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl Default for SearchTool {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the web for a short factual answer to a query."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query",
                }
            },
            "required": ["query"],
        })
    }

    async fn invoke(&self, arguments: Value) -> Result<String> {
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("search requires a \"query\" string argument"))?;

        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await?
            .error_for_status()?;

        let answer: InstantAnswer = response.json().await?;
        Ok(summarize(answer, query))
    }
}

#[derive(Debug, Default, Deserialize)]
struct InstantAnswer {
    #[serde(default, rename = "Answer")]
    answer: String,
    #[serde(default, rename = "AbstractText")]
    abstract_text: String,
    #[serde(default, rename = "RelatedTopics")]
    related_topics: Vec<RelatedTopic>,
}

#[derive(Debug, Default, Deserialize)]
struct RelatedTopic {
    #[serde(default, rename = "Text")]
    text: String,
}

/// Best available summary: direct answer, then abstract, then topics.
fn summarize(answer: InstantAnswer, query: &str) -> String {
    if !answer.answer.is_empty() {
        return answer.answer;
    }
    if !answer.abstract_text.is_empty() {
        return answer.abstract_text;
    }
    let topics: Vec<&str> = answer
        .related_topics
        .iter()
        .map(|topic| topic.text.as_str())
        .filter(|text| !text.is_empty())
        .take(3)
        .collect();
    if topics.is_empty() {
        format!("No results found for {query:?}")
    } else {
        topics.join("\n")
    }
}
