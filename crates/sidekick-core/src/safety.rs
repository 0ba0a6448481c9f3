//! Input/output safety screening.
//!
//! Wraps an external moderation model behind a two-line verdict protocol:
//! first line `safe` or `unsafe`, second line (unsafe only) a
//! comma-separated list of category codes. Anything else is a malformed
//! response and maps to [`SafetyVerdict::Error`], which callers treat
//! permissively. An unconfigured classifier passes everything through.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::message::ChatMessage;
use crate::model::{ChatModel, ChatRequest};

/// Category codes understood by the moderation model, mapped to the labels
/// shown to users.
const CATEGORY_TAXONOMY: [(&str, &str); 14] = [
    ("S1", "Violent Crimes"),
    ("S2", "Non-Violent Crimes"),
    ("S3", "Sex Crimes"),
    ("S4", "Child Exploitation"),
    ("S5", "Defamation"),
    ("S6", "Specialized Advice"),
    ("S7", "Privacy"),
    ("S8", "Intellectual Property"),
    ("S9", "Indiscriminate Weapons"),
    ("S10", "Hate"),
    ("S11", "Self-Harm"),
    ("S12", "Sexual Content"),
    ("S13", "Elections"),
    ("S14", "Code Interpreter Abuse"),
];

fn category_label(code: &str) -> Option<&'static str> {
    CATEGORY_TAXONOMY
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, label)| *label)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyVerdict {
    Safe,
    Unsafe,
    /// The classifier answered, but not in the expected shape. Not a
    /// transient fault; routed permissively.
    Error,
}

/// Outcome of one screening step. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyAssessment {
    pub verdict: SafetyVerdict,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

impl SafetyAssessment {
    pub fn safe() -> Self {
        Self {
            verdict: SafetyVerdict::Safe,
            categories: Vec::new(),
        }
    }

    pub fn error() -> Self {
        Self {
            verdict: SafetyVerdict::Error,
            categories: Vec::new(),
        }
    }

    pub fn is_unsafe(&self) -> bool {
        self.verdict == SafetyVerdict::Unsafe
    }
}

/// Which side of the conversation is being screened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenedRole {
    User,
    Agent,
}

impl ScreenedRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Agent => "Agent",
        }
    }
}

/// Moderation wrapper around a [`ChatModel`].
///
/// Built without a model (see [`SafetyClassifier::disabled`]) it returns
/// SAFE unconditionally — documented fail-open behavior for deployments
/// without a moderation credential.
pub struct SafetyClassifier {
    model: Option<Arc<dyn ChatModel>>,
}

impl SafetyClassifier {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model: Some(model) }
    }

    pub fn disabled() -> Self {
        Self { model: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.model.is_some()
    }

    /// Screen the accumulated conversation for the given role.
    ///
    /// Sends exactly one classification request. Malformed responses become
    /// an `Error` assessment; only transport failures return `Err`.
    pub async fn assess(
        &self,
        role: ScreenedRole,
        messages: &[ChatMessage],
    ) -> Result<SafetyAssessment, AgentError> {
        let Some(model) = self.model.as_ref() else {
            debug!(
                role = role.as_str(),
                "safety classifier unconfigured, passing through"
            );
            return Ok(SafetyAssessment::safe());
        };

        let prompt = build_prompt(role, messages);
        let reply = model
            .complete(ChatRequest::new(vec![ChatMessage::human(prompt)]))
            .await?;

        let assessment = parse_verdict(reply.content());
        debug!(
            role = role.as_str(),
            verdict = ?assessment.verdict,
            categories = assessment.categories.len(),
            "screening complete"
        );
        Ok(assessment)
    }
}

/// Moderation prompt: category policy plus a role-scoped transcript.
/// Tool messages are internal plumbing and stay out of the transcript.
fn build_prompt(role: ScreenedRole, messages: &[ChatMessage]) -> String {
    let mut categories = String::new();
    for (code, label) in CATEGORY_TAXONOMY {
        categories.push_str(&format!("{code}: {label}.\n"));
    }

    let mut transcript = String::new();
    for message in messages {
        let label = match message {
            ChatMessage::Human { .. } => "User",
            ChatMessage::Ai { .. } => "Agent",
            ChatMessage::Tool { .. } => continue,
        };
        transcript.push_str(&format!("{label}: {}\n\n", message.content()));
    }

    format!(
        "Task: Check if there is unsafe content in '{role}' messages in the conversation below \
         according to our safety policy.\n\n\
         <BEGIN UNSAFE CONTENT CATEGORIES>\n{categories}<END UNSAFE CONTENT CATEGORIES>\n\n\
         <BEGIN CONVERSATION>\n\n{transcript}<END CONVERSATION>\n\n\
         Provide your safety assessment for ONLY THE LAST {role} message in the above \
         conversation:\n\
         - First line must read 'safe' or 'unsafe'.\n\
         - If unsafe, a second line must include a comma-separated list of violated categories.",
        role = role.as_str(),
    )
}

/// Never fails: every deviation from the two-line protocol is an `Error`
/// assessment.
fn parse_verdict(raw: &str) -> SafetyAssessment {
    let lines: Vec<&str> = raw.trim().lines().map(str::trim).collect();
    match lines.as_slice() {
        ["safe"] => SafetyAssessment::safe(),
        ["unsafe", codes] => {
            let mut categories = Vec::new();
            for code in codes.split(',').map(str::trim) {
                match category_label(code) {
                    Some(label) => categories.push(label.to_string()),
                    None => {
                        warn!(code, "unmapped safety category code");
                        return SafetyAssessment::error();
                    }
                }
            }
            SafetyAssessment {
                verdict: SafetyVerdict::Unsafe,
                categories,
            }
        }
        _ => {
            warn!(response = raw, "unparseable safety verdict");
            SafetyAssessment::error()
        }
    }
}
