use std::path::PathBuf;

use thiserror::Error;

/// Core error type for Sidekick.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("model provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model provider returned an unusable response: {0}")]
    Provider(String),
    #[error("expected an assistant message, found {found}")]
    MessageShape { found: String },
    #[error("no conversation recorded for thread {0}")]
    UnknownThread(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn message_shape(found: impl Into<String>) -> Self {
        Self::MessageShape {
            found: found.into(),
        }
    }
}
