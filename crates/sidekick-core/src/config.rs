use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{AgentError, SecretValue, require_env};

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "SIDEKICK_CONFIG";

/// Top-level configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub llm: LlmConfig,
    /// Absent section disables screening entirely (fail-open).
    #[serde(default)]
    pub classifier: Option<ClassifierConfig>,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve the configured LLM secret value (from environment only).
    pub fn llm_api_key(&self) -> Result<SecretValue, AgentError> {
        require_env(&self.llm.api_key_env)
    }

    /// Classifier credential, or `None` when screening is unconfigured —
    /// the graph then fails open.
    pub fn classifier_api_key(&self) -> Option<SecretValue> {
        self.classifier
            .as_ref()
            .and_then(|classifier| require_env(&classifier.api_key_env).ok())
    }
}

/// Helper to load configuration with best-practice guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `SIDEKICK_CONFIG` environment variable.
    /// 3. `config.toml` in the current working directory.
    pub fn load(path: Option<PathBuf>) -> Result<Config, AgentError> {
        let candidate = resolve_path(path);
        let raw = fs::read_to_string(&candidate)
            .map_err(|err| AgentError::config_io(candidate.clone(), err))?;
        let config: Config = toml::from_str(&raw)
            .map_err(|err| AgentError::InvalidConfiguration(err.to_string()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), AgentError> {
        if config.llm.api_key_env.trim().is_empty() {
            return Err(AgentError::InvalidConfiguration(
                "llm.api_key_env must reference an environment variable".into(),
            ));
        }

        // Ensure the LLM credential exists at load time to discourage
        // inline secrets. The classifier credential may legitimately be
        // absent (fail-open screening).
        require_env(&config.llm.api_key_env)?;
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = path {
        return path;
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV)
        && !from_env.trim().is_empty()
    {
        return PathBuf::from(from_env);
    }

    Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "LlmConfig::default_base_url")]
    pub base_url: String,
    pub model: String,
    #[serde(default = "LlmConfig::default_api_key_env")]
    pub api_key_env: String,
}

impl LlmConfig {
    fn default_base_url() -> String {
        "https://api.openai.com/v1".to_string()
    }

    fn default_api_key_env() -> String {
        "OPENAI_API_KEY".to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "LlmConfig::default_base_url")]
    pub base_url: String,
    pub model: String,
    #[serde(default = "ClassifierConfig::default_api_key_env")]
    pub api_key_env: String,
}

impl ClassifierConfig {
    fn default_api_key_env() -> String {
        "SIDEKICK_CLASSIFIER_API_KEY".to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Overrides the built-in system instructions when set.
    pub instructions: Option<String>,
    pub max_model_rounds: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            instructions: None,
            max_model_rounds: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
