use std::env;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Explicit agent config path; `ConfigLoader` falls back to its own
    /// resolution order when unset.
    pub agent_config: Option<PathBuf>,
}

impl ServerConfig {
    const DEFAULT_LISTEN_ADDR: &'static str = "0.0.0.0:8080";

    pub fn from_env() -> Self {
        let listen_addr = env::var("SIDEKICK_LISTEN_ADDR")
            .unwrap_or_else(|_| Self::DEFAULT_LISTEN_ADDR.to_string());

        let agent_config = env::var("SIDEKICK_CONFIG")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        Self {
            listen_addr,
            agent_config,
        }
    }
}
