use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use sidekick_core::{
    AgentGraph, AgentOptions, Config, ConfigLoader, InMemoryCheckpointStore, OpenAiChatModel,
    SafetyClassifier, ToolRegistry,
};
use sidekick_server::config::ServerConfig;
use sidekick_server::routes::build_router;
use sidekick_server::state::AppState;
use sidekick_server::telemetry::init_tracing;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let server_config = ServerConfig::from_env();
    let agent_config = ConfigLoader::load(server_config.agent_config.clone())?;
    init_tracing(&agent_config.logging.level)?;

    let state = AppState::new(build_graph(&agent_config)?);
    let app: Router = build_router(state);

    let listener = TcpListener::bind(&server_config.listen_addr).await?;
    info!(address = %server_config.listen_addr, "sidekick-server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| {
            error!(error = %err, "server shutdown with error");
            err
        })?;

    Ok(())
}

fn build_graph(config: &Config) -> Result<Arc<AgentGraph>> {
    let model = Arc::new(OpenAiChatModel::new(
        config.llm.base_url.clone(),
        config.llm_api_key()?,
        config.llm.model.clone(),
    ));

    let classifier = match (&config.classifier, config.classifier_api_key()) {
        (Some(section), Some(key)) => SafetyClassifier::new(Arc::new(OpenAiChatModel::new(
            section.base_url.clone(),
            key,
            section.model.clone(),
        ))),
        (Some(section), None) => {
            warn!(
                env = %section.api_key_env,
                "classifier credential missing, safety screening disabled (fail-open)"
            );
            SafetyClassifier::disabled()
        }
        (None, _) => {
            warn!("no classifier configured, safety screening disabled (fail-open)");
            SafetyClassifier::disabled()
        }
    };

    let mut options = AgentOptions::default();
    if let Some(instructions) = &config.agent.instructions {
        options.instructions = instructions.clone();
    }
    options.max_model_rounds = config.agent.max_model_rounds;

    let graph = AgentGraph::new(
        model,
        classifier,
        Arc::new(ToolRegistry::builtin()),
        Arc::new(InMemoryCheckpointStore::new()),
    )
    .with_options(options);

    Ok(Arc::new(graph))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            stream.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
