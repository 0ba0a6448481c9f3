mod agent;
mod health;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/health", health::health_router())
        .merge(agent::agent_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
