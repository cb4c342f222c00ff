pub mod backend;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod interaction_log;
pub mod metrics;
pub mod models;
pub mod multiplexer;
pub mod sourcer;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use config::RelayConfig;
use errors::StartupError;
use tracing::info;

pub fn build_state(config: &RelayConfig) -> Result<state::AppState, StartupError> {
    let state = state::AppState::new(config)?;
    info!(
        backend = %config.backend.base_url,
        model = %config.backend.model,
        log_path = %config.log_path,
        "relay configured"
    );
    Ok(state)
}

pub fn build_app(state: state::AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .route("/generate", post(handlers::generate))
        .route("/stream", post(handlers::stream))
        .with_state(state)
}
