use std::sync::Arc;

use crate::{
    config::RelayConfig,
    errors::StartupError,
    interaction_log::{InteractionLog, JsonlInteractionLog},
    metrics::AppMetrics,
    multiplexer::StreamMultiplexer,
    sourcer::ResponseSourcer,
};

#[derive(Clone)]
pub struct AppState {
    pub sourcer: Arc<ResponseSourcer>,
    pub multiplexer: Arc<StreamMultiplexer>,
    pub interactions: Arc<dyn InteractionLog>,
    pub metrics: Arc<AppMetrics>,
}

impl AppState {
    pub fn new(config: &RelayConfig) -> Result<Self, StartupError> {
        Self::with_log(config, Arc::new(JsonlInteractionLog::new(&config.log_path)))
    }

    pub fn with_log<L>(config: &RelayConfig, log: Arc<L>) -> Result<Self, StartupError>
    where
        L: InteractionLog + 'static,
    {
        let interactions: Arc<dyn InteractionLog> = log;
        let sourcer = ResponseSourcer::new(config.backend.clone(), config.stub)?;
        Ok(Self {
            sourcer: Arc::new(sourcer),
            multiplexer: Arc::new(StreamMultiplexer::new(interactions.clone())),
            interactions,
            metrics: Arc::new(AppMetrics::new()?),
        })
    }
}
