use std::{env, net::SocketAddr, time::Duration};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3";
pub const DEFAULT_LOG_PATH: &str = "logs/log.jsonl";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub backend: BackendConfig,
    pub stub: StubConfig,
    pub log_path: String,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub model: String,
    pub probe_timeout: Duration,
    /// Bounds the single-shot call and each read of a streamed response.
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct StubConfig {
    pub token_delay: Duration,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("RELAY_BIND_ADDR")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned()),
            backend: BackendConfig::from_env(),
            stub: StubConfig::from_env(),
            log_path: env::var("RELAY_LOG_PATH")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LOG_PATH.to_owned()),
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, String> {
        self.bind_addr
            .parse()
            .map_err(|error| format!("invalid RELAY_BIND_ADDR {:?}: {error}", self.bind_addr))
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_owned(),
            backend: BackendConfig::default(),
            stub: StubConfig::default(),
            log_path: DEFAULT_LOG_PATH.to_owned(),
        }
    }
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        let base_url = env::var("OLLAMA_URL").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_owned());
        let model = env::var("OLLAMA_MODEL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_owned());
        let probe_timeout_secs = env::var("OLLAMA_PROBE_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(5);
        let request_timeout_secs = env::var("OLLAMA_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(300);

        Self {
            probe_timeout: Duration::from_secs(probe_timeout_secs),
            request_timeout: Duration::from_secs(request_timeout_secs),
            ..Self::new(base_url, model)
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_owned(),
            model: DEFAULT_OLLAMA_MODEL.to_owned(),
            probe_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(300),
        }
    }
}

impl StubConfig {
    pub fn from_env() -> Self {
        let delay_ms = env::var("RELAY_STUB_TOKEN_DELAY_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(200);
        Self {
            token_delay: Duration::from_millis(delay_ms),
        }
    }
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            token_delay: Duration::from_millis(200),
        }
    }
}
