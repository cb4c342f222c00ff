use tracing::{debug, warn};

use crate::{
    backend::{
        ollama::OllamaClient, probe::AvailabilityProbe, stub::StubBackend, BackendError,
        BackendTag, GenerateResult, TokenStream,
    },
    config::{BackendConfig, StubConfig},
};

#[derive(Clone)]
pub struct ResponseSourcer {
    probe: AvailabilityProbe,
    live: OllamaClient,
    stub: StubBackend,
}

impl ResponseSourcer {
    pub fn new(backend: BackendConfig, stub: StubConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(backend.request_timeout)
            .build()
            .map_err(|error| {
                BackendError::Unavailable(format!("failed to build HTTP client: {error}"))
            })?;

        Ok(Self {
            probe: AvailabilityProbe::new(client.clone(), backend.clone()),
            live: OllamaClient::new(client, backend),
            stub: StubBackend::new(stub),
        })
    }

    pub async fn backend(&self) -> BackendTag {
        if self.probe.is_available().await {
            BackendTag::Live
        } else {
            BackendTag::Stub
        }
    }

    pub async fn generate(&self, prompt: &str) -> GenerateResult {
        match self.backend().await {
            BackendTag::Stub => GenerateResult::stub(self.stub.reply(prompt)),
            BackendTag::Live => match self.live.generate(prompt).await {
                Ok(text) => GenerateResult::live(text),
                Err(error) => {
                    warn!(model = %self.live.model(), error = %error, "live generation failed");
                    GenerateResult::live_error(error.to_string())
                }
            },
        }
    }

    pub async fn stream(&self, prompt: &str) -> (TokenStream, BackendTag) {
        let backend = self.backend().await;
        debug!(backend = %backend, "token stream selected");
        let tokens = match backend {
            BackendTag::Live => self.live.stream(prompt.to_owned()),
            BackendTag::Stub => self.stub.stream(prompt),
        };
        (tokens, backend)
    }
}
