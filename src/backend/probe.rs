use serde::{de::IgnoredAny, Deserialize};
use tracing::debug;

use crate::{backend::BackendError, config::BackendConfig};

#[derive(Clone)]
pub struct AvailabilityProbe {
    client: reqwest::Client,
    config: BackendConfig,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: IgnoredAny,
}

impl AvailabilityProbe {
    pub fn new(client: reqwest::Client, config: BackendConfig) -> Self {
        Self { client, config }
    }

    pub async fn is_available(&self) -> bool {
        match self.check().await {
            Ok(()) => true,
            Err(error) => {
                debug!(url = %self.config.base_url, error = %error, "live backend unavailable");
                false
            }
        }
    }

    async fn check(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(self.config.url("/api/tags"))
            .timeout(self.config.probe_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::Unavailable(format!(
                "status {}",
                response.status().as_u16()
            )));
        }

        response
            .json::<TagsResponse>()
            .await
            .map(|TagsResponse { models: _ }| ())
            .map_err(|error| BackendError::InvalidResponse(error.to_string()))
    }
}
