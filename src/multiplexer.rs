use std::sync::Arc;

use futures_util::{stream, StreamExt};
use thiserror::Error;
use tracing::{debug, error};

use crate::{
    backend::{BackendTag, Token, TokenStream},
    interaction_log::{InteractionLog, LogRecord},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamFailure {
    #[error("[Ollama stream error: {0}]")]
    Backend(String),
    #[error("[Ollama stream error: backend produced no tokens]")]
    Empty,
}

#[derive(Clone)]
pub struct StreamMultiplexer {
    log: Arc<dyn InteractionLog>,
}

impl StreamMultiplexer {
    pub fn new(log: Arc<dyn InteractionLog>) -> Self {
        Self { log }
    }

    /// Pulls the first token eagerly. A leading error or an empty sequence is
    /// refused without a log write.
    pub async fn open(
        &self,
        prompt: String,
        mut tokens: TokenStream,
        backend: BackendTag,
    ) -> Result<TokenStream, StreamFailure> {
        let first = match tokens.next().await {
            None => return Err(StreamFailure::Empty),
            Some(Token::Error(cause)) => return Err(StreamFailure::Backend(cause)),
            Some(token) => token,
        };

        let log = self.log.clone();
        let outbound = async_stream::stream! {
            let mut tokens = stream::iter([first]).chain(tokens);
            let mut collected: Vec<String> = Vec::new();

            while let Some(token) = tokens.next().await {
                let failed = token.is_error();
                if let Token::Text(text) = &token {
                    collected.push(text.clone());
                }
                yield token;
                if failed {
                    break;
                }
            }

            // Reached only when the consumer drained the stream.
            let record = LogRecord::new(prompt, collected.concat(), true, Some(backend));
            match log.append(&record).await {
                Ok(()) => debug!(backend = %backend, tokens = collected.len(), "stream logged"),
                Err(error) => error!(backend = %backend, error = %error, "failed to log streamed interaction"),
            }
        };

        Ok(outbound.boxed())
    }
}
