use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::sleep;
use tracing::debug;

use crate::{
    backend::{Token, TokenStream},
    config::StubConfig,
};

const ACKNOWLEDGEMENT: &str = "You said:";

#[derive(Debug, Clone, Copy)]
pub struct StubBackend {
    token_delay: Duration,
}

impl StubBackend {
    pub fn new(config: StubConfig) -> Self {
        Self {
            token_delay: config.token_delay,
        }
    }

    pub fn reply(&self, prompt: &str) -> String {
        stub_words(prompt).join(" ")
    }

    pub fn stream(&self, prompt: &str) -> TokenStream {
        let tokens = split_for_stream(prompt);
        let delay = self.token_delay;
        debug!(tokens = tokens.len(), "stub stream prepared");

        let stream = async_stream::stream! {
            for (index, token) in tokens.into_iter().enumerate() {
                if index > 0 && !delay.is_zero() {
                    sleep(delay).await;
                }
                yield Token::Text(token);
            }
        };
        stream.boxed()
    }
}

fn stub_words(prompt: &str) -> Vec<&str> {
    std::iter::once(ACKNOWLEDGEMENT)
        .chain(prompt.split_whitespace())
        .collect()
}

fn split_for_stream(prompt: &str) -> Vec<String> {
    stub_words(prompt)
        .into_iter()
        .enumerate()
        .map(|(index, word)| {
            if index == 0 {
                word.to_owned()
            } else {
                format!(" {word}")
            }
        })
        .collect()
}
