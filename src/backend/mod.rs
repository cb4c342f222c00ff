pub mod ollama;
pub mod probe;
pub mod stub;

use std::fmt;

use futures_util::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

pub const GENERATE_ERROR_PREFIX: &str = "[Ollama error:";
pub const STREAM_ERROR_PREFIX: &str = "[Ollama stream error:";

/// Lazy, single-pass token sequence. Failures arrive as a final `Token::Error`.
pub type TokenStream = BoxStream<'static, Token>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BackendTag {
    #[serde(rename = "ollama")]
    Live,
    #[serde(rename = "stub")]
    Stub,
}

impl BackendTag {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendTag::Live => "ollama",
            BackendTag::Stub => "stub",
        }
    }
}

impl fmt::Display for BackendTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Text(String),
    Error(String),
}

impl Token {
    pub fn is_error(&self) -> bool {
        matches!(self, Token::Error(_))
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Token::Text(text) => Some(text),
            Token::Error(_) => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Text(text) => f.write_str(text),
            Token::Error(cause) => write!(f, "{STREAM_ERROR_PREFIX} {cause}]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateOutcome {
    Text(String),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateResult {
    pub backend: BackendTag,
    pub outcome: GenerateOutcome,
}

impl GenerateResult {
    pub fn live(text: impl Into<String>) -> Self {
        Self {
            backend: BackendTag::Live,
            outcome: GenerateOutcome::Text(text.into()),
        }
    }

    pub fn live_error(cause: impl Into<String>) -> Self {
        Self {
            backend: BackendTag::Live,
            outcome: GenerateOutcome::Error(cause.into()),
        }
    }

    pub fn stub(text: impl Into<String>) -> Self {
        Self {
            backend: BackendTag::Stub,
            outcome: GenerateOutcome::Text(text.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, GenerateOutcome::Error(_))
    }

    /// Answer text, or the error marker for a failed call.
    pub fn text(&self) -> String {
        match &self.outcome {
            GenerateOutcome::Text(text) => text.clone(),
            GenerateOutcome::Error(cause) => format!("{GENERATE_ERROR_PREFIX} {cause}]"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend timeout: {0}")]
    Timeout(String),
    #[error("backend invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            BackendError::Timeout(error.to_string())
        } else {
            BackendError::Unavailable(error.to_string())
        }
    }
}
