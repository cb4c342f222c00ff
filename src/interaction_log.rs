use std::{
    path::{Path, PathBuf},
    sync::Mutex as StdMutex,
};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};
use tracing::debug;

use crate::backend::BackendTag;

pub const UNKNOWN_BACKEND: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub prompt: String,
    pub response: String,
    pub streamed: bool,
    pub model: String,
}

impl LogRecord {
    pub fn new(
        prompt: impl Into<String>,
        response: impl Into<String>,
        streamed: bool,
        backend: Option<BackendTag>,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            prompt: prompt.into(),
            response: response.into(),
            streamed,
            model: backend
                .map(BackendTag::as_str)
                .unwrap_or(UNKNOWN_BACKEND)
                .to_owned(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("interaction log io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("interaction log serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait InteractionLog: Send + Sync {
    async fn append(&self, record: &LogRecord) -> Result<(), LogError>;
}

pub struct JsonlInteractionLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlInteractionLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl InteractionLog for JsonlInteractionLog {
    async fn append(&self, record: &LogRecord) -> Result<(), LogError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(
            path = %self.path.display(),
            streamed = record.streamed,
            model = %record.model,
            "interaction logged"
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryInteractionLog {
    records: StdMutex<Vec<LogRecord>>,
}

impl MemoryInteractionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl InteractionLog for MemoryInteractionLog {
    async fn append(&self, record: &LogRecord) -> Result<(), LogError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| std::io::Error::other("memory log poisoned"))?;
        records.push(record.clone());
        Ok(())
    }
}
