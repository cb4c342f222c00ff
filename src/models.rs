use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
}

impl PromptRequest {
    pub fn into_prompt(self) -> Result<String, String> {
        if self.prompt.trim().is_empty() {
            return Err("prompt must not be empty".to_owned());
        }
        Ok(self.prompt)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
}

pub fn new_request_id() -> String {
    format!("req_{}", Uuid::new_v4())
}
