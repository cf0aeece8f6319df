use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Assistant, content: content.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("model request failed: {0}")]
    Transport(String),
    #[error("model returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model response could not be decoded: {0}")]
    Decode(String),
    #[error("model returned no content")]
    EmptyResponse,
    #[error("model call timed out after {0}s")]
    Timeout(u64),
}

/// Text-generation collaborator.
///
/// `system_instruction` is rebuilt for every call; `history` holds the
/// question plus any calculation turns that followed it.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(
        &self,
        system_instruction: &str,
        history: &[ChatMessage],
    ) -> Result<String, LlmError>;

    fn model_name(&self) -> &str;
}
