//! Completion backends.
//!
//! - [`CompletionBackend`]: the external "complete chat" capability
//! - [`http::OpenAiCompatible`]: reqwest client for OpenAI-style providers
//! - [`registry`]: process-wide, construct-once provider lookup
//! - [`evaluation::EvaluationBackend`]: persona evaluation, merge and the
//!   supplementary analyses on top of a backend, with heuristic fallback

pub mod evaluation;
pub mod http;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::evaluation::EvaluationBackend;
pub use self::http::OpenAiCompatible;
pub use self::registry::{BackendRegistry, EndpointConfig, Provider};

/// Errors from a single completion call.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response parse error: {0}")]
    ParseError(String),

    #[error("response contained no message content")]
    EmptyContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// `{"type": "json_object"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            kind: "json_object".to_string(),
        }
    }
}

/// Body of one `/chat/completions` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub response_format: ResponseFormat,
    pub max_tokens: u32,
}

/// Anything that can complete a chat and return the assistant text.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Run one completion and return the raw assistant message content.
    async fn complete(&self, request: ChatRequest) -> Result<String, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_serializes_in_openai_shape() {
        let request = ChatRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![ChatMessage::system("sys"), ChatMessage::user("hi")],
            response_format: ResponseFormat::json_object(),
            max_tokens: 500,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["max_tokens"], 500);
    }
}
