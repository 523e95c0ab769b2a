//! OpenAI-compatible `/chat/completions` client.
//!
//! OpenAI, Groq and OpenRouter all speak this shape; they differ only in
//! base URL and credential.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::registry::EndpointConfig;
use super::{BackendError, ChatRequest, CompletionBackend};

/// Transport-level ceiling. Callers apply their own, tighter budgets.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

pub struct OpenAiCompatible {
    name: String,
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatible {
    pub fn new(name: impl Into<String>, config: &EndpointConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| BackendError::RequestFailed(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            endpoint: completions_url(&config.base_url),
            api_key: config.api_key.clone(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for OpenAiCompatible {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatible")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CompletionBackend for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, BackendError> {
        let start = std::time::Instant::now();

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BackendError::ParseError(e.to_string()))?;

        let content = message_content(&resp_json)?;
        debug!(
            backend = %self.name,
            model = %request.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = content.len(),
            "completion received"
        );
        Ok(content)
    }
}

fn completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

/// `choices[0].message.content`, non-empty.
fn message_content(resp_json: &serde_json::Value) -> Result<String, BackendError> {
    let content = resp_json["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or("")
        .trim();
    if content.is_empty() {
        return Err(BackendError::EmptyContent);
    }
    Ok(content.to_string())
}
