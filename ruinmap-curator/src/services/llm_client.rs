//! Language model client
//!
//! The adjudicator talks to a [`LlmClient`]; the primary and review models
//! are two instances with different model names.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Empty response from model")]
    EmptyResponse,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send system + user prompts, return the raw text response
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError>;

    /// Model name, recorded in the decision log
    fn model_name(&self) -> &str;
}

/// Anthropic Messages API client
#[derive(Clone)]
pub struct AnthropicClient {
    api_key: String,
    client: reqwest::Client,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, model: &str, timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self {
            api_key,
            client,
            model: model.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        tracing::debug!(model = %self.model, "Sending adjudication request");

        let response = self
            .client
            .post(ANTHROPIC_MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&serde_json::json!({
                "model": &self.model,
                "max_tokens": MAX_TOKENS,
                "system": system_prompt,
                "messages": [{"role": "user", "content": user_prompt}]
            }))
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(status.as_u16(), body));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        first_text(body)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn first_text(body: MessagesResponse) -> Result<String, LlmError> {
    body.content
        .into_iter()
        .find_map(|block| block.text.filter(|t| !t.trim().is_empty()))
        .ok_or(LlmError::EmptyResponse)
}
