//! Remote responder over an OpenAI-compatible chat completions API

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::credential::CredentialProvider;
use crate::config::LlmConfig;
use crate::error::{Error, Result};

/// Why a remote reply could not be produced
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("empty response: {0}")]
    EmptyResponse(String),
}

impl RemoteError {
    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteError::Network(_) => "network",
            RemoteError::Auth(_) => "auth",
            RemoteError::EmptyResponse(_) => "empty_response",
        }
    }
}

/// Asynchronous, fallible text-in/text-out responder
#[async_trait]
pub trait RemoteResponder: Send + Sync {
    async fn respond(&self, text: &str) -> std::result::Result<String, RemoteError>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completions client (OpenRouter by default)
#[derive(Clone)]
pub struct ChatCompletionsResponder {
    client: Client,
    credentials: Arc<dyn CredentialProvider>,
    model: String,
    base_url: String,
    max_tokens: u32,
}

impl ChatCompletionsResponder {
    /// Create a new responder
    pub fn new(config: &LlmConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            client,
            credentials,
            model: config.model.clone(),
            base_url: config.base_url().trim_end_matches('/').to_string(),
            max_tokens: config.max_tokens,
        })
    }

    /// Create with custom base URL (for testing or custom endpoints)
    pub fn with_base_url(
        config: &LlmConfig,
        credentials: Arc<dyn CredentialProvider>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let mut responder = Self::new(config, credentials)?;
        responder.base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(responder)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl RemoteResponder for ChatCompletionsResponder {
    async fn respond(&self, text: &str) -> std::result::Result<String, RemoteError> {
        let credential = self
            .credentials
            .credential()
            .ok_or_else(|| RemoteError::Auth("no API key configured".to_string()))?;

        let url = format!("{}/chat/completions", self.base_url);
        debug!("Sending chat completion request to: {}", url);

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: text,
            }],
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", credential.expose()))
            .json(&request)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!("Chat completion rejected credential: {}", status);
            return Err(RemoteError::Auth(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            warn!("Chat completion error: {} - {}", status, body);
            return Err(RemoteError::Network(format!("{}: {}", status, body)));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| RemoteError::EmptyResponse(format!("malformed response: {}", e)))?;

        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| RemoteError::EmptyResponse("no reply content".to_string()))?;

        info!("Chat completion reply: {} chars from {}", reply.len(), self.model);
        Ok(reply)
    }
}
