use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Sampling options forwarded to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    /// Not every backend accepts it.
    pub top_k: Option<u32>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 1.0,
            top_p: 0.9,
            top_k: Some(50),
        }
    }
}

/// A single, unretried chat completion call.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(&self, messages: &[ChatMessage], sampling: &SamplingConfig) -> Result<String>;
}

/// Text generation as the pipeline sees it.
///
/// Implementations retry internally and return an empty string once they give up;
/// callers treat "" as a failed output for that one item and carry on.
#[async_trait]
pub trait GenerationPort: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage], sampling: &SamplingConfig) -> String;
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage], sampling: &SamplingConfig) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));

        let request = OllamaRequest {
            model: &self.model,
            messages,
            stream: false,
            options: OllamaOptions {
                num_predict: sampling.max_tokens,
                temperature: sampling.temperature,
                top_p: sampling.top_p,
                top_k: sampling.top_k,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.message.content)
    }
}

/// Any endpoint speaking the OpenAI chat completions protocol.
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Self {
        Self {
            base_url,
            model,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChatBackend for OpenAiClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage], sampling: &SamplingConfig) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let request = OpenAiRequest {
            model: &self.model,
            messages,
            max_tokens: sampling.max_tokens,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .context("Failed to send chat completion request")?;

        if !response.status().is_success() {
            anyhow::bail!("Chat completion request failed: {}", response.status());
        }

        let body: OpenAiResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

/// Wraps a backend with a per-call timeout and a fixed-delay retry policy.
pub struct RetryingGenerator<B> {
    backend: B,
    policy: RetryPolicy,
    timeout: Duration,
}

impl<B: ChatBackend> RetryingGenerator<B> {
    pub fn new(backend: B, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            backend,
            policy,
            timeout,
        }
    }

    async fn attempt(&self, messages: &[ChatMessage], sampling: &SamplingConfig) -> Result<String> {
        let reply = tokio::time::timeout(self.timeout, self.backend.chat(messages, sampling))
            .await
            .map_err(|_| anyhow::anyhow!("Generation timed out after {:?}", self.timeout))??;

        let reply = reply.trim();
        if reply.is_empty() {
            anyhow::bail!("Model returned an empty response");
        }
        Ok(reply.to_string())
    }
}

#[async_trait]
impl<B: ChatBackend> GenerationPort for RetryingGenerator<B> {
    async fn generate(&self, messages: &[ChatMessage], sampling: &SamplingConfig) -> String {
        let result = self
            .policy
            .retry(self.backend.name(), || self.attempt(messages, sampling))
            .await;

        match result {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    model = self.backend.name(),
                    error = %e,
                    "Failed to generate text after retries"
                );
                String::new()
            }
        }
    }
}
