//! Hosted text generation: OpenAI chat completions (with function calling)
//! and Anthropic messages.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{EndpointsConfig, ModelsConfig};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text("user", content)
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::text("tool", content)
        }
    }

    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_tool_type")]
    pub kind: String,
    pub function: FunctionCall,
}

fn default_tool_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, as produced by the model.
    pub arguments: String,
}

/// A function the model may call, in the chat completions `tools` shape.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolSpec {
    pub fn function(name: &str, description: &str, parameters: serde_json::Value) -> Self {
        Self {
            kind: "function",
            function: FunctionSpec {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Chat completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Returns the assistant message of the first choice.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatMessage>;
}

pub struct OpenAIChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAIChat {
    pub fn new(endpoints: &EndpointsConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoints.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: endpoints.openai.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[async_trait]
impl ChatModel for OpenAIChat {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatMessage> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .context("chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Invalid chat completion response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| anyhow::anyhow!("Chat completion returned no choices"))
    }
}

/// Single-prompt text generation.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Anthropic messages client with bounded retry.
///
/// Every failure is retried until `attempts` is exhausted. The wait before
/// retry `n` is `2^n` seconds clamped to `[backoff_min, backoff_max]`.
pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    attempts: u32,
    backoff_min: Duration,
    backoff_max: Duration,
}

impl AnthropicClient {
    pub fn new(endpoints: &EndpointsConfig, models: &ModelsConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoints.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: endpoints.anthropic.trim_end_matches('/').to_string(),
            api_key,
            model: models.anthropic.clone(),
            max_tokens: models.anthropic_max_tokens,
            attempts: models.anthropic_attempts.max(1),
            backoff_min: Duration::from_secs(models.anthropic_backoff_min_secs),
            backoff_max: Duration::from_secs(models.anthropic_backoff_max_secs),
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = Duration::from_secs(1u64 << attempt.min(16));
        exp.clamp(self.backoff_min, self.backoff_max.max(self.backoff_min))
    }

    async fn send_once(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Anthropic API error {}: {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        first_text_block(&json)
    }
}

fn first_text_block(json: &serde_json::Value) -> Result<String> {
    json.get("content")
        .and_then(|c| c.as_array())
        .and_then(|blocks| blocks.first())
        .and_then(|b| b.get("text"))
        .and_then(|t| t.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid Anthropic response: missing text content"))
}

#[async_trait]
impl TextModel for AnthropicClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let mut last_err = None;

        for attempt in 1..=self.attempts {
            match self.send_once(prompt).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Anthropic call failed");
                    last_err = Some(e);
                    if attempt < self.attempts {
                        tokio::time::sleep(self.backoff(attempt)).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Anthropic call failed")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn endpoints(base: &str) -> EndpointsConfig {
        EndpointsConfig {
            openai: base.to_string(),
            anthropic: base.to_string(),
            timeout_secs: 5,
            ..Default::default()
        }
    }

    fn fast_models() -> ModelsConfig {
        ModelsConfig {
            anthropic_backoff_min_secs: 0,
            anthropic_backoff_max_secs: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn chat_returns_tool_calls() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer sk-test")
                .body_includes("\"tools\"");
            then.status(200).json_body(serde_json::json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": { "name": "download", "arguments": "{\"url\":\"https://x\"}" }
                        }]
                    }
                }]
            }));
        });

        let chat = OpenAIChat::new(&endpoints(&server.base_url()), "sk-test".into()).unwrap();
        let mut req = ChatRequest::new("gpt-3.5-turbo", vec![ChatMessage::user("hi")]);
        req.tools
            .push(ToolSpec::function("download", "d", serde_json::json!({})));
        let msg = chat.complete(&req).await.unwrap();
        assert_eq!(msg.content, None);
        assert_eq!(msg.tool_calls[0].function.name, "download");
    }

    #[tokio::test]
    async fn chat_error_status_is_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(401).body("nope");
        });
        let chat = OpenAIChat::new(&endpoints(&server.base_url()), "k".into()).unwrap();
        let req = ChatRequest::new("gpt-4", vec![ChatMessage::user("hi")]);
        let err = chat.complete(&req).await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn anthropic_first_text_block() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/messages")
                .header("x-api-key", "ak")
                .header("anthropic-version", "2023-06-01")
                .body_includes("claude-3-opus-20240229");
            then.status(200).json_body(serde_json::json!({
                "content": [{ "type": "text", "text": "\"a\" | \"b\"" }]
            }));
        });

        let client =
            AnthropicClient::new(&endpoints(&server.base_url()), &fast_models(), "ak".into())
                .unwrap();
        assert_eq!(client.generate("topics").await.unwrap(), "\"a\" | \"b\"");
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn anthropic_retries_up_to_attempts() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/messages");
            then.status(529).body("overloaded");
        });

        let client =
            AnthropicClient::new(&endpoints(&server.base_url()), &fast_models(), "ak".into())
                .unwrap();
        assert!(client.generate("p").await.is_err());
        assert_eq!(mock.calls(), 3);
    }

    #[test]
    fn backoff_is_clamped() {
        let client =
            AnthropicClient::new(&endpoints("http://x"), &ModelsConfig::default(), "k".into())
                .unwrap();
        assert_eq!(client.backoff(1), Duration::from_secs(4));
        assert_eq!(client.backoff(3), Duration::from_secs(8));
        assert_eq!(client.backoff(5), Duration::from_secs(10));
    }
}
