use std::env;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::Client;
use serde::Deserialize;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Chat-style request against an OpenAI-compatible completion endpoint.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub json_response: bool,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.7,
            max_tokens: 1024,
            json_response: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Ask the provider to constrain the reply to a single JSON object.
    pub fn expect_json(mut self) -> Self {
        self.json_response = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub text: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// Response surface returned to callers.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub model: String,
    pub raw: serde_json::Value,
}

/// Thin client over the configured chat-completions provider.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    api_key: Option<String>,
    base_url: String,
}

impl LlmClient {
    /// Build a client using `LLM_API_KEY` and optional `LLM_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("LLM_API_KEY").ok();
        let base_url = env::var("LLM_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            http: Client::new(),
            api_key,
            base_url,
        })
    }

    pub async fn execute(&self, request: LlmRequest) -> Result<LlmResponse> {
        let Some(api_key) = self.api_key.as_ref() else {
            bail!("LLM_API_KEY is not configured but required for generation requests");
        };

        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|msg| {
                serde_json::json!({
                    "role": msg.role.as_str(),
                    "content": msg.text,
                })
            })
            .collect();

        let mut payload = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if request.json_response {
            payload["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .context("failed to read response body")?;
        let body: serde_json::Value = serde_json::from_str(&response_text).with_context(|| {
            format!(
                "failed to parse provider response as JSON. Response body: {}",
                body_preview(&response_text, 500)
            )
        })?;
        if !status.is_success() {
            bail!("chat completion failed with status {}: {}", status, body);
        }

        let text = extract_assistant_text(&body)
            .ok_or_else(|| anyhow!("unexpected chat completion payload: {}", body))?;

        Ok(LlmResponse {
            text,
            model: request.model,
            raw: body,
        })
    }
}

/// Truncate a provider body for error context. Cuts on a char boundary so
/// multi-byte text cannot panic the slice.
fn body_preview(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let cut = text
        .char_indices()
        .take_while(|(idx, _)| *idx <= limit)
        .last()
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    format!("{}...", &text[..cut])
}

/// Extract the assistant text from a chat-completions payload.
fn extract_assistant_text(value: &serde_json::Value) -> Option<String> {
    let chat = serde_json::from_value::<ChatCompletionPayload>(value.clone()).ok()?;
    chat.choices
        .into_iter()
        .find_map(|choice| choice.message.content)
}

#[derive(Debug, Deserialize)]
struct ChatCompletionPayload {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_assistant_text_from_chat_payload() {
        let body = serde_json::json!({
            "choices": [
                { "message": { "role": "assistant", "content": "你好" } }
            ]
        });
        assert_eq!(extract_assistant_text(&body).as_deref(), Some("你好"));
    }

    #[test]
    fn missing_choices_yield_none() {
        let body = serde_json::json!({ "error": "overloaded" });
        assert_eq!(extract_assistant_text(&body), None);
    }

    #[test]
    fn body_preview_keeps_short_bodies_whole() {
        assert_eq!(body_preview("not json", 500), "not json");
    }

    #[test]
    fn body_preview_cuts_multibyte_bodies_on_a_char_boundary() {
        let body = "好".repeat(200);
        assert_eq!(body.len(), 600);
        let preview = body_preview(&body, 500);
        assert!(preview.ends_with("..."));
        assert!(preview.len() <= 503);
        assert!(preview.strip_suffix("...").unwrap().chars().all(|c| c == '好'));
    }
}
