//! OpenAI chat-completions provider
//!
//! Function-calling client over a long-lived reqwest::Client for connection
//! pooling. Common upstream failures (rate limits, bad keys, context
//! overflow) degrade to a user-facing sentence instead of an error.

use super::LlmProvider;
use crate::error::AssistantError;
use crate::models::{ChatTurn, LlmReply, ToolCall, ToolDefinition};
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_TEMPERATURE: f32 = 0.0;
const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Reusable OpenAI client (connection-pooled)
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: Option<String>) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");

        let model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        info!(model = model.as_str(), "Initialized OpenAI provider");

        Self {
            client,
            api_key,
            model,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

/// Map well-known upstream failures to user-facing sentences
fn friendly_degradation(error_text: &str) -> Option<&'static str> {
    if error_text.contains("Rate limit") || error_text.contains("rate_limit") {
        Some("Sorry, the service is currently busy. Please try again in a moment.")
    } else if error_text.contains("Invalid API key") || error_text.contains("invalid_api_key") {
        Some("Service configuration error. Please contact support.")
    } else if error_text.contains("context_length_exceeded") {
        Some("The conversation has become too long. Please start a new session.")
    } else {
        None
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate(
        &self,
        messages: &[ChatTurn],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmReply> {
        if self.api_key.is_empty() {
            return Err(AssistantError::Llm(
                "OPENAI_API_KEY not configured".to_string(),
            ));
        }

        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools,
            tool_choice: tools.map(|_| "auto"),
        };

        debug!(
            message_count = messages.len(),
            has_tools = tools.is_some(),
            "Sending request to OpenAI"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "OpenAI API request failed");
                AssistantError::Llm(format!("OpenAI API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(error = error_text.as_str(), "OpenAI API error response");
            if let Some(message) = friendly_degradation(&error_text) {
                return Ok(LlmReply::text(message));
            }
            return Err(AssistantError::Llm(format!(
                "OpenAI API error: {}",
                error_text
            )));
        }

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse OpenAI response");
            AssistantError::Llm(format!("OpenAI parse error: {}", e))
        })?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AssistantError::Llm("No response from OpenAI API".to_string()))?;

        if !choice.message.tool_calls.is_empty() {
            info!(
                count = choice.message.tool_calls.len(),
                "Response contains tool calls"
            );
        }

        Ok(LlmReply {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let messages = vec![ChatTurn::system("You are a banking assistant")];
        let request = ChatCompletionRequest {
            model: "gpt-4o",
            messages: &messages,
            temperature: 0.0,
            max_tokens: 1000,
            tools: None,
            tool_choice: None,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("banking assistant"));
        assert!(!json.contains("tools"));
    }

    #[test]
    fn test_response_deserialization_with_tool_calls() {
        let json = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "validate_account", "arguments": "{\"account_number\":\"5678\"}"}
                    }]
                }
            }]
        }"#;
        let response: ChatCompletionResponse = serde_json::from_str(json).unwrap();
        let message = &response.choices[0].message;
        assert!(message.content.is_none());
        assert_eq!(message.tool_calls[0].function.name, "validate_account");
    }

    #[test]
    fn test_friendly_degradation_mapping() {
        assert!(friendly_degradation("Rate limit reached for requests").is_some());
        assert!(friendly_degradation("context_length_exceeded").is_some());
        assert!(friendly_degradation("boom").is_none());
    }
}
