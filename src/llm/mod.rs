//! Anthropic Messages API: the decision source and the page analyst.

mod brain;
mod subagent;
pub mod tools;

use anyhow::{Result, anyhow};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error};

pub use brain::{Brain, render_page_context};
pub use subagent::DomAnalyst;

use crate::config::LlmConfig;

const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

impl MessagesResponse {
    /// All text blocks joined by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.trim()),
                _ => None,
            })
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Thin client over `POST /v1/messages`. Cheap to clone.
#[derive(Clone)]
pub struct AnthropicClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow!("ANTHROPIC_API_KEY not set in environment"))?;
        Ok(Self {
            http: Client::new(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn create(
        &self,
        system: &str,
        messages: &[Value],
        tools: Option<&Value>,
    ) -> Result<MessagesResponse> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": system,
            "messages": messages,
        });
        if let Some(tools) = tools {
            body["tools"] = tools.clone();
        }

        debug!(model = %self.model, messages = messages.len(), "sending messages request");
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let json_resp: Value = response.json().await?;

        if !status.is_success() {
            let err_msg = json_resp["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error");
            error!(status = %status, message = err_msg, "messages API error");
            return Err(anyhow!("Anthropic API error ({}): {}", status, err_msg));
        }

        let parsed: MessagesResponse = serde_json::from_value(json_resp.clone())
            .map_err(|e| anyhow!("Unexpected messages response ({e}): {json_resp}"))?;
        debug!(stop_reason = ?parsed.stop_reason, blocks = parsed.content.len(), "messages response");
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_blocks_parse_and_unknown_types_are_kept_out() {
        let resp: MessagesResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Looking for the button."},
                {"type": "thinking", "thinking": "..."},
                {"type": "tool_use", "id": "toolu_1", "name": "click", "input": {"selector": "text:Go"}}
            ],
            "stop_reason": "tool_use"
        }))
        .unwrap();
        assert_eq!(resp.content.len(), 3);
        assert_eq!(resp.content[1], ContentBlock::Other);
        assert_eq!(resp.text(), "Looking for the button.");
    }

    #[test]
    fn client_requires_api_key() {
        let config = LlmConfig {
            api_key: None,
            ..LlmConfig::default()
        };
        assert!(AnthropicClient::new(&config).is_err());
    }
}
