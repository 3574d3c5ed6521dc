use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::AnthropicClient;
use crate::agent::DiagnosticAgent;

const ANALYSIS_HTML_CHARS: usize = 80_000;
const ERROR_HTML_CHARS: usize = 60_000;

const SYSTEM_PROMPT: &str = r#"You are a web page analyst assisting a browser automation agent. You get the page HTML and the list of clickable elements the agent can actually reach.

Answer concretely: name the exact selector (prefer text:<label> or a listed CSS selector) or the coordinates the agent should use, and what to do first if something (a modal, a cookie banner, a collapsed menu) is in the way. Be brief."#;

/// One-shot page analysis, no conversation kept.
pub struct DomAnalyst {
    client: AnthropicClient,
}

impl DomAnalyst {
    pub fn new(client: AnthropicClient) -> Self {
        Self { client }
    }

    async fn ask(&self, prompt: String) -> Result<String> {
        let messages = [json!({"role": "user", "content": prompt})];
        let response = self.client.create(SYSTEM_PROMPT, &messages, None).await?;
        let text = response.text();
        if text.is_empty() {
            return Err(anyhow!("page analyst returned no text"));
        }
        info!(chars = text.len(), "page analysis received");
        Ok(text)
    }
}

fn truncate(html: &str, max_chars: usize) -> String {
    match html.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}\n<!-- truncated -->", &html[..cut]),
        None => html.to_string(),
    }
}

#[async_trait]
impl DiagnosticAgent for DomAnalyst {
    async fn analyze_error(
        &self,
        html: &str,
        live_elements: &str,
        failed_action: &str,
        error: &str,
    ) -> Result<String> {
        let prompt = format!(
            "The agent keeps failing.\n\nLast failed action: {failed_action}\nError: {error}\n\n\
             Reachable elements:\n{live_elements}\n\nPage HTML:\n{}\n\n\
             Why does the action fail, and what should the agent do instead?",
            truncate(html, ERROR_HTML_CHARS)
        );
        self.ask(prompt).await
    }

    async fn analyze(&self, html: &str, live_elements: &str, question: &str) -> Result<String> {
        let prompt = format!(
            "Question: {question}\n\nReachable elements:\n{live_elements}\n\nPage HTML:\n{}",
            truncate(html, ANALYSIS_HTML_CHARS)
        );
        self.ask(prompt).await
    }
}
