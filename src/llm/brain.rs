use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::tools::{self, parse_tool_call};
use super::{AnthropicClient, ContentBlock, MessagesResponse};
use crate::agent::DecisionSource;
use crate::types::{Decision, Intent, PageContext};

const SYSTEM_PROMPT: &str = r#"You are a browser automation agent. You control a real Chrome browser through tools, one tool call per turn.

After every action you receive the result and a fresh description of the current page: URL, title, interactive elements and visible text.

Guidelines:
1. Prefer `text:<visible label>` selectors for click, e.g. text:Sign in. The [data-agent-id="eN"] selectors from the page description also work.
2. When a click fails, read the error: it lists elements that do exist on the page. Use query_dom to see clickable elements with coordinates, and click_at_position as a last resort.
3. After typing into a search box, use press_enter or click the submit button.
4. Clicks may open new tabs; you are switched to them automatically. Use list_tabs and switch_tab to move between tabs.
5. Some actions (payments, deleting data, sending messages) need the user's confirmation and may be blocked. Do not try to work around a block.
6. Call complete_task only when the task is actually accomplished, with a short summary of the outcome.
7. Keep steps minimal. Do not over-navigate."#;

const VISIBLE_TEXT_CHARS: usize = 6000;

/// Conversation with the model, one task at a time.
pub struct Brain {
    client: AnthropicClient,
    tools: Value,
    conversation: Vec<Value>,
}

impl Brain {
    pub fn new(client: AnthropicClient) -> Self {
        Self {
            client,
            tools: tools::catalogue(),
            conversation: Vec::new(),
        }
    }

    pub fn conversation(&self) -> &[Value] {
        &self.conversation
    }

    /// Consecutive user turns are merged: the API wants roles to alternate and
    /// tool results to lead the turn that follows a tool call.
    fn push_user(&mut self, block: Value) {
        if let Some(last) = self.conversation.last_mut() {
            if last["role"] == "user" {
                if let Some(content) = last["content"].as_array_mut() {
                    content.push(block);
                    return;
                }
            }
        }
        self.conversation
            .push(json!({"role": "user", "content": [block]}));
    }
}

/// Page description sent with every step.
pub fn render_page_context(page: &PageContext) -> String {
    let mut out = format!("Current page: {}\nURL: {}\n", page.title, page.url);
    if page.interactive_elements.is_empty() {
        out.push_str("\nNo interactive elements found.\n");
    } else {
        out.push_str("\nInteractive elements:\n");
        for (i, e) in page.interactive_elements.iter().enumerate() {
            out.push_str(&format!("[{}] {} \"{}\" {}", i + 1, e.kind, e.text, e.selector));
            if !e.href.is_empty() {
                out.push_str(&format!(" href={}", e.href));
            }
            out.push('\n');
        }
    }
    if !page.visible_text.is_empty() {
        let text: String = page.visible_text.chars().take(VISIBLE_TEXT_CHARS).collect();
        out.push_str(&format!("\nVisible text:\n{text}\n"));
    }
    out
}

/// Split a response into the decision and the assistant turn to record. Only
/// the first tool call is kept, so every recorded call gets exactly one result.
fn interpret(response: &MessagesResponse) -> Result<(Decision, Vec<Value>)> {
    let reasoning = response.text();
    let mut recorded = Vec::new();
    if !reasoning.is_empty() {
        recorded.push(json!({"type": "text", "text": reasoning}));
    }

    let tool_use = response.content.iter().find_map(|b| match b {
        ContentBlock::ToolUse { id, name, input } => Some((id, name, input)),
        _ => None,
    });

    match tool_use {
        Some((id, name, input)) => {
            recorded.push(json!({"type": "tool_use", "id": id, "name": name, "input": input}));
            let intent = parse_tool_call(name, input)?;
            let decision = match intent {
                Intent::CompleteTask { result } => Decision::complete(result, id),
                intent => Decision::act(intent, id),
            };
            Ok((decision.with_reasoning(reasoning), recorded))
        }
        None if response.stop_reason.as_deref() == Some("end_turn") => {
            Ok((Decision::complete(reasoning.clone(), ""), recorded))
        }
        None => Err(anyhow!(
            "model returned no tool call (stop_reason: {})",
            response.stop_reason.as_deref().unwrap_or("none")
        )),
    }
}

#[async_trait]
impl DecisionSource for Brain {
    fn new_conversation(&mut self) {
        self.conversation.clear();
    }

    fn add_user_message(&mut self, task: &str, page: &PageContext) {
        let page_text = render_page_context(page);
        let text = if task.is_empty() {
            page_text
        } else {
            format!("Task: {task}\n\n{page_text}\nWhat is your next step?")
        };
        self.push_user(json!({"type": "text", "text": text}));
    }

    fn add_tool_result(&mut self, call_id: &str, text: &str, is_error: bool) {
        if call_id.is_empty() {
            self.push_user(json!({"type": "text", "text": text}));
            return;
        }
        self.push_user(json!({
            "type": "tool_result",
            "tool_use_id": call_id,
            "content": text,
            "is_error": is_error,
        }));
    }

    fn add_tool_result_with_image(
        &mut self,
        call_id: &str,
        text: &str,
        image_base64: &str,
        is_error: bool,
    ) {
        let image = json!({
            "type": "image",
            "source": {"type": "base64", "media_type": "image/png", "data": image_base64},
        });
        if call_id.is_empty() {
            self.push_user(json!({"type": "text", "text": text}));
            self.push_user(image);
            return;
        }
        self.push_user(json!({
            "type": "tool_result",
            "tool_use_id": call_id,
            "content": [{"type": "text", "text": text}, image],
            "is_error": is_error,
        }));
    }

    async fn decide_next_action(&mut self) -> Result<Decision> {
        if self.conversation.len() > 40 {
            warn!(messages = self.conversation.len(), "conversation history is long");
        }
        let response = self
            .client
            .create(SYSTEM_PROMPT, &self.conversation, Some(&self.tools))
            .await?;

        let (decision, recorded) = interpret(&response)?;
        if !recorded.is_empty() {
            self.conversation
                .push(json!({"role": "assistant", "content": recorded}));
        }
        if !decision.reasoning.is_empty() {
            debug!(reasoning = %decision.reasoning, "model reasoning");
        }
        info!(intent = %decision.intent.describe(), complete = decision.complete, "model decided");
        Ok(decision)
    }
}
