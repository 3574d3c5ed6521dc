use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One user request. Only moves `pending -> running -> {completed | failed}`.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn start(&mut self) -> Result<(), AgentError> {
        self.transition(TaskStatus::Pending, "start")?;
        self.status = TaskStatus::Running;
        Ok(())
    }

    pub fn complete(&mut self, result: impl Into<String>) -> Result<(), AgentError> {
        self.transition(TaskStatus::Running, "complete")?;
        self.status = TaskStatus::Completed;
        self.result = Some(result.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, error: &AgentError) -> Result<(), AgentError> {
        self.transition(TaskStatus::Running, "fail")?;
        self.status = TaskStatus::Failed;
        self.error = Some(error.to_string());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }

    fn transition(&self, expected: TaskStatus, action: &'static str) -> Result<(), AgentError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(AgentError::StateConflict {
                from: self.status,
                action,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

impl fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrollDirection::Up => f.write_str("up"),
            ScrollDirection::Down => f.write_str("down"),
        }
    }
}

/// A single atomic browser operation requested by the decision source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Intent {
    Navigate { url: String },
    /// `selector` is either `text:<label>` or a raw element query.
    Click { selector: String },
    ClickAtPosition {
        #[serde(deserialize_with = "round_coordinate")]
        x: i64,
        #[serde(deserialize_with = "round_coordinate")]
        y: i64,
    },
    #[serde(rename = "type_text")]
    Type { selector: String, text: String },
    Scroll { direction: ScrollDirection },
    Wait { selector: String },
    PressEnter,
    TakeScreenshot {
        #[serde(default)]
        full_page: bool,
    },
    QueryDom { query: String },
    AnalyzePage { question: String },
    ListTabs,
    /// 1-based.
    SwitchTab { index: usize },
    CloseTab,
    CompleteTask { result: String },
}

/// Models sometimes send fractional pixels.
fn round_coordinate<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() {
        return Err(serde::de::Error::custom("coordinate must be a finite number"));
    }
    Ok(value.round() as i64)
}

impl Intent {
    /// Tool name used in conversations, logs and progress events.
    pub fn kind(&self) -> &'static str {
        match self {
            Intent::Navigate { .. } => "navigate",
            Intent::Click { .. } => "click",
            Intent::ClickAtPosition { .. } => "click_at_position",
            Intent::Type { .. } => "type_text",
            Intent::Scroll { .. } => "scroll",
            Intent::Wait { .. } => "wait",
            Intent::PressEnter => "press_enter",
            Intent::TakeScreenshot { .. } => "take_screenshot",
            Intent::QueryDom { .. } => "query_dom",
            Intent::AnalyzePage { .. } => "analyze_page",
            Intent::ListTabs => "list_tabs",
            Intent::SwitchTab { .. } => "switch_tab",
            Intent::CloseTab => "close_tab",
            Intent::CompleteTask { .. } => "complete_task",
        }
    }

    pub fn selector(&self) -> Option<&str> {
        match self {
            Intent::Click { selector } | Intent::Type { selector, .. } | Intent::Wait { selector } => {
                Some(selector)
            }
            _ => None,
        }
    }

    /// Lower-cased selector + value, the text risk rules look at.
    pub fn match_text(&self) -> String {
        let raw = match self {
            Intent::Click { selector } | Intent::Wait { selector } => selector.clone(),
            Intent::Type { selector, text } => format!("{selector} {text}"),
            Intent::Navigate { url } => url.clone(),
            _ => String::new(),
        };
        raw.to_lowercase()
    }

    pub fn is_click(&self) -> bool {
        matches!(self, Intent::Click { .. } | Intent::ClickAtPosition { .. })
    }

    /// Short human description, e.g. `click sel=#submit`.
    pub fn describe(&self) -> String {
        match self {
            Intent::Navigate { url } => format!("navigate url={url}"),
            Intent::ClickAtPosition { x, y } => format!("click_at_position x={x} y={y}"),
            Intent::Scroll { direction } => format!("scroll direction={direction}"),
            Intent::SwitchTab { index } => format!("switch_tab index={index}"),
            other => match other.selector() {
                Some(selector) => format!("{} sel={}", other.kind(), selector),
                None => other.kind().to_string(),
            },
        }
    }

    /// Key/value view for progress output.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        match self {
            Intent::Navigate { url } => vec![("url", url.clone())],
            Intent::Click { selector } | Intent::Wait { selector } => {
                vec![("selector", selector.clone())]
            }
            Intent::Type { selector, text } => {
                vec![("selector", selector.clone()), ("text", text.clone())]
            }
            Intent::ClickAtPosition { x, y } => vec![("x", x.to_string()), ("y", y.to_string())],
            Intent::Scroll { direction } => vec![("direction", direction.to_string())],
            Intent::TakeScreenshot { full_page } => vec![("full_page", full_page.to_string())],
            Intent::QueryDom { query } => vec![("query", query.clone())],
            Intent::AnalyzePage { question } => vec![("question", question.clone())],
            Intent::SwitchTab { index } => vec![("index", index.to_string())],
            Intent::CompleteTask { result } => vec![("result", result.clone())],
            Intent::PressEnter | Intent::ListTabs | Intent::CloseTab => Vec::new(),
        }
    }
}

/// The decision source's choice for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub intent: Intent,
    pub reasoning: String,
    /// Correlates the eventual tool result back into the source's conversation.
    pub tool_call_id: String,
    pub complete: bool,
    pub result_text: String,
}

impl Decision {
    pub fn act(intent: Intent, tool_call_id: impl Into<String>) -> Self {
        Self {
            intent,
            reasoning: String::new(),
            tool_call_id: tool_call_id.into(),
            complete: false,
            result_text: String::new(),
        }
    }

    pub fn complete(result: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        let result = result.into();
        Self {
            intent: Intent::CompleteTask {
                result: result.clone(),
            },
            reasoning: String::new(),
            tool_call_id: tool_call_id.into(),
            complete: true,
            result_text: result,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub failed_selector: String,
    pub similar_elements: Vec<String>,
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screenshot {
    pub path: String,
    pub base64: String,
}

/// Outcome of exactly one executed intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub intent_kind: String,
    pub message: String,
    pub error_context: Option<ErrorContext>,
    pub screenshot: Option<Screenshot>,
    pub query_result: Option<String>,
}

impl ActionResult {
    pub fn ok(intent: &Intent, message: impl Into<String>) -> Self {
        Self::new(true, intent, message)
    }

    pub fn fail(intent: &Intent, message: impl Into<String>) -> Self {
        Self::new(false, intent, message)
    }

    fn new(success: bool, intent: &Intent, message: impl Into<String>) -> Self {
        Self {
            success,
            intent_kind: intent.kind().to_string(),
            message: message.into(),
            error_context: None,
            screenshot: None,
            query_result: None,
        }
    }

    pub fn with_error_context(mut self, context: ErrorContext) -> Self {
        self.error_context = Some(context);
        self
    }

    pub fn with_query_result(mut self, result: impl Into<String>) -> Self {
        self.query_result = Some(result.into());
        self
    }
}

/// What the decision source sees of the current page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageContext {
    pub url: String,
    pub title: String,
    pub interactive_elements: Vec<Element>,
    pub visible_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub tag: String,
    pub text: String,
    pub selector: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub href: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_follows_state_machine() {
        let mut task = Task::new("open example.com");
        assert_eq!(task.status, TaskStatus::Pending);

        task.start().unwrap();
        assert_eq!(task.status, TaskStatus::Running);

        task.complete("done").unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("done"));
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn out_of_order_transitions_conflict() {
        let mut task = Task::new("x");
        assert!(matches!(
            task.complete("early"),
            Err(AgentError::StateConflict { from: TaskStatus::Pending, .. })
        ));

        task.start().unwrap();
        assert!(matches!(task.start(), Err(AgentError::StateConflict { .. })));

        task.fail(&AgentError::Cancelled).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("task cancelled"));
        assert!(task.complete("late").is_err());
    }

    #[test]
    fn intent_match_text_combines_selector_and_value() {
        let intent = Intent::Type {
            selector: "#Password".into(),
            text: "Hunter2".into(),
        };
        assert_eq!(intent.match_text(), "#password hunter2");
        assert_eq!(intent.describe(), "type_text sel=#Password");
    }

    #[test]
    fn intent_serializes_with_action_tag() {
        let json = serde_json::to_value(Intent::Scroll {
            direction: ScrollDirection::Down,
        })
        .unwrap();
        assert_eq!(json["action"], "scroll");
        assert_eq!(json["direction"], "down");
    }
}
