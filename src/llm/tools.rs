//! Tool catalogue offered to the model, and parsing of its tool calls.

use serde_json::{Map, Value, json};

use crate::error::AgentError;
use crate::types::Intent;

pub const TOOL_NAMES: &[&str] = &[
    "navigate",
    "click",
    "click_at_position",
    "type_text",
    "scroll",
    "wait",
    "press_enter",
    "take_screenshot",
    "query_dom",
    "analyze_page",
    "list_tabs",
    "switch_tab",
    "close_tab",
    "complete_task",
];

pub fn catalogue() -> Value {
    json!([
        tool("navigate", "Open a URL in the current tab.", json!({
            "url": {"type": "string", "description": "Absolute URL, including the scheme."}
        }), &["url"]),
        tool("click", "Click an element. Prefer `text:<visible label>`; a CSS selector from the page context also works.", json!({
            "selector": {"type": "string", "description": "`text:Sign in` or a CSS selector such as [data-agent-id=\"e3\"]."}
        }), &["selector"]),
        tool("click_at_position", "Click at viewport coordinates, e.g. ones returned by query_dom.", json!({
            "x": {"type": "integer"},
            "y": {"type": "integer"}
        }), &["x", "y"]),
        tool("type_text", "Replace the content of an input with text.", json!({
            "selector": {"type": "string", "description": "CSS selector of the input."},
            "text": {"type": "string"}
        }), &["selector", "text"]),
        tool("scroll", "Scroll the page by one screen.", json!({
            "direction": {"type": "string", "enum": ["up", "down"]}
        }), &["direction"]),
        tool("wait", "Wait until an element is present and visible.", json!({
            "selector": {"type": "string"}
        }), &["selector"]),
        tool("press_enter", "Press Enter in the focused element.", json!({}), &[]),
        tool("take_screenshot", "Capture the page and look at it.", json!({
            "full_page": {"type": "boolean", "description": "Whole document instead of the viewport."}
        }), &[]),
        tool("query_dom", "List the clickable elements currently visible, with selectors and coordinates.", json!({
            "query": {"type": "string", "description": "Optional filter on label or description."}
        }), &[]),
        tool("analyze_page", "Ask a page analyst a question about the current page structure.", json!({
            "question": {"type": "string"}
        }), &["question"]),
        tool("list_tabs", "List open tabs.", json!({}), &[]),
        tool("switch_tab", "Make another tab active.", json!({
            "index": {"type": "integer", "description": "1-based tab number from list_tabs."}
        }), &["index"]),
        tool("close_tab", "Close the current tab. The last tab cannot be closed.", json!({}), &[]),
        tool("complete_task", "Finish the task and report the outcome to the user.", json!({
            "result": {"type": "string", "description": "What was accomplished."}
        }), &["result"]),
    ])
}

fn tool(name: &str, description: &str, properties: Value, required: &[&str]) -> Value {
    json!({
        "name": name,
        "description": description,
        "input_schema": {
            "type": "object",
            "properties": properties,
            "required": required,
        }
    })
}

/// Turn one `tool_use` block into an intent.
pub fn parse_tool_call(name: &str, input: &Value) -> Result<Intent, AgentError> {
    if !TOOL_NAMES.contains(&name) {
        return Err(AgentError::UnknownIntent(name.to_string()));
    }
    let mut fields = match input {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(AgentError::UnknownIntent(format!(
                "{name}: arguments must be an object, got {other}"
            )));
        }
    };
    if name == "query_dom" {
        fields.entry("query").or_insert_with(|| Value::from(""));
    }
    fields.insert("action".into(), Value::from(name));
    serde_json::from_value(Value::Object(fields))
        .map_err(|e| AgentError::UnknownIntent(format!("{name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScrollDirection;

    #[test]
    fn catalogue_covers_every_intent() {
        let tools = catalogue();
        let names: Vec<&str> = tools
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, TOOL_NAMES);
    }

    #[test]
    fn tool_calls_become_intents() {
        assert_eq!(
            parse_tool_call("type_text", &json!({"selector": "#q", "text": "mouse"})).unwrap(),
            Intent::Type {
                selector: "#q".into(),
                text: "mouse".into()
            }
        );
        assert_eq!(
            parse_tool_call("scroll", &json!({"direction": "down"})).unwrap(),
            Intent::Scroll {
                direction: ScrollDirection::Down
            }
        );
        assert_eq!(
            parse_tool_call("take_screenshot", &json!({})).unwrap(),
            Intent::TakeScreenshot { full_page: false }
        );
        assert_eq!(
            parse_tool_call("query_dom", &Value::Null).unwrap(),
            Intent::QueryDom { query: String::new() }
        );
        assert_eq!(parse_tool_call("press_enter", &json!({})).unwrap(), Intent::PressEnter);
        assert_eq!(
            parse_tool_call("switch_tab", &json!({"index": 2})).unwrap(),
            Intent::SwitchTab { index: 2 }
        );
    }

    #[test]
    fn fractional_coordinates_are_rounded() {
        assert_eq!(
            parse_tool_call("click_at_position", &json!({"x": 412.5, "y": 88.2})).unwrap(),
            Intent::ClickAtPosition { x: 413, y: 88 }
        );
        assert_eq!(
            parse_tool_call("click_at_position", &json!({"x": 10, "y": -3})).unwrap(),
            Intent::ClickAtPosition { x: 10, y: -3 }
        );
        assert!(parse_tool_call("click_at_position", &json!({"x": "left", "y": 1})).is_err());
    }

    #[test]
    fn unknown_tools_and_bad_arguments_are_rejected() {
        assert!(matches!(
            parse_tool_call("format_disk", &json!({})),
            Err(AgentError::UnknownIntent(name)) if name == "format_disk"
        ));
        let err = parse_tool_call("navigate", &json!({})).unwrap_err();
        assert!(err.to_string().contains("navigate"));
        assert!(parse_tool_call("click", &json!("text:Go")).is_err());
    }
}
