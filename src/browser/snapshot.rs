use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::ActiveTab;
use super::scripts::{FIND_ELEMENTS_JS, PAGE_CONTEXT_JS};
use crate::agent::SnapshotProvider;
use crate::types::{Element, PageContext};

/// Reads whatever tab is active at the moment of the call.
#[derive(Clone)]
pub struct DomSnapshot {
    tab: ActiveTab,
}

impl DomSnapshot {
    pub fn new(tab: ActiveTab) -> Self {
        Self { tab }
    }
}

#[derive(Deserialize)]
struct RawContext {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    elements: Vec<Element>,
    #[serde(default)]
    text: String,
}

/// A clickable element as found by the live scan.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveElement {
    pub display_selector: String,
    #[serde(default)]
    pub css_selector: String,
    #[serde(default)]
    pub description: String,
    pub x: i64,
    pub y: i64,
}

#[async_trait]
impl SnapshotProvider for DomSnapshot {
    async fn page_context(&self) -> anyhow::Result<PageContext> {
        let page = self.tab.current();
        let url = page.url().await.context("reading page url")?;
        if url.is_empty() || url == "about:blank" {
            return Ok(PageContext {
                url,
                title: "Blank page".into(),
                interactive_elements: Vec::new(),
                visible_text: "The browser is on a blank page. Navigate somewhere first.".into(),
            });
        }

        let value = page
            .eval_json(PAGE_CONTEXT_JS)
            .await
            .context("extracting page context")?;
        let raw: RawContext =
            serde_json::from_value(value).context("decoding page context")?;
        debug!(url = %raw.url, elements = raw.elements.len(), "page context extracted");
        Ok(PageContext {
            url: raw.url,
            title: raw.title,
            interactive_elements: raw.elements,
            visible_text: raw.text,
        })
    }

    async fn html(&self) -> anyhow::Result<String> {
        let html = self.tab.current().html().await.context("reading page html")?;
        Ok(html)
    }

    async fn find_elements_live(&self, query: &str) -> anyhow::Result<String> {
        let value = self
            .tab
            .current()
            .eval_json(FIND_ELEMENTS_JS)
            .await
            .context("scanning live elements")?;
        let found: Vec<LiveElement> =
            serde_json::from_value(value).context("decoding live elements")?;
        let query = query.trim().to_lowercase();
        let matching: Vec<LiveElement> = found
            .into_iter()
            .filter(|e| {
                query.is_empty()
                    || e.display_selector.to_lowercase().contains(&query)
                    || e.description.to_lowercase().contains(&query)
            })
            .collect();
        Ok(format_live_elements(&matching))
    }
}

/// Numbered listing with the selector to use, the raw CSS when it is unique,
/// and the click position.
pub fn format_live_elements(elements: &[LiveElement]) -> String {
    if elements.is_empty() {
        return "No elements found.".to_string();
    }
    let mut out = String::from("Clickable elements:\n\n");
    for (i, e) in elements.iter().enumerate() {
        out.push_str(&format!("{}. {}", i + 1, e.display_selector));
        if !e.css_selector.is_empty() && e.css_selector != e.display_selector {
            out.push_str(&format!(" [{}]", e.css_selector));
        }
        out.push_str(&format!(" [{},{}]", e.x, e.y));
        if !e.description.is_empty() && !e.display_selector.ends_with(&e.description) {
            out.push_str(&format!(" - {}", e.description));
        }
        out.push('\n');
    }
    out.push_str(
        "\nTip: click with the text: selector shown, or use click_at_position with the coordinates.",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_elements_parse_from_scan_output() {
        let json = serde_json::json!([
            {"displaySelector": "text:Sign in", "cssSelector": "button#login", "description": "Sign in", "x": 10, "y": 20},
            {"displaySelector": "input[name=\"q\"]", "cssSelector": "", "description": "Search", "x": 300, "y": 40}
        ]);
        let parsed: Vec<LiveElement> = serde_json::from_value(json).unwrap();
        let text = format_live_elements(&parsed);
        assert!(text.starts_with("Clickable elements:\n\n"));
        assert!(text.contains("1. text:Sign in [button#login] [10,20]\n"));
        assert!(text.contains("2. input[name=\"q\"] [300,40] - Search\n"));
        assert!(text.contains("Tip:"));
    }

    #[test]
    fn empty_scan_says_so() {
        assert_eq!(format_live_elements(&[]), "No elements found.");
    }
}
