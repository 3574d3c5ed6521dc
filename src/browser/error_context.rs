use tracing::debug;

use super::Page;
use crate::error::BrowserError;
use crate::types::{ActionResult, ErrorContext};

pub const CANDIDATE_SELECTORS: &[&str] = &[
    "button",
    "a[href]",
    "input",
    "[role='button']",
    "[data-testid]",
];

pub const MAX_CANDIDATES: usize = 15;

/// Gather what the page offers instead of `failed_selector`. Never fails; an
/// unreadable page just yields no candidates.
pub async fn build_error_context(
    page: &dyn Page,
    failed_selector: &str,
    error: &BrowserError,
) -> ErrorContext {
    let similar = match page
        .describe_candidates(CANDIDATE_SELECTORS, MAX_CANDIDATES)
        .await
    {
        Ok(mut found) => {
            found.truncate(MAX_CANDIDATES);
            found
        }
        Err(e) => {
            debug!(error = %e, "could not collect candidate elements");
            Vec::new()
        }
    };
    let suggestion = suggestion_for(failed_selector, error, &similar);
    ErrorContext {
        failed_selector: failed_selector.to_string(),
        similar_elements: similar,
        suggestion,
    }
}

pub fn suggestion_for(selector: &str, error: &BrowserError, similar: &[String]) -> String {
    let not_found = || {
        if selector.to_lowercase().contains("modal") {
            "The modal looks closed. Open it again before interacting with it.".to_string()
        } else if !similar.is_empty() {
            "Element not found. Try an alternative selector from the list above.".to_string()
        } else {
            "Element not found. The page may still be loading or the element is hidden."
                .to_string()
        }
    };
    let not_visible =
        || "The element is hidden. Scroll the page or open the menu that contains it.".to_string();
    let not_clickable = || {
        "The element is covered, probably by an overlay or modal. Close it or scroll first."
            .to_string()
    };

    match error {
        BrowserError::ElementNotFound(_)
        | BrowserError::PageLoadTimeout(_)
        | BrowserError::StabilityTimeout(_) => not_found(),
        BrowserError::ElementNotVisible(_) => not_visible(),
        BrowserError::ClickFailed(_) => not_clickable(),
        other => {
            let message = other.to_string().to_lowercase();
            if message.contains("not found") || message.contains("timeout") {
                not_found()
            } else if message.contains("not visible") {
                not_visible()
            } else if message.contains("not clickable") {
                not_clickable()
            } else {
                "Try an alternative selector.".to_string()
            }
        }
    }
}

/// Tool-result text for a failed action: the message, then the context if any.
pub fn format_failure(result: &ActionResult) -> String {
    let Some(context) = &result.error_context else {
        return result.message.clone();
    };
    let mut out = format!("{}\n\nFailed selector: {}\n", result.message, context.failed_selector);
    if !context.similar_elements.is_empty() {
        out.push_str("\nElements on the page:\n");
        for (i, element) in context.similar_elements.iter().enumerate() {
            out.push_str(&format!("  {}. {element}\n", i + 1));
        }
    }
    out.push_str(&format!("\nHint: {}", context.suggestion));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Intent;

    #[test]
    fn suggestion_follows_error_kind() {
        let none: Vec<String> = Vec::new();
        let some = vec!["button#go (\"Go\")".to_string()];

        let s = suggestion_for("#go", &BrowserError::ElementNotFound("#go".into()), &some);
        assert!(s.contains("alternative selector"));

        let s = suggestion_for("#go", &BrowserError::ElementNotFound("#go".into()), &none);
        assert!(s.contains("still be loading"));

        let s = suggestion_for(".modal button", &BrowserError::ElementNotFound("x".into()), &some);
        assert!(s.contains("modal looks closed"));

        let s = suggestion_for("#go", &BrowserError::ElementNotVisible("#go".into()), &none);
        assert!(s.contains("Scroll the page"));

        let s = suggestion_for("#go", &BrowserError::ClickFailed("#go".into()), &none);
        assert!(s.contains("overlay"));
    }

    #[test]
    fn protocol_errors_fall_back_to_message_inspection() {
        let err = BrowserError::Protocol("wait timeout while locating".into());
        assert!(suggestion_for("#x", &err, &[]).contains("Element not found"));

        let err = BrowserError::Protocol("socket closed".into());
        assert_eq!(suggestion_for("#x", &err, &[]), "Try an alternative selector.");
    }

    #[test]
    fn failure_text_lists_candidates() {
        let intent = Intent::Type {
            selector: "#search".into(),
            text: "mouse".into(),
        };
        let result = ActionResult::fail(&intent, "element not found: #search").with_error_context(
            ErrorContext {
                failed_selector: "#search".into(),
                similar_elements: vec!["input#q".into(), "button (\"Search\")".into()],
                suggestion: "Try an alternative selector.".into(),
            },
        );
        let text = format_failure(&result);
        assert!(text.starts_with("element not found: #search"));
        assert!(text.contains("  1. input#q\n"));
        assert!(text.contains("  2. button (\"Search\")\n"));
        assert!(text.ends_with("Hint: Try an alternative selector."));
    }
}
