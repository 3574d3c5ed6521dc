use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error_context::build_error_context;
use super::{ActiveTab, BrowserResult, ClickTiming, Locator, Page, TabManager};
use crate::config::Timeouts;
use crate::error::BrowserError;
use crate::types::{ActionResult, Intent, Screenshot, ScrollDirection};

const SCROLL_STEP: i64 = 500;

/// Turns one intent into an effect on the active tab.
///
/// Never fails past its boundary: every error becomes a negative
/// `ActionResult`, with an error context for selector-bearing intents.
pub struct ActionExecutor {
    tabs: TabManager,
    timeouts: Timeouts,
    screenshots_dir: PathBuf,
}

/// Tab count and URL before an interaction, to notice what it opened.
struct Before {
    tabs: usize,
    url: String,
}

impl ActionExecutor {
    pub fn new(tabs: TabManager, timeouts: Timeouts, screenshots_dir: impl Into<PathBuf>) -> Self {
        Self {
            tabs,
            timeouts,
            screenshots_dir: screenshots_dir.into(),
        }
    }

    pub fn tabs(&self) -> &TabManager {
        &self.tabs
    }

    pub fn active_tab(&self) -> ActiveTab {
        self.tabs.active_tab()
    }

    pub async fn execute(&mut self, intent: &Intent) -> ActionResult {
        debug!(intent = %intent.describe(), "executing");
        match self.run(intent).await {
            Ok(result) => result,
            Err(err) => {
                warn!(intent = %intent.describe(), error = %err, "action failed");
                let result = ActionResult::fail(intent, err.to_string());
                match intent.selector() {
                    Some(selector) => {
                        let page = self.tabs.current();
                        let context = build_error_context(page.as_ref(), selector, &err).await;
                        result.with_error_context(context)
                    }
                    None => result,
                }
            }
        }
    }

    async fn run(&mut self, intent: &Intent) -> BrowserResult<ActionResult> {
        let page = self.tabs.current();
        match intent {
            Intent::Navigate { url } => {
                self.navigate(page.as_ref(), url).await?;
                Ok(ActionResult::ok(intent, format!("Navigated to {url}")))
            }
            Intent::Click { selector } => {
                let before = self.before(page.as_ref()).await;
                let how = match selector.strip_prefix("text:") {
                    Some(text) => self.click_text(page.as_ref(), text).await?,
                    None => self.click_css(page.as_ref(), selector).await?,
                };
                info!(selector = %selector, strategy = how, "clicked");
                self.settle(page.as_ref(), self.timeouts.stability).await;
                let follow = self.follow(before).await;
                Ok(ActionResult::ok(intent, format!("Clicked {selector}{follow}")))
            }
            Intent::ClickAtPosition { x, y } => {
                let before = self.before(page.as_ref()).await;
                self.click_at(page.as_ref(), *x as f64, *y as f64).await?;
                let follow = self.follow(before).await;
                Ok(ActionResult::ok(intent, format!("Clicked at ({x}, {y}){follow}")))
            }
            Intent::Type { selector, text } => {
                page.type_text(selector, text, self.timeouts.element).await?;
                self.settle(page.as_ref(), self.timeouts.short_stability).await;
                Ok(ActionResult::ok(intent, format!("Typed \"{text}\" into {selector}")))
            }
            Intent::Scroll { direction } => {
                let delta = match direction {
                    ScrollDirection::Up => SCROLL_STEP,
                    ScrollDirection::Down => -SCROLL_STEP,
                };
                page.scroll_by(delta).await?;
                tokio::time::sleep(self.timeouts.scroll_settle).await;
                Ok(ActionResult::ok(intent, format!("Scrolled {direction}")))
            }
            Intent::Wait { selector } => {
                page.wait_visible(selector, self.timeouts.element).await?;
                Ok(ActionResult::ok(intent, format!("Element {selector} is visible")))
            }
            Intent::PressEnter => {
                let before = self.before(page.as_ref()).await;
                page.press_enter().await?;
                self.settle(page.as_ref(), self.timeouts.short_stability).await;
                let follow = self.follow(before).await;
                Ok(ActionResult::ok(intent, format!("Pressed Enter{follow}")))
            }
            Intent::TakeScreenshot { full_page } => {
                let bytes = page.screenshot(*full_page).await?;
                let shot = self.store_screenshot(&bytes).await;
                let mut result = ActionResult::ok(intent, format!("Screenshot saved to {}", shot.path));
                result.screenshot = Some(shot);
                Ok(result)
            }
            Intent::ListTabs => {
                let listing = self.tabs.list_tabs().await?;
                Ok(ActionResult::ok(intent, listing))
            }
            Intent::SwitchTab { index } => {
                self.tabs.switch_to_tab(*index).await?;
                let url = self.tabs.current().url().await.unwrap_or_default();
                Ok(ActionResult::ok(intent, format!("Switched to tab {index}: {url}")))
            }
            Intent::CloseTab => {
                self.tabs.close_current().await?;
                let url = self.tabs.current().url().await.unwrap_or_default();
                Ok(ActionResult::ok(intent, format!("Closed tab, now on {url}")))
            }
            Intent::QueryDom { .. } | Intent::AnalyzePage { .. } => Ok(ActionResult::fail(
                intent,
                format!("{} is answered by the page analyst, not the browser", intent.kind()),
            )),
            Intent::CompleteTask { result } => Ok(ActionResult::ok(intent, result.clone())),
        }
    }

    /// A load timeout is only logged: dynamic pages are often usable before
    /// the load event fires.
    async fn navigate(&self, page: &dyn Page, url: &str) -> BrowserResult<()> {
        info!(url = %url, "navigating");
        page.navigate(url).await?;
        match page.wait_for_load(self.timeouts.navigation).await {
            Err(e) if e.is_soft() => warn!(url = %url, error = %e, "page load timed out, continuing"),
            other => other?,
        }
        self.settle(page, self.timeouts.stability).await;
        Ok(())
    }

    /// exact, partial, first two words, then the in-page heuristic.
    async fn click_text(&self, page: &dyn Page, text: &str) -> BrowserResult<&'static str> {
        let full = ClickTiming {
            locate: self.timeouts.element,
            visible: self.timeouts.visible,
            settle: self.timeouts.settle,
        };
        let retry = ClickTiming {
            locate: self.timeouts.retry_locate,
            ..full
        };

        let chain = [
            ("exact", Locator::exact(text), full),
            ("partial", Locator::contains(text), retry),
            ("shortened", Locator::exact(shortened(text)), retry),
        ];

        let mut found_but_failed = None;
        for (strategy, locator, timing) in chain {
            match page.click(&locator, timing).await {
                Ok(()) => return Ok(strategy),
                Err(e) => {
                    debug!(strategy, locator = %locator, error = %e, "click strategy failed");
                    if !matches!(e, BrowserError::ElementNotFound(_)) && found_but_failed.is_none() {
                        found_but_failed = Some(e);
                    }
                }
            }
        }

        match page.click_text(text).await {
            Ok(hit) => {
                info!(tag = %hit.tag, matched = %hit.strategy, text = %hit.text, "clicked via page script");
                Ok("script")
            }
            Err(e) => {
                debug!(error = %e, "page script click failed");
                Err(found_but_failed
                    .unwrap_or_else(|| BrowserError::ElementNotFound(format!("text:{text}"))))
            }
        }
    }

    async fn click_css(&self, page: &dyn Page, selector: &str) -> BrowserResult<&'static str> {
        let timing = ClickTiming {
            locate: self.timeouts.element,
            visible: self.timeouts.visible,
            settle: self.timeouts.settle,
        };
        let native = match page.click(&Locator::Css(selector.to_string()), timing).await {
            Ok(()) => return Ok("native"),
            Err(e) => e,
        };
        debug!(selector = %selector, error = %native, "native click failed, trying page script");
        match page.click_selector(selector).await {
            Ok(()) => Ok("script"),
            Err(e) => {
                debug!(error = %e, "page script click failed");
                Err(native)
            }
        }
    }

    async fn click_at(&self, page: &dyn Page, x: f64, y: f64) -> BrowserResult<()> {
        info!(x, y, "clicking at position");
        if let Err(e) = page.move_pointer(x, y, true).await {
            warn!(error = %e, "smooth pointer move failed, jumping");
            page.move_pointer(x, y, false).await?;
        }
        tokio::time::sleep(self.timeouts.pointer_pause).await;
        page.click_pointer(x, y).await?;
        self.settle(page, self.timeouts.stability).await;
        Ok(())
    }

    /// Best-effort DOM stability wait.
    async fn settle(&self, page: &dyn Page, timeout: Duration) {
        if let Err(e) = page.wait_stable(self.timeouts.quiet_period, timeout).await {
            if e.is_soft() {
                warn!(error = %e, "page did not settle, continuing");
            } else {
                debug!(error = %e, "stability wait unavailable");
            }
        }
    }

    async fn before(&self, page: &dyn Page) -> Before {
        Before {
            tabs: self.tabs.tab_count().await,
            url: page.url().await.unwrap_or_default(),
        }
    }

    /// Follow a new tab, or wait out a same-tab navigation. Returns a suffix
    /// for the result message.
    async fn follow(&mut self, before: Before) -> String {
        let count = self.tabs.tab_count().await;
        if count > before.tabs && self.tabs.switch_to_newest().await {
            let url = self.tabs.current().url().await.unwrap_or_default();
            return format!("; opened new tab {count} ({url}), now active");
        }

        let page: Arc<dyn Page> = self.tabs.current();
        let url = page.url().await.unwrap_or_default();
        if !url.is_empty() && url != before.url {
            info!(from = %before.url, to = %url, "page changed after interaction");
            if let Err(e) = page.wait_for_load(self.timeouts.navigation).await {
                warn!(error = %e, "load after interaction did not finish");
            }
            self.settle(page.as_ref(), self.timeouts.short_stability).await;
            return format!("; navigated to {url}");
        }
        String::new()
    }

    /// Saving is best effort; the image still goes back to the decision source.
    async fn store_screenshot(&self, bytes: &[u8]) -> Screenshot {
        let name = format!("screenshot-{}.png", chrono::Utc::now().timestamp_millis());
        let path = self.screenshots_dir.join(name);
        let saved = async {
            tokio::fs::create_dir_all(&self.screenshots_dir).await?;
            tokio::fs::write(&path, bytes).await
        }
        .await;
        match saved {
            Ok(()) => info!(path = %path.display(), bytes = bytes.len(), "screenshot saved"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to save screenshot"),
        }
        Screenshot {
            path: path.display().to_string(),
            base64: STANDARD.encode(bytes),
        }
    }
}

/// First two words. Labels of one or two words come back whole.
fn shortened(text: &str) -> String {
    text.split_whitespace().take(2).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortened_text_is_first_two_words() {
        assert_eq!(shortened("Accept all cookies now"), "Accept all");
        assert_eq!(shortened("  Sign   In "), "Sign In");
        assert_eq!(shortened("Go"), "Go");
    }
}
