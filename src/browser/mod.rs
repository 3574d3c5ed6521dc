//! Browser side of the loop.
//!
//! Two backends sit behind each page: the native automation protocol and
//! injected page scripts. The executor composes them into fallback chains; tests
//! substitute both with fakes.

pub mod chrome;
mod error_context;
mod executor;
pub mod scripts;
mod snapshot;
mod tabs;

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use chrome::ChromeBrowser;
pub use error_context::{CANDIDATE_SELECTORS, MAX_CANDIDATES, build_error_context, format_failure, suggestion_for};
pub use executor::ActionExecutor;
pub use snapshot::{DomSnapshot, LiveElement, format_live_elements};
pub use tabs::{ActiveTab, TabManager};

use crate::error::BrowserError;

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextMatch {
    Exact,
    Contains,
}

/// How the native backend should find an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    Text { text: String, mode: TextMatch },
}

impl Locator {
    pub fn exact(text: impl Into<String>) -> Self {
        Locator::Text {
            text: text.into(),
            mode: TextMatch::Exact,
        }
    }

    pub fn contains(text: impl Into<String>) -> Self {
        Locator::Text {
            text: text.into(),
            mode: TextMatch::Contains,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(selector) => write!(f, "css:{selector}"),
            Locator::Text {
                text,
                mode: TextMatch::Exact,
            } => write!(f, "text-exact:{text}"),
            Locator::Text {
                text,
                mode: TextMatch::Contains,
            } => write!(f, "text-contains:{text}"),
        }
    }
}

/// Budgets for one native click: locate, wait until visible, settle before the
/// pointer goes down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickTiming {
    pub locate: Duration,
    pub visible: Duration,
    pub settle: Duration,
}

/// What the in-page text heuristic ended up clicking.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptHit {
    pub strategy: String,
    pub tag: String,
    #[serde(default)]
    pub text: String,
}

/// Operations that go through the browser's automation protocol.
#[async_trait]
pub trait NativeBackend: Send + Sync {
    /// Issue the navigation only. Loading is awaited separately.
    async fn navigate(&self, url: &str) -> BrowserResult<()>;

    /// `PageLoadTimeout` when the load does not finish in time.
    async fn wait_for_load(&self, timeout: Duration) -> BrowserResult<()>;

    /// Locate, scroll into view, settle, hover, wait until visible, click.
    async fn click(&self, locator: &Locator, timing: ClickTiming) -> BrowserResult<()>;

    async fn move_pointer(&self, x: f64, y: f64, smooth: bool) -> BrowserResult<()>;

    async fn click_pointer(&self, x: f64, y: f64) -> BrowserResult<()>;

    /// Locate within `locate`, scroll into view, focus, clear, insert `text`.
    async fn type_text(&self, selector: &str, text: &str, locate: Duration) -> BrowserResult<()>;

    async fn wait_visible(&self, selector: &str, timeout: Duration) -> BrowserResult<()>;

    async fn press_enter(&self) -> BrowserResult<()>;

    /// PNG bytes.
    async fn screenshot(&self, full_page: bool) -> BrowserResult<Vec<u8>>;

    async fn url(&self) -> BrowserResult<String>;

    async fn title(&self) -> BrowserResult<String>;

    async fn html(&self) -> BrowserResult<String>;
}

/// Operations implemented by injecting script into the page.
#[async_trait]
pub trait ScriptBackend: Send + Sync {
    async fn click_selector(&self, selector: &str) -> BrowserResult<()>;

    /// Visible elements in priority order, matched exact, prefix, all words,
    /// then aria-label.
    async fn click_text(&self, text: &str) -> BrowserResult<ScriptHit>;

    /// Positive deltas move toward the top of the document.
    async fn scroll_by(&self, delta: i64) -> BrowserResult<()>;

    /// Resolves once the DOM has been quiet for `quiet`; `StabilityTimeout`
    /// after `timeout`.
    async fn wait_stable(&self, quiet: Duration, timeout: Duration) -> BrowserResult<()>;

    /// Short descriptions of visible elements matching `selectors`, in order.
    async fn describe_candidates(&self, selectors: &[&str], limit: usize)
    -> BrowserResult<Vec<String>>;

    /// Evaluate a script that returns a JSON string and parse it.
    async fn eval_json(&self, script: &str) -> BrowserResult<serde_json::Value>;
}

/// One tab.
#[async_trait]
pub trait Page: NativeBackend + ScriptBackend {
    /// Stable identity across page list refreshes.
    fn id(&self) -> &str;

    async fn close(&self) -> BrowserResult<()>;

    /// Bring to front.
    async fn activate(&self) -> BrowserResult<()>;
}

#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Open pages in creation order.
    async fn pages(&self) -> BrowserResult<Vec<Arc<dyn Page>>>;

    async fn new_page(&self) -> BrowserResult<Arc<dyn Page>>;

    async fn shutdown(&self) -> BrowserResult<()>;
}
