//! Fake browser and collaborators for driving the loop without Chrome.
#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use agentic_browser::agent::{DecisionSource, DiagnosticAgent, SnapshotProvider};
use agentic_browser::browser::{
    BrowserHandle, BrowserResult, ClickTiming, Locator, NativeBackend, Page, ScriptBackend,
    ScriptHit, TextMatch, scripts,
};
use agentic_browser::security::{ConfirmChannel, Risk};
use agentic_browser::{BrowserError, Decision, Intent, PageContext};

/// What a fake page contains and how it reacts.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// Labels the native text lookup can find.
    pub native_text: Vec<String>,
    /// Labels only the in-page heuristic finds.
    pub script_text: Vec<String>,
    /// Selectors the native lookup can find.
    pub css: Vec<String>,
    /// Selectors only the in-page lookup finds.
    pub script_css: Vec<String>,
    pub candidates: Vec<String>,
    /// Successful clicks open a new tab.
    pub opens_tab: bool,
    /// Successful clicks navigate this tab.
    pub navigates_to: Option<String>,
    pub load_times_out: bool,
    pub html: String,
    pub page_json: Value,
    pub live_json: Value,
}

impl Behavior {
    pub fn with_text(mut self, label: &str) -> Self {
        self.native_text.push(label.to_string());
        self
    }

    pub fn with_script_text(mut self, label: &str) -> Self {
        self.script_text.push(label.to_string());
        self
    }

    pub fn with_css(mut self, selector: &str) -> Self {
        self.css.push(selector.to_string());
        self
    }

    pub fn with_script_css(mut self, selector: &str) -> Self {
        self.script_css.push(selector.to_string());
        self
    }

    pub fn with_candidates(mut self, candidates: &[&str]) -> Self {
        self.candidates = candidates.iter().map(|c| c.to_string()).collect();
        self
    }
}

#[derive(Default)]
struct World {
    pages: Mutex<Vec<Arc<FakePage>>>,
    log: Mutex<Vec<String>>,
    next_id: AtomicUsize,
}

impl World {
    fn record(&self, entry: String) {
        self.log.lock().push(entry);
    }

    fn open(self: &Arc<Self>, url: &str, behavior: Behavior) -> Arc<FakePage> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let page = Arc::new(FakePage {
            id: format!("page-{n}"),
            world: Arc::downgrade(self),
            url: Mutex::new(url.to_string()),
            title: Mutex::new(format!("Page {n}")),
            behavior: Mutex::new(behavior),
        });
        self.pages.lock().push(page.clone());
        page
    }
}

pub struct FakeBrowser {
    world: Arc<World>,
}

impl FakeBrowser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            world: Arc::new(World::default()),
        })
    }

    /// Browser with a single page at `url`.
    pub fn with_page(url: &str, behavior: Behavior) -> (Arc<Self>, Arc<FakePage>) {
        let browser = Self::new();
        let page = browser.open(url, behavior);
        (browser, page)
    }

    pub fn open(&self, url: &str, behavior: Behavior) -> Arc<FakePage> {
        self.world.open(url, behavior)
    }

    pub fn log(&self) -> Vec<String> {
        self.world.log.lock().clone()
    }

    /// Log entries starting with `prefix`.
    pub fn calls(&self, prefix: &str) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    pub fn page_ids(&self) -> Vec<String> {
        self.world.pages.lock().iter().map(|p| p.id.clone()).collect()
    }
}

#[async_trait]
impl BrowserHandle for FakeBrowser {
    async fn pages(&self) -> BrowserResult<Vec<Arc<dyn Page>>> {
        Ok(self
            .world
            .pages
            .lock()
            .iter()
            .map(|p| p.clone() as Arc<dyn Page>)
            .collect())
    }

    async fn new_page(&self) -> BrowserResult<Arc<dyn Page>> {
        self.world.record("browser.new_page".into());
        Ok(self.world.open("about:blank", Behavior::default()))
    }

    async fn shutdown(&self) -> BrowserResult<()> {
        self.world.record("browser.shutdown".into());
        Ok(())
    }
}

pub struct FakePage {
    id: String,
    world: Weak<World>,
    url: Mutex<String>,
    title: Mutex<String>,
    behavior: Mutex<Behavior>,
}

impl FakePage {
    pub fn page_id(&self) -> &str {
        &self.id
    }

    pub fn set_title(&self, title: &str) {
        *self.title.lock() = title.to_string();
    }

    pub fn current_url(&self) -> String {
        self.url.lock().clone()
    }

    fn record(&self, entry: String) {
        if let Some(world) = self.world.upgrade() {
            world.record(entry);
        }
    }

    /// Side effects of a successful interaction.
    fn interacted(&self) {
        let behavior = self.behavior.lock().clone();
        if behavior.opens_tab {
            if let Some(world) = self.world.upgrade() {
                world.open("https://popup.example.com/", Behavior::default());
            }
        }
        if let Some(url) = behavior.navigates_to {
            *self.url.lock() = url;
        }
    }
}

#[async_trait]
impl NativeBackend for FakePage {
    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        self.record(format!("native.navigate {url}"));
        if url.starts_with("bad://") {
            return Err(BrowserError::NavigationFailed(url.to_string()));
        }
        *self.url.lock() = url.to_string();
        Ok(())
    }

    async fn wait_for_load(&self, _timeout: Duration) -> BrowserResult<()> {
        self.record("native.wait_for_load".into());
        if self.behavior.lock().load_times_out {
            return Err(BrowserError::PageLoadTimeout(self.current_url()));
        }
        Ok(())
    }

    async fn click(&self, locator: &Locator, _timing: ClickTiming) -> BrowserResult<()> {
        self.record(format!("native.click {locator}"));
        let found = {
            let b = self.behavior.lock();
            match locator {
                Locator::Css(selector) => b.css.contains(selector),
                Locator::Text {
                    text,
                    mode: TextMatch::Exact,
                } => b.native_text.iter().any(|t| t == text),
                Locator::Text {
                    text,
                    mode: TextMatch::Contains,
                } => b.native_text.iter().any(|t| t.contains(text.as_str())),
            }
        };
        if !found {
            return Err(BrowserError::ElementNotFound(locator.to_string()));
        }
        self.interacted();
        Ok(())
    }

    async fn move_pointer(&self, x: f64, y: f64, smooth: bool) -> BrowserResult<()> {
        self.record(format!("native.move_pointer {x},{y} smooth={smooth}"));
        Ok(())
    }

    async fn click_pointer(&self, x: f64, y: f64) -> BrowserResult<()> {
        self.record(format!("native.click_pointer {x},{y}"));
        self.interacted();
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str, _locate: Duration) -> BrowserResult<()> {
        self.record(format!("native.type {selector}={text}"));
        if !self.behavior.lock().css.iter().any(|s| s == selector) {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        Ok(())
    }

    async fn wait_visible(&self, selector: &str, _timeout: Duration) -> BrowserResult<()> {
        self.record(format!("native.wait_visible {selector}"));
        if !self.behavior.lock().css.iter().any(|s| s == selector) {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        Ok(())
    }

    async fn press_enter(&self) -> BrowserResult<()> {
        self.record("native.press_enter".into());
        self.interacted();
        Ok(())
    }

    async fn screenshot(&self, full_page: bool) -> BrowserResult<Vec<u8>> {
        self.record(format!("native.screenshot full_page={full_page}"));
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn url(&self) -> BrowserResult<String> {
        Ok(self.current_url())
    }

    async fn title(&self) -> BrowserResult<String> {
        Ok(self.title.lock().clone())
    }

    async fn html(&self) -> BrowserResult<String> {
        Ok(self.behavior.lock().html.clone())
    }
}

#[async_trait]
impl ScriptBackend for FakePage {
    async fn click_selector(&self, selector: &str) -> BrowserResult<()> {
        self.record(format!("script.click_selector {selector}"));
        if !self.behavior.lock().script_css.iter().any(|s| s == selector) {
            return Err(BrowserError::Script(format!("no element for {selector}")));
        }
        self.interacted();
        Ok(())
    }

    async fn click_text(&self, text: &str) -> BrowserResult<ScriptHit> {
        self.record(format!("script.click_text {text}"));
        if !self.behavior.lock().script_text.iter().any(|t| t == text) {
            return Err(BrowserError::Script(format!("no element with text {text}")));
        }
        self.interacted();
        Ok(ScriptHit {
            strategy: "exact".into(),
            tag: "button".into(),
            text: text.to_string(),
        })
    }

    async fn scroll_by(&self, delta: i64) -> BrowserResult<()> {
        self.record(format!("script.scroll {delta}"));
        Ok(())
    }

    async fn wait_stable(&self, _quiet: Duration, _timeout: Duration) -> BrowserResult<()> {
        self.record("script.wait_stable".into());
        Ok(())
    }

    async fn describe_candidates(
        &self,
        _selectors: &[&str],
        limit: usize,
    ) -> BrowserResult<Vec<String>> {
        let mut found = self.behavior.lock().candidates.clone();
        found.truncate(limit);
        Ok(found)
    }

    async fn eval_json(&self, script: &str) -> BrowserResult<Value> {
        let b = self.behavior.lock();
        if script == scripts::PAGE_CONTEXT_JS {
            Ok(b.page_json.clone())
        } else if script == scripts::FIND_ELEMENTS_JS {
            Ok(b.live_json.clone())
        } else {
            Err(BrowserError::Script("unexpected script".into()))
        }
    }
}

#[async_trait]
impl Page for FakePage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn close(&self) -> BrowserResult<()> {
        self.record(format!("page.close {}", self.id));
        if let Some(world) = self.world.upgrade() {
            world.pages.lock().retain(|p| p.id != self.id);
        }
        Ok(())
    }

    async fn activate(&self) -> BrowserResult<()> {
        self.record(format!("page.activate {}", self.id));
        Ok(())
    }
}

/// What the loop told the decision source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceCall {
    NewConversation,
    User { task: String, url: String },
    ToolResult { id: String, text: String, is_error: bool },
    ToolImage { id: String, text: String, is_error: bool },
}

pub struct FakeSource {
    script: VecDeque<Decision>,
    calls: Arc<Mutex<Vec<SourceCall>>>,
}

impl FakeSource {
    pub fn new(script: Vec<Decision>) -> (Self, Arc<Mutex<Vec<SourceCall>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let source = Self {
            script: script.into(),
            calls: calls.clone(),
        };
        (source, calls)
    }
}

#[async_trait]
impl DecisionSource for FakeSource {
    fn new_conversation(&mut self) {
        self.calls.lock().push(SourceCall::NewConversation);
    }

    fn add_user_message(&mut self, task: &str, page: &PageContext) {
        self.calls.lock().push(SourceCall::User {
            task: task.to_string(),
            url: page.url.clone(),
        });
    }

    fn add_tool_result(&mut self, call_id: &str, text: &str, is_error: bool) {
        self.calls.lock().push(SourceCall::ToolResult {
            id: call_id.to_string(),
            text: text.to_string(),
            is_error,
        });
    }

    fn add_tool_result_with_image(
        &mut self,
        call_id: &str,
        text: &str,
        _image_base64: &str,
        is_error: bool,
    ) {
        self.calls.lock().push(SourceCall::ToolImage {
            id: call_id.to_string(),
            text: text.to_string(),
            is_error,
        });
    }

    async fn decide_next_action(&mut self) -> anyhow::Result<Decision> {
        self.script
            .pop_front()
            .ok_or_else(|| anyhow!("no more scripted decisions"))
    }
}

/// Tool results only, in order.
pub fn tool_results(calls: &Mutex<Vec<SourceCall>>) -> Vec<(String, String, bool)> {
    calls
        .lock()
        .iter()
        .filter_map(|c| match c {
            SourceCall::ToolResult { id, text, is_error }
            | SourceCall::ToolImage { id, text, is_error } => {
                Some((id.clone(), text.clone(), *is_error))
            }
            _ => None,
        })
        .collect()
}

pub struct FakeSnapshot {
    pub page: Mutex<PageContext>,
    pub live: String,
    /// Fail on this call (1-based) and every one after.
    pub fail_from: Option<usize>,
    calls: AtomicUsize,
}

impl FakeSnapshot {
    pub fn at(url: &str) -> Self {
        Self {
            page: Mutex::new(PageContext {
                url: url.to_string(),
                title: "Fake".into(),
                ..PageContext::default()
            }),
            live: "Clickable elements:\n\n1. text:Sign In [10,20]\n".into(),
            fail_from: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_from(mut self, call: usize) -> Self {
        self.fail_from = Some(call);
        self
    }
}

#[async_trait]
impl SnapshotProvider for FakeSnapshot {
    async fn page_context(&self) -> anyhow::Result<PageContext> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_from.is_some_and(|from| n >= from) {
            return Err(anyhow!("page went away"));
        }
        Ok(self.page.lock().clone())
    }

    async fn html(&self) -> anyhow::Result<String> {
        Ok("<html><body><button>Sign In</button></body></html>".into())
    }

    async fn find_elements_live(&self, _query: &str) -> anyhow::Result<String> {
        Ok(self.live.clone())
    }
}

#[derive(Default)]
pub struct FakeDiagnostic {
    pub error_calls: AtomicUsize,
    pub analyze_calls: AtomicUsize,
    pub last_failed_action: Mutex<String>,
}

impl FakeDiagnostic {
    pub fn error_calls(&self) -> usize {
        self.error_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiagnosticAgent for FakeDiagnostic {
    async fn analyze_error(
        &self,
        _html: &str,
        _live_elements: &str,
        failed_action: &str,
        _error: &str,
    ) -> anyhow::Result<String> {
        self.error_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_failed_action.lock() = failed_action.to_string();
        Ok("The button sits inside a closed menu; open it first.".into())
    }

    async fn analyze(
        &self,
        _html: &str,
        _live_elements: &str,
        question: &str,
    ) -> anyhow::Result<String> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("Answer to: {question}"))
    }
}

/// Confirmation stub that counts how often it was asked.
pub struct CountingConfirm {
    pub answer: bool,
    pub asked: AtomicUsize,
}

impl CountingConfirm {
    pub fn new(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            answer,
            asked: AtomicUsize::new(0),
        })
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

impl ConfirmChannel for CountingConfirm {
    fn confirm(&self, _intent: &Intent, _risk: &Risk) -> anyhow::Result<bool> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer)
    }
}
