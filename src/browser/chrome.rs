//! `headless_chrome` backend.
//!
//! The protocol client is blocking, so every call runs on the blocking pool
//! against a cloned `Arc<Tab>` and is bounded by a tokio timeout.

use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::browser::tab::point::Point;
use headless_chrome::protocol::cdp::Page::{CaptureScreenshotFormatOption, Viewport};
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::scripts;
use super::{
    BrowserHandle, BrowserResult, ClickTiming, Locator, NativeBackend, Page, ScriptBackend,
    ScriptHit, TextMatch,
};
use crate::config::{BrowserConfig, Timeouts};
use crate::error::BrowserError;

/// Slack on top of the in-page budget for the protocol round trip.
const ROUND_TRIP: Duration = Duration::from_secs(5);

const POINTER_STEPS: u32 = 5;

pub struct ChromeBrowser {
    browser: Arc<Browser>,
    /// Attached browsers belong to the user and are left running.
    launched: bool,
    timeouts: Timeouts,
    pages: Mutex<HashMap<String, Arc<ChromePage>>>,
}

impl ChromeBrowser {
    /// Attach to `attach_url` when set and reachable, else launch a new Chrome.
    /// Blocking.
    pub fn launch(config: &BrowserConfig) -> Result<Self> {
        if let Some(url) = &config.attach_url {
            info!(url = %url, "attaching to running Chrome");
            match Browser::connect(url.clone()) {
                Ok(browser) => {
                    info!("attached to existing Chrome");
                    return Ok(Self::new(browser, false, config.timeouts));
                }
                Err(e) => warn!(error = %e, "could not attach, launching a new Chrome"),
            }
        }

        std::fs::create_dir_all(&config.user_data_dir).with_context(|| {
            format!(
                "failed to create profile dir {}",
                config.user_data_dir.display()
            )
        })?;

        let options = LaunchOptions {
            headless: config.headless,
            path: config.chrome_path.clone(),
            user_data_dir: Some(config.user_data_dir.clone()),
            window_size: Some((1280, 900)),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: Duration::from_secs(60 * 60),
            ..Default::default()
        };

        info!(
            headless = config.headless,
            profile = %config.user_data_dir.display(),
            "launching Chrome"
        );
        let browser = Browser::new(options).context("browser launch failed")?;
        Ok(Self::new(browser, true, config.timeouts))
    }

    fn new(browser: Browser, launched: bool, timeouts: Timeouts) -> Self {
        Self {
            browser: Arc::new(browser),
            launched,
            timeouts,
            pages: Mutex::new(HashMap::new()),
        }
    }

    fn tabs(&self) -> BrowserResult<Vec<Arc<Tab>>> {
        let tabs = self
            .browser
            .get_tabs()
            .lock()
            .map_err(|_| BrowserError::Tab("tab list lock poisoned".into()))?;
        Ok(tabs.clone())
    }

    /// Keeps one `ChromePage` per target so pointer state survives refreshes.
    fn wrap(&self, tabs: Vec<Arc<Tab>>) -> Vec<Arc<dyn Page>> {
        let mut cache = self.pages.lock();
        cache.retain(|id, _| tabs.iter().any(|t| t.get_target_id() == id));
        tabs.into_iter()
            .map(|tab| {
                let id = tab.get_target_id().to_string();
                let page = cache
                    .entry(id)
                    .or_insert_with(|| Arc::new(ChromePage::new(tab, self.timeouts)))
                    .clone();
                page as Arc<dyn Page>
            })
            .collect()
    }
}

#[async_trait]
impl BrowserHandle for ChromeBrowser {
    async fn pages(&self) -> BrowserResult<Vec<Arc<dyn Page>>> {
        let tabs = self.tabs()?;
        Ok(self.wrap(tabs))
    }

    async fn new_page(&self) -> BrowserResult<Arc<dyn Page>> {
        let browser = self.browser.clone();
        let tab = tokio::task::spawn_blocking(move || browser.new_tab())
            .await
            .map_err(|e| BrowserError::Tab(format!("new tab task failed: {e}")))?
            .map_err(|e| BrowserError::Tab(format!("failed to open tab: {e}")))?;
        let id = tab.get_target_id().to_string();
        let pages = self.wrap(self.tabs()?);
        pages
            .into_iter()
            .find(|p| p.id() == id)
            .ok_or_else(|| BrowserError::Tab("new tab vanished".into()))
    }

    async fn shutdown(&self) -> BrowserResult<()> {
        if !self.launched {
            debug!("attached browser left running");
            return Ok(());
        }
        let tabs = self.tabs()?;
        tokio::task::spawn_blocking(move || {
            for tab in tabs {
                if let Err(e) = tab.close(false) {
                    debug!(error = %e, "tab close failed during shutdown");
                }
            }
        })
        .await
        .map_err(|e| BrowserError::Protocol(format!("shutdown task failed: {e}")))?;
        info!("browser closed");
        Ok(())
    }
}

pub struct ChromePage {
    id: String,
    tab: Arc<Tab>,
    timeouts: Timeouts,
    pointer: Mutex<(f64, f64)>,
}

impl ChromePage {
    fn new(tab: Arc<Tab>, timeouts: Timeouts) -> Self {
        tab.set_default_timeout(timeouts.navigation);
        Self {
            id: tab.get_target_id().to_string(),
            tab,
            timeouts,
            pointer: Mutex::new((0.0, 0.0)),
        }
    }

    /// Run `f` on the blocking pool. A blown budget maps through `on_timeout`.
    async fn blocking<T, F>(
        &self,
        budget: Duration,
        on_timeout: fn(String) -> BrowserError,
        what: &str,
        f: F,
    ) -> BrowserResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> BrowserResult<T> + Send + 'static,
    {
        self.guarded(budget, on_timeout, what, move |tab, _| f(tab)).await
    }

    /// Like `blocking`, for calls that change the page: `f` must check the
    /// flag right before its mutating step.
    async fn guarded<T, F>(
        &self,
        budget: Duration,
        on_timeout: fn(String) -> BrowserError,
        what: &str,
        f: F,
    ) -> BrowserResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Tab, &Abandoned) -> BrowserResult<T> + Send + 'static,
    {
        let tab = self.tab.clone();
        run_bounded(budget, ROUND_TRIP, on_timeout, what, move |abandoned| {
            f(tab.as_ref(), abandoned)
        })
        .await
    }

    async fn eval(&self, script: String, await_promise: bool, budget: Duration) -> BrowserResult<Value> {
        self.blocking(budget + ROUND_TRIP, BrowserError::Script, "evaluate", move |tab| {
            evaluate_json(tab, &script, await_promise)
        })
        .await
    }
}

/// Raised once the caller stops waiting on a blocking call.
#[derive(Clone, Default)]
struct Abandoned(Arc<AtomicBool>);

impl Abandoned {
    fn check(&self, what: &str) -> BrowserResult<()> {
        if self.0.load(Ordering::Acquire) {
            return Err(BrowserError::ClickFailed(format!("{what} abandoned after timeout")));
        }
        Ok(())
    }
}

/// Runs `f` on the blocking pool under `budget`. On timeout the worker is
/// flagged and given `drain` to wind down, so it never overlaps the
/// caller's next browser call.
async fn run_bounded<T, F>(
    budget: Duration,
    drain: Duration,
    on_timeout: fn(String) -> BrowserError,
    what: &str,
    f: F,
) -> BrowserResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Abandoned) -> BrowserResult<T> + Send + 'static,
{
    let abandoned = Abandoned::default();
    let flag = abandoned.clone();
    let mut task = tokio::task::spawn_blocking(move || f(&flag));
    match tokio::time::timeout(budget, &mut task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(BrowserError::Protocol(format!("{what}: {e}"))),
        Err(_) => {
            abandoned.0.store(true, Ordering::Release);
            if tokio::time::timeout(drain, task).await.is_err() {
                warn!(call = what, "blocking call still running past its budget");
            }
            Err(on_timeout(format!("{what} exceeded {budget:?}")))
        }
    }
}

fn evaluate_json(tab: &Tab, script: &str, await_promise: bool) -> BrowserResult<Value> {
    let result = tab
        .evaluate(script, await_promise)
        .map_err(|e| BrowserError::Script(e.to_string()))?;
    let raw = result
        .value
        .as_ref()
        .and_then(|v| v.as_str())
        .ok_or_else(|| BrowserError::Script("script did not return a string".into()))?;
    serde_json::from_str(raw).map_err(|e| BrowserError::Script(format!("bad script result: {e}")))
}

fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{text}'")
    } else if !text.contains('"') {
        format!("\"{text}\"")
    } else {
        let parts: Vec<String> = text.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// Interactive elements first; otherwise the innermost element carrying the text.
fn text_xpaths(text: &str, mode: TextMatch) -> (String, String) {
    let literal = xpath_literal(text.trim());
    let test = match mode {
        TextMatch::Exact => format!("normalize-space(.)={literal}"),
        TextMatch::Contains => format!("contains(normalize-space(.), {literal})"),
    };
    let interactive = format!(
        "//*[(self::button or self::a or self::label or self::summary or @role='button' \
         or @role='link' or @role='menuitem' or @role='tab' or @role='option') and {test}]"
    );
    let any = format!("//body//*[{test} and not(*[{test}])]");
    (interactive, any)
}

fn locate<'a>(tab: &'a Tab, locator: &Locator, timeout: Duration) -> BrowserResult<Element<'a>> {
    let found = match locator {
        Locator::Css(selector) => tab.wait_for_element_with_custom_timeout(selector, timeout),
        Locator::Text { text, mode } => {
            let (interactive, any) = text_xpaths(text, *mode);
            tab.wait_for_xpath_with_custom_timeout(&format!("{interactive} | {any}"), timeout)
                .map(|fallback| tab.find_element_by_xpath(&interactive).unwrap_or(fallback))
        }
    };
    found.map_err(|_| BrowserError::ElementNotFound(locator.to_string()))
}

fn wait_until_visible(element: &Element<'_>, timeout: Duration) -> bool {
    let started = Instant::now();
    loop {
        let visible = element
            .call_js_fn(scripts::IS_VISIBLE_FN, vec![], false)
            .ok()
            .and_then(|r| r.value)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if visible {
            return true;
        }
        if started.elapsed() >= timeout {
            return false;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

#[derive(Deserialize)]
struct Size {
    width: f64,
    height: f64,
}

#[async_trait]
impl NativeBackend for ChromePage {
    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        let url = url.to_string();
        self.blocking(
            self.timeouts.navigation,
            BrowserError::NavigationFailed,
            "navigate",
            move |tab| {
                tab.navigate_to(&url)
                    .map(|_| ())
                    .map_err(|e| BrowserError::NavigationFailed(format!("{url}: {e}")))
            },
        )
        .await
    }

    async fn wait_for_load(&self, timeout: Duration) -> BrowserResult<()> {
        self.blocking(timeout, BrowserError::PageLoadTimeout, "page load", |tab| {
            tab.wait_until_navigated()
                .map(|_| ())
                .map_err(|e| BrowserError::PageLoadTimeout(e.to_string()))
        })
        .await
    }

    async fn click(&self, locator: &Locator, timing: ClickTiming) -> BrowserResult<()> {
        let locator = locator.clone();
        let budget = timing.locate + timing.visible + timing.settle + ROUND_TRIP;
        self.guarded(budget, BrowserError::ClickFailed, "click", move |tab, abandoned| {
            let element = locate(tab, &locator, timing.locate)?;
            element
                .scroll_into_view()
                .map_err(|e| BrowserError::ElementNotVisible(format!("{locator}: {e}")))?;
            std::thread::sleep(timing.settle);
            if let Err(e) = element.move_mouse_over() {
                debug!(error = %e, "hover failed");
            }
            if !wait_until_visible(&element, timing.visible) {
                return Err(BrowserError::ElementNotVisible(locator.to_string()));
            }
            abandoned.check("click")?;
            element
                .click()
                .map(|_| ())
                .map_err(|e| BrowserError::ClickFailed(format!("{locator}: {e}")))
        })
        .await
    }

    async fn move_pointer(&self, x: f64, y: f64, smooth: bool) -> BrowserResult<()> {
        let from = *self.pointer.lock();
        let steps = if smooth { POINTER_STEPS } else { 1 };
        self.blocking(
            ROUND_TRIP,
            BrowserError::ClickFailed,
            "pointer move",
            move |tab| {
                for i in 1..=steps {
                    let t = f64::from(i) / f64::from(steps);
                    let point = Point {
                        x: from.0 + (x - from.0) * t,
                        y: from.1 + (y - from.1) * t,
                    };
                    tab.move_mouse_to_point(point)
                        .map_err(|e| BrowserError::ClickFailed(format!("pointer move: {e}")))?;
                    if smooth {
                        std::thread::sleep(Duration::from_millis(16));
                    }
                }
                Ok(())
            },
        )
        .await?;
        *self.pointer.lock() = (x, y);
        Ok(())
    }

    async fn click_pointer(&self, x: f64, y: f64) -> BrowserResult<()> {
        self.guarded(ROUND_TRIP, BrowserError::ClickFailed, "pointer click", move |tab, abandoned| {
            abandoned.check("pointer click")?;
            tab.click_point(Point { x, y })
                .map(|_| ())
                .map_err(|e| BrowserError::ClickFailed(format!("({x}, {y}): {e}")))
        })
        .await?;
        *self.pointer.lock() = (x, y);
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str, timeout: Duration) -> BrowserResult<()> {
        let selector = selector.to_string();
        let text = text.to_string();
        self.guarded(
            timeout + ROUND_TRIP,
            BrowserError::ElementNotFound,
            "type",
            move |tab, abandoned| {
                let element = locate(tab, &Locator::Css(selector.clone()), timeout)?;
                if let Err(e) = element.scroll_into_view() {
                    debug!(error = %e, "scroll into view failed");
                }
                abandoned.check("type")?;
                element
                    .click()
                    .map_err(|e| BrowserError::ClickFailed(format!("{selector}: {e}")))?;
                element
                    .call_js_fn(scripts::CLEAR_VALUE_FN, vec![], false)
                    .map_err(|e| BrowserError::Script(e.to_string()))?;
                element
                    .type_into(&text)
                    .map(|_| ())
                    .map_err(|e| BrowserError::Protocol(format!("typing into {selector}: {e}")))
            },
        )
        .await
    }

    async fn wait_visible(&self, selector: &str, timeout: Duration) -> BrowserResult<()> {
        let selector = selector.to_string();
        self.blocking(
            timeout + ROUND_TRIP,
            BrowserError::ElementNotFound,
            "wait",
            move |tab| {
                let started = Instant::now();
                let element = locate(tab, &Locator::Css(selector.clone()), timeout)?;
                let remaining = timeout.saturating_sub(started.elapsed());
                if wait_until_visible(&element, remaining) {
                    Ok(())
                } else {
                    Err(BrowserError::ElementNotVisible(selector))
                }
            },
        )
        .await
    }

    async fn press_enter(&self) -> BrowserResult<()> {
        self.guarded(ROUND_TRIP, BrowserError::Protocol, "press enter", |tab, abandoned| {
            abandoned.check("press enter")?;
            tab.press_key("Enter")
                .map(|_| ())
                .map_err(|e| BrowserError::Protocol(format!("press enter: {e}")))
        })
        .await
    }

    async fn screenshot(&self, full_page: bool) -> BrowserResult<Vec<u8>> {
        let clip = if full_page {
            let size: Size = serde_json::from_value(
                self.eval(scripts::DOCUMENT_SIZE_JS.to_string(), false, ROUND_TRIP)
                    .await?,
            )
            .map_err(|e| BrowserError::Script(format!("document size: {e}")))?;
            Some(Viewport {
                x: 0.0,
                y: 0.0,
                width: size.width,
                height: size.height,
                scale: 1.0,
            })
        } else {
            None
        };
        self.blocking(
            self.timeouts.navigation,
            BrowserError::Protocol,
            "screenshot",
            move |tab| {
                tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, clip, true)
                    .map_err(|e| BrowserError::Protocol(format!("screenshot: {e}")))
            },
        )
        .await
    }

    async fn url(&self) -> BrowserResult<String> {
        Ok(self.tab.get_url())
    }

    async fn title(&self) -> BrowserResult<String> {
        self.blocking(ROUND_TRIP, BrowserError::Protocol, "title", |tab| {
            tab.get_title()
                .map_err(|e| BrowserError::Protocol(format!("title: {e}")))
        })
        .await
    }

    async fn html(&self) -> BrowserResult<String> {
        self.blocking(
            self.timeouts.element,
            BrowserError::Protocol,
            "content",
            |tab| {
                tab.get_content()
                    .map_err(|e| BrowserError::Protocol(format!("content: {e}")))
            },
        )
        .await
    }
}

#[async_trait]
impl ScriptBackend for ChromePage {
    async fn click_selector(&self, selector: &str) -> BrowserResult<()> {
        let result = self
            .eval(scripts::click_selector(selector), false, ROUND_TRIP)
            .await?;
        if result["ok"].as_bool() == Some(true) {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(selector.to_string()))
        }
    }

    async fn click_text(&self, text: &str) -> BrowserResult<ScriptHit> {
        let result = self
            .eval(scripts::click_text(text), false, ROUND_TRIP)
            .await?;
        if result["ok"].as_bool() != Some(true) {
            return Err(BrowserError::ElementNotFound(format!("text:{text}")));
        }
        serde_json::from_value(result).map_err(|e| BrowserError::Script(e.to_string()))
    }

    async fn scroll_by(&self, delta: i64) -> BrowserResult<()> {
        self.eval(scripts::scroll_by(delta), false, ROUND_TRIP)
            .await
            .map(|_| ())
    }

    async fn wait_stable(&self, quiet: Duration, timeout: Duration) -> BrowserResult<()> {
        let script = scripts::wait_stable(quiet.as_millis() as u64, timeout.as_millis() as u64);
        let result = self
            .blocking(
                timeout + Duration::from_secs(1),
                BrowserError::StabilityTimeout,
                "stability wait",
                move |tab| evaluate_json(tab, &script, true),
            )
            .await?;
        if result["stable"].as_bool() == Some(true) {
            Ok(())
        } else {
            Err(BrowserError::StabilityTimeout(format!(
                "DOM still changing after {timeout:?}"
            )))
        }
    }

    async fn describe_candidates(
        &self,
        selectors: &[&str],
        limit: usize,
    ) -> BrowserResult<Vec<String>> {
        let result = self
            .eval(scripts::describe_candidates(selectors, limit), false, ROUND_TRIP)
            .await?;
        serde_json::from_value(result).map_err(|e| BrowserError::Script(e.to_string()))
    }

    async fn eval_json(&self, script: &str) -> BrowserResult<Value> {
        self.eval(script.to_string(), false, self.timeouts.element)
            .await
    }
}

#[async_trait]
impl Page for ChromePage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn close(&self) -> BrowserResult<()> {
        self.blocking(ROUND_TRIP, BrowserError::Tab, "close tab", |tab| {
            tab.close(true)
                .map(|_| ())
                .map_err(|e| BrowserError::Tab(format!("close: {e}")))
        })
        .await
    }

    async fn activate(&self) -> BrowserResult<()> {
        self.blocking(ROUND_TRIP, BrowserError::Tab, "activate tab", |tab| {
            tab.activate()
                .map(|_| ())
                .map_err(|e| BrowserError::Tab(format!("activate: {e}")))
        })
        .await
    }
}
