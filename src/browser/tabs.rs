use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{BrowserHandle, BrowserResult, Page};
use crate::config::Timeouts;
use crate::error::BrowserError;

const TITLE_MAX_CHARS: usize = 50;

/// Read-only view of the active tab. Follows every switch the manager makes.
#[derive(Clone)]
pub struct ActiveTab {
    rx: watch::Receiver<Arc<dyn Page>>,
}

impl ActiveTab {
    pub fn current(&self) -> Arc<dyn Page> {
        self.rx.borrow().clone()
    }
}

/// Owns the active-tab pointer. Nothing else reassigns it.
pub struct TabManager {
    browser: Arc<dyn BrowserHandle>,
    active: watch::Sender<Arc<dyn Page>>,
    timeouts: Timeouts,
}

impl TabManager {
    /// Starts on the first open page, opening one if the browser has none.
    pub async fn new(browser: Arc<dyn BrowserHandle>, timeouts: Timeouts) -> BrowserResult<Self> {
        let first = match browser.pages().await?.into_iter().next() {
            Some(page) => page,
            None => browser.new_page().await?,
        };
        let (active, _) = watch::channel(first);
        Ok(Self {
            browser,
            active,
            timeouts,
        })
    }

    pub fn active_tab(&self) -> ActiveTab {
        ActiveTab {
            rx: self.active.subscribe(),
        }
    }

    pub fn current(&self) -> Arc<dyn Page> {
        self.active.borrow().clone()
    }

    pub fn browser(&self) -> &Arc<dyn BrowserHandle> {
        &self.browser
    }

    /// Falls back to 1 when the page list cannot be read.
    pub async fn tab_count(&self) -> usize {
        match self.browser.pages().await {
            Ok(pages) => pages.len(),
            Err(e) => {
                debug!(error = %e, "tab count unavailable");
                1
            }
        }
    }

    pub async fn list_tabs(&self) -> BrowserResult<String> {
        let pages = self.browser.pages().await?;
        let current_id = self.current().id().to_string();

        let mut out = format!("Open tabs: {}\n\n", pages.len());
        let mut current_index = None;
        for (i, page) in pages.iter().enumerate() {
            let is_current = page.id() == current_id;
            if is_current {
                current_index = Some(i + 1);
            }
            let title = page.title().await.unwrap_or_default();
            let url = page.url().await.unwrap_or_default();
            let marker = if is_current { "→ " } else { "  " };
            out.push_str(&format!(
                "{marker}{}. {}\n   URL: {url}\n",
                i + 1,
                truncate_title(&title)
            ));
        }
        match current_index {
            Some(index) => out.push_str(&format!(
                "\nCurrent tab: {index}. Use switch_tab to change tabs."
            )),
            None => out.push_str("\nCurrent tab is no longer open. Use switch_tab to pick one."),
        }

        info!(count = pages.len(), current = ?current_index, "listed tabs");
        Ok(out)
    }

    /// `index` is 1-based.
    pub async fn switch_to_tab(&mut self, index: usize) -> BrowserResult<()> {
        let pages = self.browser.pages().await?;
        if index < 1 || index > pages.len() {
            return Err(BrowserError::Tab(format!(
                "invalid tab index: {index} (available: 1-{})",
                pages.len()
            )));
        }
        let page = pages[index - 1].clone();
        self.activate(page).await;
        info!(index, "switched tab");
        Ok(())
    }

    /// Makes the most recently opened tab active. False when there is nothing
    /// newer than the current tab.
    pub async fn switch_to_newest(&mut self) -> bool {
        let pages = match self.browser.pages().await {
            Ok(pages) => pages,
            Err(e) => {
                warn!(error = %e, "could not list tabs");
                return false;
            }
        };
        if pages.len() <= 1 {
            return false;
        }
        let Some(newest) = pages.last().cloned() else {
            return false;
        };
        if newest.id() == self.current().id() {
            return false;
        }
        self.activate(newest).await;
        info!(index = pages.len(), "switched to new tab");
        true
    }

    /// Refuses to close the last tab. Afterwards the tab before the closed one
    /// is active, or the first tab if the closed one was first.
    pub async fn close_current(&mut self) -> BrowserResult<()> {
        let pages = self.browser.pages().await?;
        if pages.len() <= 1 {
            return Err(BrowserError::Tab("cannot close the last tab".into()));
        }
        let current = self.current();
        let closed_index = pages
            .iter()
            .position(|p| p.id() == current.id())
            .unwrap_or(0);

        current.close().await?;

        // The list shifted; pick from what is actually still open.
        let remaining = self.browser.pages().await?;
        if remaining.is_empty() {
            return Err(BrowserError::Tab("no tabs left after close".into()));
        }
        let next_index = closed_index.saturating_sub(1).min(remaining.len() - 1);
        let next = remaining[next_index].clone();
        self.activate(next).await;
        info!(closed = closed_index + 1, active = next_index + 1, "closed tab");
        Ok(())
    }

    pub async fn shutdown(&self) -> BrowserResult<()> {
        self.browser.shutdown().await
    }

    /// Swap the pointer, bring the tab forward, let it finish loading. Waits
    /// are best effort.
    async fn activate(&mut self, page: Arc<dyn Page>) {
        self.active.send_replace(page.clone());
        if let Err(e) = page.activate().await {
            debug!(error = %e, "tab activation failed");
        }
        if let Err(e) = page.wait_for_load(self.timeouts.navigation).await {
            warn!(error = %e, "tab load wait failed");
        }
        if let Err(e) = page
            .wait_stable(self.timeouts.quiet_period, self.timeouts.short_stability)
            .await
        {
            debug!(error = %e, "tab not stable yet");
        }
    }
}

fn truncate_title(title: &str) -> String {
    if title.chars().count() > TITLE_MAX_CHARS {
        let cut: String = title.chars().take(TITLE_MAX_CHARS).collect();
        format!("{cut}...")
    } else {
        title.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_titles_are_cut_on_char_boundaries() {
        let title = "é".repeat(60);
        let cut = truncate_title(&title);
        assert_eq!(cut.chars().count(), 53);
        assert!(cut.ends_with("..."));
        assert_eq!(truncate_title("Short"), "Short");
    }
}
