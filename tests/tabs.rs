mod common;

use std::sync::Arc;

use agentic_browser::browser::{BrowserHandle, TabManager};
use agentic_browser::config::Timeouts;
use agentic_browser::BrowserError;
use common::{Behavior, FakeBrowser, FakePage};

async fn three_tabs() -> (Arc<FakeBrowser>, Vec<Arc<FakePage>>, TabManager) {
    let browser = FakeBrowser::new();
    let pages: Vec<Arc<FakePage>> = ["https://a.example/", "https://b.example/", "https://c.example/"]
        .iter()
        .map(|url| browser.open(url, Behavior::default()))
        .collect();
    pages[0].set_title("Alpha");
    pages[1].set_title("Beta");
    pages[2].set_title("Gamma");
    let handle: Arc<dyn BrowserHandle> = browser.clone();
    let tabs = TabManager::new(handle, Timeouts::instant()).await.unwrap();
    (browser, pages, tabs)
}

#[tokio::test]
async fn starts_on_first_tab_or_opens_one() {
    let (_, pages, tabs) = three_tabs().await;
    assert_eq!(tabs.current().id(), pages[0].page_id());

    let empty = FakeBrowser::new();
    let handle: Arc<dyn BrowserHandle> = empty.clone();
    let tabs = TabManager::new(handle, Timeouts::instant()).await.unwrap();
    assert_eq!(tabs.tab_count().await, 1);
    assert_eq!(empty.calls("browser.new_page").len(), 1);
}

#[tokio::test]
async fn listing_marks_the_active_tab() {
    let (_, _, mut tabs) = three_tabs().await;
    tabs.switch_to_tab(2).await.unwrap();

    let listing = tabs.list_tabs().await.unwrap();
    assert!(listing.starts_with("Open tabs: 3\n\n"));
    assert!(listing.contains("  1. Alpha\n   URL: https://a.example/\n"));
    assert!(listing.contains("→ 2. Beta\n   URL: https://b.example/\n"));
    assert!(listing.ends_with("Current tab: 2. Use switch_tab to change tabs."));
}

#[tokio::test]
async fn switch_validates_the_index() {
    let (browser, pages, mut tabs) = three_tabs().await;
    let view = tabs.active_tab();

    tabs.switch_to_tab(3).await.unwrap();
    assert_eq!(view.current().id(), pages[2].page_id());
    assert!(browser.log().contains(&format!("page.activate {}", pages[2].page_id())));

    for bad in [0, 4] {
        let err = tabs.switch_to_tab(bad).await.unwrap_err();
        assert!(matches!(err, BrowserError::Tab(_)));
        assert!(err.to_string().contains(&format!("invalid tab index: {bad}")));
    }
    assert_eq!(tabs.current().id(), pages[2].page_id());
}

#[tokio::test]
async fn closing_moves_to_the_previous_tab() {
    let (_, pages, mut tabs) = three_tabs().await;
    tabs.switch_to_tab(2).await.unwrap();

    tabs.close_current().await.unwrap();
    assert_eq!(tabs.tab_count().await, 2);
    assert_eq!(tabs.current().id(), pages[0].page_id());
}

#[tokio::test]
async fn closing_the_first_tab_moves_to_the_next_one() {
    let (_, pages, mut tabs) = three_tabs().await;

    tabs.close_current().await.unwrap();
    assert_eq!(tabs.current().id(), pages[1].page_id());
}

#[tokio::test]
async fn last_tab_cannot_be_closed() {
    let (browser, page) = FakeBrowser::with_page("https://example.com/", Behavior::default());
    let handle: Arc<dyn BrowserHandle> = browser.clone();
    let mut tabs = TabManager::new(handle, Timeouts::instant()).await.unwrap();

    let err = tabs.close_current().await.unwrap_err();
    assert_eq!(err, BrowserError::Tab("cannot close the last tab".into()));
    assert_eq!(tabs.current().id(), page.page_id());
    assert!(browser.calls("page.close").is_empty());
}

#[tokio::test]
async fn newest_tab_is_followed_only_when_new() {
    let (browser, first) = FakeBrowser::with_page("https://example.com/", Behavior::default());
    let handle: Arc<dyn BrowserHandle> = browser.clone();
    let mut tabs = TabManager::new(handle, Timeouts::instant()).await.unwrap();

    assert!(!tabs.switch_to_newest().await);
    assert_eq!(tabs.current().id(), first.page_id());

    let popup = browser.open("https://popup.example/", Behavior::default());
    assert!(tabs.switch_to_newest().await);
    assert_eq!(tabs.current().id(), popup.page_id());
    assert!(!tabs.switch_to_newest().await);
}
