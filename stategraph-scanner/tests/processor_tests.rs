mod common;

use common::{FakeBrowser, ROOT, Screen, Site, fast_timeouts, linked_site, menu_site, url};
use stategraph_scanner::browser::Browser;
use stategraph_scanner::extract::{self, ActionType, Interaction};
use stategraph_scanner::processor::InteractionProcessor;
use stategraph_scanner::session::SessionContext;
use stategraph_scanner::snapshot::PageState;
use std::sync::Arc;

fn root_state(snapshot: &str) -> PageState {
    PageState::new(ROOT, snapshot.to_string(), 0)
}

const MENU_ROOT: &str = "- heading \"Home\" [level=1]\n\
                         - button \"Open Menu\" [ref=e1] [cursor=pointer]";

#[tokio::test]
async fn test_click_yields_revealed_state() {
    let browser = Arc::new(FakeBrowser::new(menu_site()));
    let processor = InteractionProcessor::new(browser.clone(), Arc::new(SessionContext::new()), ROOT, fast_timeouts());
    let from = root_state(MENU_ROOT);
    let interaction = extract::parse(&from.snapshot_text).remove(0);

    let transition = processor.process(&from, &interaction).await.unwrap().unwrap();

    assert_eq!(transition.state.depth, 1);
    assert_ne!(transition.state.snapshot_hash, from.snapshot_hash);
    assert!(transition.state.snapshot_text.contains("Page B"));
    assert_eq!(transition.interaction.action_type, ActionType::Click);
    assert_eq!(transition.interaction.name.as_deref(), Some("Open Menu"));
    assert_eq!(browser.clicks(), 1);
}

#[tokio::test]
async fn test_click_timeout_yields_nothing() {
    let site = Site::new().page(ROOT, Screen::new(MENU_ROOT).stuck("Open Menu"));
    let browser = Arc::new(FakeBrowser::new(site));
    let processor = InteractionProcessor::new(browser.clone(), Arc::new(SessionContext::new()), ROOT, fast_timeouts());
    let from = root_state(MENU_ROOT);
    let interaction = extract::parse(&from.snapshot_text).remove(0);

    let transition = processor.process(&from, &interaction).await.unwrap();

    assert!(transition.is_none());
    assert_eq!(browser.clicks(), 0);
}

#[tokio::test]
async fn test_concurrent_duplicate_click_resolves_once() {
    let browser = Arc::new(FakeBrowser::new(menu_site()));
    let processor = InteractionProcessor::new(browser.clone(), Arc::new(SessionContext::new()), ROOT, fast_timeouts());
    let from = root_state(MENU_ROOT);
    let interaction = extract::parse(&from.snapshot_text).remove(0);

    let (first, second) = tokio::join!(
        processor.process(&from, &interaction),
        processor.process(&from, &interaction)
    );
    let produced = [first.unwrap(), second.unwrap()]
        .iter()
        .filter(|t| t.is_some())
        .count();

    assert_eq!(produced, 1);
    assert_eq!(browser.clicks(), 1);
}

#[tokio::test]
async fn test_href_is_followed_without_clicking() {
    let browser = Arc::new(FakeBrowser::new(linked_site()));
    let processor = InteractionProcessor::new(browser.clone(), Arc::new(SessionContext::new()), ROOT, fast_timeouts());
    let from = root_state(
        "- link \"Alpha\" [ref=e1] [cursor=pointer]:\n  - /url: /a",
    );
    let interaction = extract::parse(&from.snapshot_text).remove(0);

    let transition = processor.process(&from, &interaction).await.unwrap().unwrap();
    assert_eq!(transition.state.url(), url("/a"));
    assert_eq!(transition.interaction.action_type, ActionType::Navigate);
    assert_eq!(transition.interaction.href, Some(url("/a")));

    // Same navigation from the same state is attempted only once.
    assert!(processor.process(&from, &interaction).await.unwrap().is_none());
    assert_eq!(browser.clicks(), 0);
}

#[tokio::test]
async fn test_external_and_unresolvable_interactions_yield_nothing() {
    let browser = Arc::new(FakeBrowser::new(linked_site()));
    let processor = InteractionProcessor::new(browser.clone(), Arc::new(SessionContext::new()), ROOT, fast_timeouts());
    let from = root_state("- heading \"Home\" [level=1]");

    let external = Interaction {
        action_type: ActionType::Click,
        role: "link".to_string(),
        name: Some("Elsewhere".to_string()),
        ref_token: "e9".to_string(),
        href: Some("https://elsewhere.test/x".to_string()),
    };
    assert!(processor.process(&from, &external).await.unwrap().is_none());

    // A token that is not in the originating snapshot cannot be re-derived.
    let stale = Interaction {
        href: None,
        ..external
    };
    assert!(processor.process(&from, &stale).await.unwrap().is_none());
    assert_eq!(browser.opened(), 0);
}

#[tokio::test]
async fn test_closed_browser_is_an_error() {
    let browser = Arc::new(FakeBrowser::new(menu_site()));
    let processor = InteractionProcessor::new(browser.clone(), Arc::new(SessionContext::new()), ROOT, fast_timeouts());
    let from = root_state(MENU_ROOT);
    let interaction = extract::parse(&from.snapshot_text).remove(0);

    browser.close().await.unwrap();

    let err = processor.process(&from, &interaction).await.unwrap_err();
    assert!(err.is_session_closed());
}
