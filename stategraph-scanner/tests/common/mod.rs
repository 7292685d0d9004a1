#![allow(dead_code)]

use async_trait::async_trait;
use stategraph_scanner::browser::{Browser, LoadState, Page, Target, Timeouts};
use stategraph_scanner::collector::UrlSink;
use stategraph_scanner::error::{Result, ScanError};
use stategraph_scanner::extract;
use stategraph_scanner::orchestrator::StateSink;
use stategraph_scanner::result::Edge;
use stategraph_scanner::snapshot::PageState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ROOT: &str = "http://app.test/";

/// Short budgets so scripted pages settle instantly.
pub fn fast_timeouts() -> Timeouts {
    Timeouts::from_action(Duration::from_millis(50)).with_settle(Duration::ZERO)
}

pub fn url(path: &str) -> String {
    format!("http://app.test{}", path)
}

/// One scripted page: its base snapshot, fragments revealed by clicking a
/// named control, controls that navigate, and controls that are listed but
/// never visible or never clickable.
#[derive(Debug, Clone, Default)]
pub struct Screen {
    snapshot: String,
    reveals: Vec<(String, String)>,
    links: Vec<(String, String)>,
    hidden: Vec<String>,
    stuck: Vec<String>,
}

impl Screen {
    pub fn new(snapshot: &str) -> Self {
        Self {
            snapshot: snapshot.to_string(),
            ..Self::default()
        }
    }

    pub fn reveal(mut self, name: &str, lines: &str) -> Self {
        self.reveals.push((name.to_string(), lines.to_string()));
        self
    }

    pub fn link(mut self, name: &str, to: &str) -> Self {
        self.links.push((name.to_string(), to.to_string()));
        self
    }

    pub fn hidden(mut self, name: &str) -> Self {
        self.hidden.push(name.to_string());
        self
    }

    pub fn stuck(mut self, name: &str) -> Self {
        self.stuck.push(name.to_string());
        self
    }
}

#[derive(Debug, Default)]
pub struct Site {
    screens: HashMap<String, Screen>,
}

impl Site {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, screen: Screen) -> Self {
        self.screens.insert(url.to_string(), screen);
        self
    }
}

pub struct FakeBrowser {
    site: Arc<Site>,
    closed: Arc<AtomicBool>,
    clicks: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
    navigations: Arc<AtomicUsize>,
}

impl FakeBrowser {
    pub fn new(site: Site) -> Self {
        Self {
            site: Arc::new(site),
            closed: Arc::new(AtomicBool::new(false)),
            clicks: Arc::new(AtomicUsize::new(0)),
            opened: Arc::new(AtomicUsize::new(0)),
            navigations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn clicks(&self) -> usize {
        self.clicks.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Successful `goto` calls across every page.
    pub fn navigations(&self) -> usize {
        self.navigations.load(Ordering::SeqCst)
    }

    pub fn page_at(&self, url: &str) -> FakePage {
        let page = self.fake_page();
        page.state.lock().unwrap().url = url.to_string();
        page
    }

    fn fake_page(&self) -> FakePage {
        FakePage {
            site: self.site.clone(),
            browser_closed: self.closed.clone(),
            closed: AtomicBool::new(false),
            clicks: self.clicks.clone(),
            navigations: self.navigations.clone(),
            state: Mutex::new(PageView {
                url: "about:blank".to_string(),
                revealed: Vec::new(),
            }),
        }
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_page(&self) -> Result<Box<dyn Page>> {
        if self.is_closed() {
            return Err(ScanError::SessionClosed("fake browser closed".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.fake_page()))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct PageView {
    url: String,
    revealed: Vec<String>,
}

pub struct FakePage {
    site: Arc<Site>,
    browser_closed: Arc<AtomicBool>,
    closed: AtomicBool,
    clicks: Arc<AtomicUsize>,
    navigations: Arc<AtomicUsize>,
    state: Mutex<PageView>,
}

impl FakePage {
    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ScanError::SessionClosed("fake page closed".to_string()));
        }
        Ok(())
    }

    fn render(&self) -> String {
        let view = self.state.lock().unwrap();
        let Some(screen) = self.site.screens.get(&view.url) else {
            return String::new();
        };
        let mut text = screen.snapshot.clone();
        for name in &view.revealed {
            if let Some((_, lines)) = screen.reveals.iter().find(|(n, _)| n == name) {
                text.push('\n');
                text.push_str(lines);
            }
        }
        text
    }

    fn screen_has(&self, name: &str, pick: impl Fn(&Screen) -> &Vec<String>) -> bool {
        let view = self.state.lock().unwrap();
        self.site
            .screens
            .get(&view.url)
            .is_some_and(|screen| pick(screen).iter().any(|n| n == name))
    }

    fn find(&self, target: &Target) -> Option<String> {
        let Target::Role(query) = target else {
            return None;
        };
        extract::parse(&self.render())
            .into_iter()
            .find(|i| query.matches(&i.role, i.name.as_deref().unwrap_or_default()))
            .map(|i| i.name.unwrap_or_default())
    }
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        if !self.site.screens.contains_key(url) {
            return Err(ScanError::Navigation {
                url: url.to_string(),
                reason: "404".to_string(),
            });
        }
        let mut view = self.state.lock().unwrap();
        view.url = url.to_string();
        view.revealed.clear();
        self.navigations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_for_load_state(&self, _state: LoadState, _timeout: Duration) -> Result<()> {
        self.ensure_open()
    }

    async fn snapshot(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.render())
    }

    async fn url(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn is_visible(&self, target: &Target) -> Result<bool> {
        self.ensure_open()?;
        Ok(self
            .find(target)
            .is_some_and(|name| !self.screen_has(&name, |s| &s.hidden)))
    }

    async fn click(&self, target: &Target, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        let name = self
            .find(target)
            .ok_or_else(|| ScanError::ElementUnavailable(target.to_string()))?;
        if self.screen_has(&name, |s| &s.stuck) {
            return Err(ScanError::Timeout(timeout, format!("clicking {}", target)));
        }
        self.clicks.fetch_add(1, Ordering::SeqCst);

        let mut view = self.state.lock().unwrap();
        let Some(screen) = self.site.screens.get(&view.url) else {
            return Ok(());
        };
        if let Some((_, to)) = screen.links.iter().find(|(n, _)| *n == name) {
            view.url = to.clone();
            view.revealed.clear();
        } else if screen.reveals.iter().any(|(n, _)| *n == name) && !view.revealed.contains(&name) {
            view.revealed.push(name);
        }
        Ok(())
    }

    async fn fill(&self, _target: &Target, _value: &str, _timeout: Duration) -> Result<()> {
        self.ensure_open()
    }

    async fn press(&self, _target: &Target, _key: &str, _timeout: Duration) -> Result<()> {
        self.ensure_open()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.browser_closed.load(Ordering::SeqCst)
    }
}

/// Sink that keeps everything in memory for assertions.
#[derive(Default)]
pub struct RecordingSink {
    pub nodes: Mutex<Vec<PageState>>,
    pub edges: Mutex<Vec<Edge>>,
    pub discovered: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn node_for(&self, url: &str) -> Option<PageState> {
        self.nodes.lock().unwrap().iter().find(|n| n.url() == url).cloned()
    }
}

#[async_trait]
impl StateSink for RecordingSink {
    async fn record_node(&self, state: &PageState) -> Result<()> {
        self.nodes.lock().unwrap().push(state.clone());
        Ok(())
    }

    async fn record_edge(&self, edge: &Edge) -> Result<()> {
        self.edges.lock().unwrap().push(edge.clone());
        Ok(())
    }
}

#[async_trait]
impl UrlSink for RecordingSink {
    async fn record_discovered(&self, url: &str) -> Result<()> {
        self.discovered.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn record_visited(&self, state: &PageState) -> Result<()> {
        self.nodes.lock().unwrap().push(state.clone());
        Ok(())
    }
}

/// Root with an "Open Menu" button that reveals a link to /b in place.
pub fn menu_site() -> Site {
    Site::new()
        .page(
            ROOT,
            Screen::new(
                "- heading \"Home\" [level=1]\n\
                 - button \"Open Menu\" [ref=e1] [cursor=pointer]",
            )
            .reveal(
                "Open Menu",
                "- link \"Page B\" [ref=e2] [cursor=pointer]:\n  - /url: /b",
            ),
        )
        .page(&url("/b"), Screen::new("- heading \"Page B\" [level=1]"))
}

/// Three pages joined only by plain links.
pub fn linked_site() -> Site {
    Site::new()
        .page(
            ROOT,
            Screen::new(
                "- heading \"Home\" [level=1]\n\
                 - link \"Alpha\" [ref=e1] [cursor=pointer]:\n  - /url: /a\n\
                 - link \"Go to Alpha\" [ref=e2] [cursor=pointer]:\n  - /url: /a\n\
                 - link \"Beta\" [ref=e3] [cursor=pointer]:\n  - /url: /b",
            ),
        )
        .page(
            &url("/a"),
            Screen::new(
                "- heading \"Alpha\" [level=1]\n\
                 - link \"Home\" [ref=e1] [cursor=pointer]:\n  - /url: /",
            ),
        )
        .page(
            &url("/b"),
            Screen::new(
                "- heading \"Beta\" [level=1]\n\
                 - link \"Home\" [ref=e1] [cursor=pointer]:\n  - /url: /",
            ),
        )
}
