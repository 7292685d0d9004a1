//! The browser capability the exploration engine runs against.
//!
//! Every engine-specific operation the crawler needs goes through [`Browser`]
//! and [`Page`]. Handles take `&self`, so a page can be polled for its URL
//! while a click on it is still in flight.

use crate::error::{Result, ScanError};
use crate::signature;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, sleep};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

/// Locate an element by accessible role and, optionally, its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleQuery {
    pub role: String,
    pub name: Option<String>,
    /// Exact matches compare whitespace-collapsed names case-sensitively.
    /// Otherwise the name matches loosely, ignoring case, whitespace,
    /// underscores and hyphens.
    pub exact: bool,
}

impl RoleQuery {
    pub fn matches(&self, role: &str, name: &str) -> bool {
        if !self.role.eq_ignore_ascii_case(role) {
            return false;
        }
        match &self.name {
            None => true,
            Some(wanted) if self.exact => collapse(wanted) == collapse(name),
            Some(wanted) => signature::names_match(wanted, name),
        }
    }
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Role(RoleQuery),
    Css(String),
}

impl Target {
    pub fn role(role: &str, name: Option<&str>) -> Self {
        Target::Role(RoleQuery {
            role: role.to_string(),
            name: name.filter(|n| !n.is_empty()).map(str::to_string),
            exact: true,
        })
    }

    pub fn role_flexible(role: &str, name: Option<&str>) -> Self {
        Target::Role(RoleQuery {
            role: role.to_string(),
            name: name.filter(|n| !n.is_empty()).map(str::to_string),
            exact: false,
        })
    }

    pub fn css(selector: &str) -> Self {
        Target::Css(selector.to_string())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Role(q) => match &q.name {
                Some(name) => write!(f, "{}:\"{}\"", q.role, name),
                None => write!(f, "{}", q.role),
            },
            Target::Css(sel) => write!(f, "css={}", sel),
        }
    }
}

/// Wait budgets for browser operations.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Upper bound for clicks and other single actions.
    pub action: Duration,
    pub navigation: Duration,
    pub network_idle: Duration,
    pub dom_ready: Duration,
    /// Pause after load before a snapshot is read.
    pub settle: Duration,
    /// How long to wait for a candidate element to become visible.
    pub locate: Duration,
    pub url_change: Duration,
    pub restore_pause: Duration,
}

impl Timeouts {
    pub const DEFAULT_ACTION_MS: u64 = 30_000;

    /// Derive every budget from one per-operation ceiling.
    pub fn from_action(action: Duration) -> Self {
        Self {
            action,
            navigation: action,
            network_idle: action.min(Duration::from_secs(10)),
            dom_ready: action.min(Duration::from_secs(5)),
            settle: action.min(Duration::from_millis(1500)),
            locate: action.min(Duration::from_secs(5)),
            url_change: action.min(Duration::from_secs(5)),
            restore_pause: action.min(Duration::from_millis(200)),
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from_action(Duration::from_millis(Self::DEFAULT_ACTION_MS))
    }
}

#[async_trait]
pub trait Page: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<()>;

    /// Indentation-based structural dump of the current page.
    async fn snapshot(&self) -> Result<String>;

    async fn url(&self) -> Result<String>;

    async fn is_visible(&self, target: &Target) -> Result<bool>;

    async fn click(&self, target: &Target, timeout: Duration) -> Result<()>;

    async fn fill(&self, target: &Target, value: &str, timeout: Duration) -> Result<()>;

    async fn press(&self, target: &Target, key: &str, timeout: Duration) -> Result<()>;

    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    async fn wait_for_visible(&self, target: &Target, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_visible(target).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ScanError::Timeout(timeout, format!("waiting for {}", target)));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Resolves with the new URL once it differs from `from`, or `None` if it
    /// did not change within the timeout.
    async fn wait_for_url_change(&self, from: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            let current = self.url().await?;
            if current != from {
                return Ok(Some(current));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn Page>>;

    fn is_closed(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

/// Wait for the page to look ready: network idle, falling back to
/// DOM-ready, then a settle pause. Wait failures other than a closed session
/// are ignored.
pub async fn wait_for_app_ready(page: &dyn Page, timeouts: &Timeouts) -> Result<()> {
    if let Err(e) = page
        .wait_for_load_state(LoadState::NetworkIdle, timeouts.network_idle)
        .await
    {
        if e.is_session_closed() {
            return Err(e);
        }
        if let Err(e) = page
            .wait_for_load_state(LoadState::DomContentLoaded, timeouts.dom_ready)
            .await
            && e.is_session_closed()
        {
            return Err(e);
        }
    }
    sleep(timeouts.settle).await;
    Ok(())
}
