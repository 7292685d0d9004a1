//! URL collection mode: a breadth-first walk over discovered URLs that runs
//! the click explorer on every page it visits.

use crate::browser::{Browser, Timeouts, wait_for_app_ready};
use crate::error::Result;
use crate::explorer::{ClickExplorer, StopPredicate};
use crate::extract::extract_internal_urls;
use crate::login::{Credentials, login};
use crate::orchestrator::ProgressCallback;
use crate::result::{CollectSummary, StopReason};
use crate::session::SessionContext;
use crate::snapshot::{PageState, capture};
use crate::url::{canonical_key, is_internal, is_internal_subtree, normalize};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Where collected URLs go: a placeholder when a URL is first seen, the full
/// state once it has been visited.
#[async_trait]
pub trait UrlSink: Send + Sync {
    async fn record_discovered(&self, url: &str) -> Result<()>;

    async fn record_visited(&self, state: &PageState) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct CollectSettings {
    pub target_url: String,
    pub login_url: Option<String>,
    pub credentials: Option<Credentials>,
    /// Stop once this many distinct URLs are known.
    pub max_urls: Option<usize>,
    pub subtree: bool,
    pub timeouts: Timeouts,
}

impl CollectSettings {
    pub fn new(target_url: &str) -> Self {
        Self {
            target_url: target_url.to_string(),
            login_url: None,
            credentials: None,
            max_urls: None,
            subtree: false,
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_login(mut self, login_url: Option<String>, credentials: Credentials) -> Self {
        self.login_url = login_url;
        self.credentials = Some(credentials);
        self
    }

    pub fn with_max_urls(mut self, max_urls: Option<usize>) -> Self {
        self.max_urls = max_urls;
        self
    }

    pub fn with_subtree(mut self, subtree: bool) -> Self {
        self.subtree = subtree;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

pub struct UrlCollector {
    browser: Arc<dyn Browser>,
    sink: Arc<dyn UrlSink>,
    session: Arc<SessionContext>,
    settings: CollectSettings,
    progress_callback: Option<ProgressCallback>,
}

/// Ordered set of every URL known so far, with a shared count the stop
/// predicate can read while the explorer runs.
struct Known {
    urls: Vec<String>,
    set: HashSet<String>,
    count: Arc<AtomicUsize>,
}

impl Known {
    fn insert(&mut self, url: &str) -> bool {
        if !self.set.insert(url.to_string()) {
            return false;
        }
        self.urls.push(url.to_string());
        self.count.store(self.set.len(), Ordering::SeqCst);
        true
    }
}

impl UrlCollector {
    pub fn new(browser: Arc<dyn Browser>, sink: Arc<dyn UrlSink>, settings: CollectSettings) -> Self {
        Self {
            browser,
            sink,
            session: Arc::new(SessionContext::new()),
            settings,
            progress_callback: None,
        }
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    fn in_scope(&self, url: &str) -> bool {
        if self.settings.subtree {
            is_internal_subtree(url, &self.settings.target_url)
        } else {
            is_internal(url, &self.settings.target_url)
        }
    }

    pub async fn run(&self) -> Result<CollectSummary> {
        let timeouts = self.settings.timeouts;
        let page = match self.browser.new_page().await {
            Ok(page) => page,
            Err(e) if e.is_session_closed() => {
                warn!("Browser session closed before collection started: {}", e);
                return Ok(CollectSummary {
                    urls: Vec::new(),
                    visited: 0,
                    clicks: 0,
                    stop_reason: StopReason::SessionClosed,
                });
            }
            Err(e) => return Err(e),
        };

        let count = Arc::new(AtomicUsize::new(0));
        let mut known = Known {
            urls: Vec::new(),
            set: HashSet::new(),
            count: count.clone(),
        };
        let max_urls = self.settings.max_urls;
        let stop: StopPredicate = {
            let count = count.clone();
            Arc::new(move || max_urls.is_some_and(|max| count.load(Ordering::SeqCst) >= max))
        };

        let mut visited = 0usize;
        let mut clicks = 0usize;
        let outcome: Result<StopReason> = async {
            if let Some(credentials) = &self.settings.credentials {
                let login_url = self
                    .settings
                    .login_url
                    .clone()
                    .unwrap_or_else(|| self.settings.target_url.clone());
                let outcome = login(page.as_ref(), &login_url, credentials, &timeouts).await?;
                info!(outcome = ?outcome, "Login step finished");
            }

            let start = normalize(&self.settings.target_url);
            let mut queued = HashSet::from([canonical_key(&start)]);
            let mut queue = VecDeque::from([start.clone()]);
            if known.insert(&start) {
                self.sink.record_discovered(&start).await?;
            }

            while let Some(url) = queue.pop_front() {
                if stop() {
                    info!("Reached max URLs limit");
                    return Ok(StopReason::MaxUrls);
                }
                if self.browser.is_closed() {
                    return Ok(StopReason::SessionClosed);
                }
                if let Some(cb) = &self.progress_callback {
                    cb(known.urls.len(), url.clone());
                }

                if let Err(e) = page.goto(&url, timeouts.navigation).await {
                    if e.is_session_closed() {
                        return Err(e);
                    }
                    warn!(url = %url, "Skipping URL, navigation failed: {}", e);
                    continue;
                }
                wait_for_app_ready(page.as_ref(), &timeouts).await?;
                let state = capture(page.as_ref(), 0, &timeouts).await?;
                self.sink.record_visited(&state).await?;
                visited += 1;

                let landed = state.url();
                if self.in_scope(&landed) && known.insert(&landed) {
                    self.sink.record_discovered(&landed).await?;
                }

                let mut found: Vec<String> =
                    extract_internal_urls(&state.snapshot_text, &landed, &self.settings.target_url)
                        .into_iter()
                        .filter(|u| self.in_scope(u))
                        .collect();

                if !stop() {
                    let explorer = ClickExplorer::new(
                        page.as_ref(),
                        &self.session,
                        &self.settings.target_url,
                        timeouts,
                    )
                    .with_subtree(self.settings.subtree)
                    .with_stop_predicate(stop.clone())
                    .with_discovered_callback({
                        let count = count.clone();
                        Arc::new(move |_url: &str| {
                            count.fetch_add(1, Ordering::SeqCst);
                        })
                    });
                    let exploration = explorer.explore(&state.snapshot_text, &known.set).await?;
                    clicks += exploration.clicks;
                    found.extend(exploration.discovered);
                }

                for u in found {
                    if max_urls.is_some_and(|max| known.urls.len() >= max) {
                        break;
                    }
                    if known.insert(&u) {
                        self.sink.record_discovered(&u).await?;
                    }
                    if queued.insert(canonical_key(&u)) {
                        debug!(url = %u, "Queued");
                        queue.push_back(u);
                    }
                }
            }

            Ok(StopReason::FrontierExhausted)
        }
        .await;

        if let Err(e) = page.close().await {
            debug!("Closing collector page failed: {}", e);
        }

        let stop_reason = match outcome {
            Ok(reason) => reason,
            Err(e) if e.is_session_closed() => {
                warn!("Browser session closed, stopping collection: {}", e);
                StopReason::SessionClosed
            }
            Err(e) => return Err(e),
        };

        info!(
            urls = known.urls.len(),
            visited,
            clicks,
            reason = %stop_reason,
            "[collect] collected {} internal URLs",
            known.urls.len()
        );
        Ok(CollectSummary {
            urls: known.urls,
            visited,
            clicks,
            stop_reason,
        })
    }
}
