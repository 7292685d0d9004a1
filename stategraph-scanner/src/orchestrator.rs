//! Breadth-first exploration of UI states.
//!
//! The frontier holds captured states. Each pop resolves the state's
//! interactions in fixed-size concurrent batches and enqueues every result
//! whose content hash has not been seen before.

use crate::browser::{Browser, Page, Timeouts, wait_for_app_ready};
use crate::error::{Result, ScanError};
use crate::explorer::StopPredicate;
use crate::extract::{self, Interaction};
use crate::login::{Credentials, login};
use crate::processor::InteractionProcessor;
use crate::result::{CrawlSummary, Edge, StopReason, Transition};
use crate::session::SessionContext;
use crate::snapshot::{PageState, capture};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;

/// Where discovered states and transitions go.
#[async_trait]
pub trait StateSink: Send + Sync {
    async fn record_node(&self, state: &PageState) -> Result<()>;

    async fn record_edge(&self, edge: &Edge) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub target_url: String,
    pub login_url: Option<String>,
    pub credentials: Option<Credentials>,
    pub max_depth: usize,
    pub max_states: usize,
    pub parallelism: usize,
    /// Disables the depth, state-count and saturation limits.
    pub exhaustive: bool,
    pub subtree: bool,
    /// Record an edge when an interaction lands on an already-known state.
    pub link_known_states: bool,
    pub timeouts: Timeouts,
}

impl CrawlSettings {
    pub const DEFAULT_MAX_DEPTH: usize = 20;
    pub const DEFAULT_MAX_STATES: usize = 10_000;
    pub const DEFAULT_PARALLELISM: usize = 8;

    pub fn new(target_url: &str) -> Self {
        Self {
            target_url: target_url.to_string(),
            login_url: None,
            credentials: None,
            max_depth: Self::DEFAULT_MAX_DEPTH,
            max_states: Self::DEFAULT_MAX_STATES,
            parallelism: Self::DEFAULT_PARALLELISM,
            exhaustive: false,
            subtree: false,
            link_known_states: false,
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_login(mut self, login_url: Option<String>, credentials: Credentials) -> Self {
        self.login_url = login_url;
        self.credentials = Some(credentials);
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_states(mut self, states: usize) -> Self {
        self.max_states = states;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_exhaustive(mut self, exhaustive: bool) -> Self {
        self.exhaustive = exhaustive;
        self
    }

    pub fn with_subtree(mut self, subtree: bool) -> Self {
        self.subtree = subtree;
        self
    }

    pub fn with_link_known_states(mut self, link: bool) -> Self {
        self.link_known_states = link;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Consecutive fruitless pops tolerated before the crawl stops early.
    pub fn saturation_threshold(&self) -> usize {
        3usize.max(self.max_depth.div_ceil(2))
    }
}

#[derive(Debug, Default)]
struct Counters {
    states: usize,
    edges: usize,
    pops: usize,
}

pub struct CrawlOrchestrator {
    browser: Arc<dyn Browser>,
    sink: Arc<dyn StateSink>,
    session: Arc<SessionContext>,
    settings: CrawlSettings,
    progress_callback: Option<ProgressCallback>,
    should_stop: Option<StopPredicate>,
}

impl CrawlOrchestrator {
    pub fn new(browser: Arc<dyn Browser>, sink: Arc<dyn StateSink>, settings: CrawlSettings) -> Self {
        Self {
            browser,
            sink,
            session: Arc::new(SessionContext::new()),
            settings,
            progress_callback: None,
            should_stop: None,
        }
    }

    pub fn with_session(mut self, session: Arc<SessionContext>) -> Self {
        self.session = session;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn with_stop_predicate(mut self, predicate: StopPredicate) -> Self {
        self.should_stop = Some(predicate);
        self
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    fn processor(&self) -> InteractionProcessor {
        InteractionProcessor::new(
            self.browser.clone(),
            self.session.clone(),
            &self.settings.target_url,
            self.settings.timeouts,
        )
        .with_subtree(self.settings.subtree)
    }

    /// Run one crawl session to completion. A browser that goes away ends the
    /// run gracefully; sink failures are returned.
    pub async fn run(&self) -> Result<CrawlSummary> {
        info!(
            url = %self.settings.target_url,
            max_depth = self.settings.max_depth,
            max_states = self.settings.max_states,
            parallelism = self.settings.parallelism,
            exhaustive = self.settings.exhaustive,
            "Starting crawl"
        );

        let mut counters = Counters::default();
        let outcome = match self.browser.new_page().await {
            Ok(page) => {
                let outcome = self.drive(page.as_ref(), &mut counters).await;
                if let Err(e) = page.close().await {
                    debug!("Closing main page failed: {}", e);
                }
                outcome
            }
            Err(e) => Err(e),
        };

        let stop_reason = match outcome {
            Ok(reason) => reason,
            Err(e) if e.is_session_closed() => {
                warn!("Browser session closed, stopping crawl: {}", e);
                StopReason::SessionClosed
            }
            Err(e) => return Err(e),
        };

        let summary = CrawlSummary {
            states: counters.states,
            edges: counters.edges,
            pops: counters.pops,
            stop_reason,
        };
        info!(
            states = summary.states,
            edges = summary.edges,
            pops = summary.pops,
            reason = %summary.stop_reason,
            "Crawl completed! Total states: {}",
            summary.states
        );
        Ok(summary)
    }

    async fn drive(&self, page: &dyn Page, counters: &mut Counters) -> Result<StopReason> {
        let root = self.seed(page, counters).await?;
        let mut frontier = VecDeque::from([root]);
        let processor = self.processor();
        let threshold = self.settings.saturation_threshold();
        let exhaustive = self.settings.exhaustive;
        let mut streak = 0usize;

        loop {
            if self.should_stop.as_ref().is_some_and(|stop| stop()) {
                return Ok(StopReason::StopRequested);
            }
            if self.browser.is_closed() || page.is_closed() {
                return Err(ScanError::SessionClosed("browser closed during crawl".to_string()));
            }
            if !exhaustive && streak >= threshold {
                info!(
                    "Early stop due to saturation. No new states discovered in {} iterations.",
                    streak
                );
                return Ok(StopReason::Saturated);
            }
            if !exhaustive && counters.states >= self.settings.max_states {
                info!("Reached max states limit {}", self.settings.max_states);
                return Ok(StopReason::MaxStates);
            }
            let Some(current) = frontier.pop_front() else {
                return Ok(StopReason::FrontierExhausted);
            };
            if !exhaustive && current.depth >= self.settings.max_depth {
                continue;
            }

            counters.pops += 1;
            let url = current.url();
            if let Some(cb) = &self.progress_callback {
                cb(counters.states, url.clone());
            }

            if let Err(e) = page.goto(&url, self.settings.timeouts.navigation).await {
                if e.is_session_closed() {
                    return Err(e);
                }
                warn!(url = %url, "Skipping state, navigation failed: {}", e);
                continue;
            }
            wait_for_app_ready(page, &self.settings.timeouts).await?;

            let interactions = extract::parse(&current.snapshot_text);
            debug!(url = %url, depth = current.depth, interactions = interactions.len(), "Expanding state");

            let current = Arc::new(current);
            let mut discovered = 0usize;
            for batch in interactions.chunks(self.settings.parallelism.max(1)) {
                if !exhaustive && counters.states >= self.settings.max_states {
                    break;
                }
                for outcome in self.run_batch(&processor, &current, batch).await {
                    match outcome {
                        Ok(Some(transition)) => {
                            if self.accept(&current, transition, &mut frontier, counters).await? {
                                discovered += 1;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => return Err(e),
                    }
                }
            }

            if discovered == 0 {
                streak += 1;
            } else {
                streak = 0;
            }
            debug!(url = %url, discovered, streak, queued = frontier.len(), "State expanded");
        }
    }

    /// Capture the starting state, logging in first when credentials are
    /// configured. Returns the state the frontier starts from.
    async fn seed(&self, page: &dyn Page, counters: &mut Counters) -> Result<PageState> {
        let timeouts = &self.settings.timeouts;

        let Some(credentials) = &self.settings.credentials else {
            self.open(page, &self.settings.target_url).await?;
            let root = capture(page, 0, timeouts).await?;
            self.store_new(&root, counters).await?;
            return Ok(root);
        };

        let login_url = self
            .settings
            .login_url
            .clone()
            .unwrap_or_else(|| self.settings.target_url.clone());
        self.open(page, &login_url).await?;
        let pre_login = capture(page, 0, timeouts).await?;
        self.store_new(&pre_login, counters).await?;

        let outcome = login(page, &login_url, credentials, timeouts).await?;
        info!(outcome = ?outcome, "Login step finished");

        let post_login = capture(page, 0, timeouts).await?;
        if post_login.snapshot_hash == pre_login.snapshot_hash {
            warn!("Login did not change the page; crawling from the pre-login state");
            return Ok(pre_login);
        }
        if self.store_new(&post_login, counters).await? {
            self.store_edge(&Edge::submit(&pre_login, &post_login), counters)
                .await?;
        }
        Ok(post_login)
    }

    async fn open(&self, page: &dyn Page, url: &str) -> Result<()> {
        if let Err(e) = page.goto(url, self.settings.timeouts.navigation).await {
            if e.is_session_closed() {
                return Err(e);
            }
            warn!(url = %url, "Initial navigation failed: {}", e);
        }
        wait_for_app_ready(page, &self.settings.timeouts).await
    }

    async fn run_batch(
        &self,
        processor: &InteractionProcessor,
        from: &Arc<PageState>,
        batch: &[Interaction],
    ) -> Vec<Result<Option<Transition>>> {
        let mut set = JoinSet::new();
        for (idx, interaction) in batch.iter().cloned().enumerate() {
            let processor = processor.clone();
            let from = from.clone();
            set.spawn(async move { (idx, processor.process(&from, &interaction).await) });
        }

        let mut outcomes = Vec::with_capacity(batch.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("Interaction task failed: {}", e),
            }
        }
        outcomes.sort_by_key(|(idx, _)| *idx);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    /// Persist and enqueue a transition's state if it is new. Returns whether
    /// it was.
    async fn accept(
        &self,
        from: &PageState,
        transition: Transition,
        frontier: &mut VecDeque<PageState>,
        counters: &mut Counters,
    ) -> Result<bool> {
        let Transition { mut state, interaction } = transition;
        state.depth = from.depth + 1;
        let edge = Edge::new(from, &state, &interaction);

        if edge.is_self_loop() {
            debug!(url = %state.url(), "Interaction left the state unchanged");
            return Ok(false);
        }
        if self.session.is_visited(&state.snapshot_hash) {
            if self.settings.link_known_states {
                self.store_edge(&edge, counters).await?;
            }
            debug!(url = %state.url(), "State already known");
            return Ok(false);
        }
        if !self.settings.exhaustive && counters.states >= self.settings.max_states {
            return Ok(false);
        }
        if !self.store_new(&state, counters).await? {
            return Ok(false);
        }
        self.store_edge(&edge, counters).await?;

        info!(
            url = %state.url(),
            depth = state.depth,
            action = %interaction.action_type,
            "New state"
        );
        frontier.push_back(state);
        Ok(true)
    }

    async fn store_new(&self, state: &PageState, counters: &mut Counters) -> Result<bool> {
        if !self.session.mark_visited(&state.snapshot_hash) {
            return Ok(false);
        }
        self.sink.record_node(state).await?;
        counters.states += 1;
        Ok(true)
    }

    async fn store_edge(&self, edge: &Edge, counters: &mut Counters) -> Result<()> {
        if edge.is_self_loop() {
            return Ok(());
        }
        self.sink.record_edge(edge).await?;
        counters.edges += 1;
        Ok(())
    }
}
