use crate::error::Result;
use crate::graph::{GraphStore, PageRecord, SessionStatus};
use crate::tabular::{AppendOutcome, TabularSink};
use async_trait::async_trait;
use stategraph_scanner::collector::UrlSink;
use stategraph_scanner::orchestrator::StateSink;
use stategraph_scanner::result::Edge;
use stategraph_scanner::snapshot::PageState;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Fans crawl output out to the tabular file and an optional graph store.
///
/// The tabular file is the primary output, so its errors stop the run. The
/// first graph error disables the graph store for the rest of the run.
pub struct Persistence {
    graph: Mutex<Option<Box<dyn GraphStore>>>,
    tabular: Arc<TabularSink>,
    rows_written: AtomicUsize,
}

impl Persistence {
    pub fn new(tabular: Arc<TabularSink>) -> Self {
        Self {
            graph: Mutex::new(None),
            tabular,
            rows_written: AtomicUsize::new(0),
        }
    }

    pub fn with_graph(self, store: Box<dyn GraphStore>) -> Self {
        *self.lock_graph() = Some(store);
        self
    }

    fn lock_graph(&self) -> MutexGuard<'_, Option<Box<dyn GraphStore>>> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `op` against the graph store, disabling the store on failure.
    fn with_store<T>(&self, what: &str, op: impl FnOnce(&mut dyn GraphStore) -> Result<T>) -> Option<T> {
        let mut guard = self.lock_graph();
        let store = guard.as_mut()?;
        match op(store.as_mut()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Graph store unavailable during {}, continuing without it: {}", what, e);
                *guard = None;
                None
            }
        }
    }

    pub fn init_graph(&self, clear: bool) {
        self.with_store("init", |store| store.init(clear));
    }

    pub fn has_graph(&self) -> bool {
        self.lock_graph().is_some()
    }

    pub fn tabular(&self) -> &TabularSink {
        &self.tabular
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written.load(Ordering::SeqCst)
    }

    pub fn begin_session(&self, scan_type: &str, seed_urls: &str, configuration: &str) -> Option<String> {
        self.with_store("session start", |store| {
            store.begin_session(scan_type, seed_urls, configuration)
        })
        .flatten()
    }

    pub fn end_session(&self, session_id: &str, status: SessionStatus, stop_reason: Option<&str>) {
        self.with_store("session end", |store| store.end_session(session_id, status, stop_reason));
    }

    /// Stored states and edge count, when a graph store is still active.
    pub fn graph_summary(&self) -> Option<(Vec<PageRecord>, usize)> {
        self.with_store("summary", |store| Ok((store.pages()?, store.edge_count()?)))
    }

    async fn append(&self, state: &PageState) -> Result<AppendOutcome> {
        let outcome = self.tabular.append_node_dedup(state).await?;
        if outcome.wrote_row() {
            self.rows_written.fetch_add(1, Ordering::SeqCst);
        }
        Ok(outcome)
    }

    pub async fn close(&self) -> Result<()> {
        self.tabular.close().await
    }
}

#[async_trait]
impl StateSink for Persistence {
    async fn record_node(&self, state: &PageState) -> stategraph_scanner::error::Result<()> {
        self.with_store("node upsert", |store| store.upsert_node(state));
        let outcome = self.append(state).await?;
        debug!(url = %state.url(), outcome = ?outcome, "Recorded state");
        Ok(())
    }

    async fn record_edge(&self, edge: &Edge) -> stategraph_scanner::error::Result<()> {
        if let Some(false) = self.with_store("edge upsert", |store| store.upsert_edge(edge)) {
            debug!(from = %edge.from_hash, to = %edge.to_hash, "Edge suppressed");
        }
        Ok(())
    }
}

#[async_trait]
impl UrlSink for Persistence {
    async fn record_discovered(&self, url: &str) -> stategraph_scanner::error::Result<()> {
        if self.tabular.append_url_only(url).await? {
            self.rows_written.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn record_visited(&self, state: &PageState) -> stategraph_scanner::error::Result<()> {
        self.with_store("node upsert", |store| store.upsert_node(state));
        self.append(state).await?;
        Ok(())
    }
}
