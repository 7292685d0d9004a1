//! Graph-store contract and the in-memory petgraph implementation.

use crate::error::Result;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use stategraph_scanner::extract::ActionType;
use stategraph_scanner::result::Edge;
use stategraph_scanner::snapshot::PageState;
use std::collections::{HashMap, HashSet};

/// One stored state, as reported back for summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRecord {
    pub url: String,
    pub snapshot_hash: String,
    pub depth: usize,
    pub out_edges: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

/// Upsert-only store for the state graph. The content hash is the node key.
pub trait GraphStore: Send {
    /// Prepare the store, dropping any previous graph when `clear` is set.
    fn init(&mut self, clear: bool) -> Result<()>;

    fn upsert_node(&mut self, state: &PageState) -> Result<()>;

    /// Returns false when the edge was suppressed: a self-loop, a duplicate,
    /// or a second navigate edge to the same URL from the same state.
    fn upsert_edge(&mut self, edge: &Edge) -> Result<bool>;

    fn node_count(&self) -> Result<usize>;

    fn edge_count(&self) -> Result<usize>;

    fn pages(&self) -> Result<Vec<PageRecord>>;

    /// Stores that keep run history return a session id.
    fn begin_session(&mut self, _scan_type: &str, _seed_urls: &str, _configuration: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn end_session(&mut self, _session_id: &str, _status: SessionStatus, _stop_reason: Option<&str>) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StateNode {
    url: String,
    hash: String,
    depth: usize,
}

#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    graph: DiGraph<StateNode, ActionType>,
    index: HashMap<String, NodeIndex>,
    edges: HashSet<(String, String, ActionType)>,
    navigations: HashSet<(String, String)>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphStore for MemoryGraphStore {
    fn init(&mut self, clear: bool) -> Result<()> {
        if clear {
            *self = Self::default();
        }
        Ok(())
    }

    fn upsert_node(&mut self, state: &PageState) -> Result<()> {
        if !self.index.contains_key(&state.snapshot_hash) {
            let idx = self.graph.add_node(StateNode {
                url: state.url(),
                hash: state.snapshot_hash.clone(),
                depth: state.depth,
            });
            self.index.insert(state.snapshot_hash.clone(), idx);
        }
        Ok(())
    }

    fn upsert_edge(&mut self, edge: &Edge) -> Result<bool> {
        if edge.is_self_loop() {
            return Ok(false);
        }
        let (Some(&from), Some(&to)) = (self.index.get(&edge.from_hash), self.index.get(&edge.to_hash)) else {
            return Ok(false);
        };
        if edge.action_type == ActionType::Navigate
            && let Some(href) = &edge.href
            && !self.navigations.insert((edge.from_hash.clone(), href.clone()))
        {
            return Ok(false);
        }
        if !self
            .edges
            .insert((edge.from_hash.clone(), edge.to_hash.clone(), edge.action_type))
        {
            return Ok(false);
        }
        self.graph.add_edge(from, to, edge.action_type);
        Ok(true)
    }

    fn node_count(&self) -> Result<usize> {
        Ok(self.graph.node_count())
    }

    fn edge_count(&self) -> Result<usize> {
        Ok(self.graph.edge_count())
    }

    fn pages(&self) -> Result<Vec<PageRecord>> {
        Ok(self
            .graph
            .node_indices()
            .map(|idx| {
                let node = &self.graph[idx];
                PageRecord {
                    url: node.url.clone(),
                    snapshot_hash: node.hash.clone(),
                    depth: node.depth,
                    out_edges: self.graph.edges_directed(idx, Direction::Outgoing).count(),
                }
            })
            .collect())
    }
}
