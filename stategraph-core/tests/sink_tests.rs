// Tests for the persistence facade

use stategraph_core::error::{Result, StoreError};
use stategraph_core::graph::{GraphStore, MemoryGraphStore, PageRecord};
use stategraph_core::sink::Persistence;
use stategraph_core::tabular::{TabularSink, read_rows};
use stategraph_scanner::collector::UrlSink;
use stategraph_scanner::extract::{ActionType, Interaction};
use stategraph_scanner::orchestrator::StateSink;
use stategraph_scanner::result::Edge;
use stategraph_scanner::snapshot::PageState;
use std::sync::Arc;
use tempfile::TempDir;

/// Graph store whose backend has gone away.
struct BrokenStore;

impl GraphStore for BrokenStore {
    fn init(&mut self, _clear: bool) -> Result<()> {
        Ok(())
    }

    fn upsert_node(&mut self, _state: &PageState) -> Result<()> {
        Err(StoreError::Closed("graph".to_string()))
    }

    fn upsert_edge(&mut self, _edge: &Edge) -> Result<bool> {
        Err(StoreError::Closed("graph".to_string()))
    }

    fn node_count(&self) -> Result<usize> {
        Ok(0)
    }

    fn edge_count(&self) -> Result<usize> {
        Ok(0)
    }

    fn pages(&self) -> Result<Vec<PageRecord>> {
        Ok(Vec::new())
    }
}

fn persistence(dir: &TempDir) -> Persistence {
    let tabular = Arc::new(TabularSink::open(&dir.path().join("crawl.csv"), false).unwrap());
    Persistence::new(tabular)
}

fn state(url: &str, text: &str) -> PageState {
    PageState::new(url, text.to_string(), 0)
}

fn link(href: &str) -> Interaction {
    Interaction {
        action_type: ActionType::Navigate,
        role: "link".to_string(),
        name: None,
        ref_token: "e1".to_string(),
        href: Some(href.to_string()),
    }
}

// ============================================================================
// Crawl Sink Tests
// ============================================================================

#[tokio::test]
async fn test_nodes_and_edges_reach_both_stores() {
    let dir = TempDir::new().unwrap();
    let sink = persistence(&dir).with_graph(Box::new(MemoryGraphStore::new()));

    let home = state("http://app.test/", "home");
    let next = state("http://app.test/next", "next");
    sink.record_node(&home).await.unwrap();
    sink.record_node(&next).await.unwrap();
    sink.record_edge(&Edge::new(&home, &next, &link("http://app.test/next")))
        .await
        .unwrap();
    sink.record_edge(&Edge::new(&home, &home, &link("http://app.test/")))
        .await
        .unwrap();

    let (pages, edges) = sink.graph_summary().unwrap();
    assert_eq!(pages.len(), 2);
    assert_eq!(edges, 1);
    assert_eq!(sink.rows_written(), 2);

    sink.close().await.unwrap();
    assert_eq!(read_rows(&dir.path().join("crawl.csv")).unwrap().len(), 2);
}

#[tokio::test]
async fn test_graph_failure_disables_graph_only() {
    let dir = TempDir::new().unwrap();
    let sink = persistence(&dir).with_graph(Box::new(BrokenStore));
    assert!(sink.has_graph());

    sink.record_node(&state("http://app.test/", "home")).await.unwrap();
    assert!(!sink.has_graph());

    // Later writes keep going to the tabular file
    sink.record_node(&state("http://app.test/a", "a")).await.unwrap();
    assert_eq!(sink.rows_written(), 2);
    assert!(sink.graph_summary().is_none());
    assert!(sink.begin_session("crawl", "[]", "{}").is_none());
}

#[tokio::test]
async fn test_tabular_failure_propagates() {
    let dir = TempDir::new().unwrap();
    let sink = persistence(&dir);
    sink.close().await.unwrap();

    let err = sink.record_node(&state("http://app.test/", "home")).await.unwrap_err();
    assert!(!err.is_session_closed());
}

#[tokio::test]
async fn test_memory_store_has_no_sessions() {
    let dir = TempDir::new().unwrap();
    let sink = persistence(&dir).with_graph(Box::new(MemoryGraphStore::new()));
    assert!(sink.begin_session("crawl", "[]", "{}").is_none());
    assert!(sink.has_graph());
}

// ============================================================================
// Collect Sink Tests
// ============================================================================

#[tokio::test]
async fn test_discovered_then_visited() {
    let dir = TempDir::new().unwrap();
    let sink = persistence(&dir);

    sink.record_discovered("http://app.test/a").await.unwrap();
    sink.record_discovered("http://app.test/a").await.unwrap();
    sink.record_discovered("http://app.test/b").await.unwrap();
    sink.record_visited(&state("http://app.test/a", "alpha")).await.unwrap();
    assert_eq!(sink.rows_written(), 3);

    sink.close().await.unwrap();
    let rows = read_rows(&dir.path().join("crawl.csv")).unwrap();
    assert_eq!(rows.len(), 2);
    let a = rows.iter().find(|r| r.url == "http://app.test/a").unwrap();
    assert!(a.is_full());
    assert_eq!(a.id, 1);
    let b = rows.iter().find(|r| r.url == "http://app.test/b").unwrap();
    assert!(!b.is_full());
}
