// Tests for the append-only tabular output

use stategraph_core::tabular::{AppendOutcome, HEADER_LINE, TabularSink, read_rows};
use stategraph_scanner::snapshot::{PageState, render_markdown};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn state(url: &str, text: &str) -> PageState {
    PageState::new(url, text.to_string(), 0)
}

fn output(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("out").join("crawl.csv")
}

// ============================================================================
// File Format Tests
// ============================================================================

#[tokio::test]
async fn test_header_written_once() {
    let dir = TempDir::new().unwrap();
    let path = output(&dir);

    let sink = TabularSink::open(&path, false).unwrap();
    sink.close().await.unwrap();
    let sink = TabularSink::open(&path, false).unwrap();
    sink.close().await.unwrap();

    let content = fs::read_to_string(&path).unwrap();
    assert_eq!(content, HEADER_LINE);
    assert!(content.starts_with("URL,id,site,\"snapshotfor AI\",\"snapshotin MD\",timestamp"));
}

#[tokio::test]
async fn test_fields_are_quoted_and_json_encoded() {
    let dir = TempDir::new().unwrap();
    let path = output(&dir);

    let sink = TabularSink::open(&path, false).unwrap();
    let text = "- heading \"Home\" [level=1]\n- paragraph: hi";
    sink.append_node_dedup(&state("http://app.test/", text)).await.unwrap();
    sink.close().await.unwrap();

    let content = fs::read_to_string(&path).unwrap();
    let row = content.lines().nth(1).unwrap();
    assert!(row.starts_with("\"http://app.test/\",\"1\",\"http://app.test\","));
    // JSON escapes doubled by CSV quoting
    assert!(row.contains("\"\"- heading \\\"\"Home\\\"\" [level=1]\\n- paragraph: hi\"\""));

    let rows = read_rows(&path).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].snapshot_text().as_deref(), Some(text));
    assert_eq!(
        rows[0].snapshot_md,
        serde_json::to_string(&render_markdown(text)).unwrap()
    );
}

// ============================================================================
// Deduplication Tests
// ============================================================================

#[tokio::test]
async fn test_same_state_twice_yields_one_row() {
    let dir = TempDir::new().unwrap();
    let path = output(&dir);

    let sink = TabularSink::open(&path, false).unwrap();
    let s = state("http://app.test/x", "same");
    assert_eq!(sink.append_node_dedup(&s).await.unwrap(), AppendOutcome::Inserted);
    assert_eq!(sink.append_node_dedup(&s).await.unwrap(), AppendOutcome::Unchanged);
    sink.close().await.unwrap();

    assert_eq!(read_rows(&path).unwrap().len(), 1);
}

#[tokio::test]
async fn test_global_duplicate_skipped() {
    let dir = TempDir::new().unwrap();
    let path = output(&dir);

    let sink = TabularSink::open(&path, false).unwrap();
    sink.append_node_dedup(&state("http://app.test/a", "shared")).await.unwrap();
    let outcome = sink
        .append_node_dedup(&state("http://app.test/b", "shared"))
        .await
        .unwrap();
    assert_eq!(outcome, AppendOutcome::GlobalDuplicate);
    sink.close().await.unwrap();

    let rows = read_rows(&path).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].url, "http://app.test/a");
}

#[tokio::test]
async fn test_previous_content_free_for_other_urls() {
    let dir = TempDir::new().unwrap();
    let path = output(&dir);

    let sink = TabularSink::open(&path, false).unwrap();
    let outcomes = [
        sink.append_node_dedup(&state("http://app.test/a", "H1")).await.unwrap(),
        sink.append_node_dedup(&state("http://app.test/a", "H2")).await.unwrap(),
        sink.append_node_dedup(&state("http://app.test/b", "H1")).await.unwrap(),
    ];
    assert_eq!(
        outcomes,
        [AppendOutcome::Inserted, AppendOutcome::Updated, AppendOutcome::Inserted]
    );
    sink.close().await.unwrap();

    let rows = read_rows(&path).unwrap();
    let text_of = |url: &str| rows.iter().find(|r| r.url == url).and_then(|r| r.snapshot_text());
    assert_eq!(rows.len(), 2);
    assert_eq!(text_of("http://app.test/a").as_deref(), Some("H2"));
    assert_eq!(text_of("http://app.test/b").as_deref(), Some("H1"));
}

#[tokio::test]
async fn test_previous_content_free_after_restart() {
    let dir = TempDir::new().unwrap();
    let path = output(&dir);

    let sink = TabularSink::open(&path, false).unwrap();
    sink.append_node_dedup(&state("http://app.test/a", "H1")).await.unwrap();
    sink.append_node_dedup(&state("http://app.test/a", "H2")).await.unwrap();
    drop(sink);

    let sink = TabularSink::open(&path, false).unwrap();
    assert_eq!(
        sink.append_node_dedup(&state("http://app.test/b", "H1")).await.unwrap(),
        AppendOutcome::Inserted
    );
    // The current content of /a is still owned by it
    assert_eq!(
        sink.append_node_dedup(&state("http://app.test/c", "H2")).await.unwrap(),
        AppendOutcome::GlobalDuplicate
    );
    sink.close().await.unwrap();

    let rows = read_rows(&path).unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn test_changed_content_keeps_id() {
    let dir = TempDir::new().unwrap();
    let path = output(&dir);

    let sink = TabularSink::open(&path, false).unwrap();
    sink.append_node_dedup(&state("http://app.test/a", "first")).await.unwrap();
    sink.append_node_dedup(&state("http://app.test/b", "other")).await.unwrap();
    let outcome = sink
        .append_node_dedup(&state("http://app.test/a", "second"))
        .await
        .unwrap();
    assert_eq!(outcome, AppendOutcome::Updated);

    let rows = read_rows(&path).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].id, 1);
    assert_eq!(rows[1].id, 2);
    assert_eq!(rows[2].id, 1);
}

#[tokio::test]
async fn test_reverted_content_keeps_last_append() {
    let dir = TempDir::new().unwrap();
    let path = output(&dir);

    let sink = TabularSink::open(&path, false).unwrap();
    sink.append_node_dedup(&state("http://app.test/x", "H1")).await.unwrap();
    sink.append_node_dedup(&state("http://app.test/x", "H2")).await.unwrap();
    let outcome = sink
        .append_node_dedup(&state("http://app.test/x", "H1"))
        .await
        .unwrap();
    assert_eq!(outcome, AppendOutcome::Updated);

    let before = read_rows(&path).unwrap();
    assert_eq!(before.len(), 3);
    let last_timestamp = before[2].timestamp.clone();

    sink.close().await.unwrap();
    let rows = read_rows(&path).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].snapshot_text().as_deref(), Some("H1"));
    assert_eq!(rows[0].timestamp, last_timestamp);
}

#[tokio::test]
async fn test_concurrent_appends_allocate_unique_ids() {
    let dir = TempDir::new().unwrap();
    let path = output(&dir);
    let sink = Arc::new(TabularSink::open(&path, false).unwrap());

    let mut handles = Vec::new();
    for i in 0..20 {
        let sink = sink.clone();
        handles.push(tokio::spawn(async move {
            let s = state(&format!("http://app.test/p{}", i), &format!("page {}", i));
            sink.append_node_dedup(&s).await.unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), AppendOutcome::Inserted);
    }
    sink.close().await.unwrap();

    let mut ids: Vec<u64> = read_rows(&path).unwrap().iter().map(|r| r.id).collect();
    ids.sort();
    assert_eq!(ids, (1..=20).collect::<Vec<u64>>());
}

// ============================================================================
// Restart Tests
// ============================================================================

#[tokio::test]
async fn test_ids_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = output(&dir);

    let sink = TabularSink::open(&path, false).unwrap();
    sink.append_node_dedup(&state("http://app.test/a", "a")).await.unwrap();
    sink.append_node_dedup(&state("http://app.test/b", "b")).await.unwrap();
    // Dropped without close, as after a crash
    drop(sink);

    let sink = TabularSink::open(&path, false).unwrap();
    assert_eq!(sink.row_count().await, 2);
    assert_eq!(
        sink.append_node_dedup(&state("http://app.test/a", "a")).await.unwrap(),
        AppendOutcome::Unchanged
    );
    sink.append_node_dedup(&state("http://app.test/b", "b changed")).await.unwrap();
    sink.append_node_dedup(&state("http://app.test/c", "c")).await.unwrap();
    sink.close().await.unwrap();

    let rows = read_rows(&path).unwrap();
    let id_of = |url: &str| rows.iter().find(|r| r.url == url).unwrap().id;
    assert_eq!(rows.len(), 3);
    assert_eq!(id_of("http://app.test/a"), 1);
    assert_eq!(id_of("http://app.test/b"), 2);
    assert_eq!(id_of("http://app.test/c"), 3);
}

#[tokio::test]
async fn test_clear_starts_fresh() {
    let dir = TempDir::new().unwrap();
    let path = output(&dir);

    let sink = TabularSink::open(&path, false).unwrap();
    sink.append_node_dedup(&state("http://app.test/a", "a")).await.unwrap();
    sink.close().await.unwrap();

    let sink = TabularSink::open(&path, true).unwrap();
    sink.append_node_dedup(&state("http://app.test/b", "b")).await.unwrap();
    sink.close().await.unwrap();

    let rows = read_rows(&path).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].url, "http://app.test/b");
    assert_eq!(rows[0].id, 1);
}

// ============================================================================
// Placeholder Tests
// ============================================================================

#[tokio::test]
async fn test_placeholder_superseded_by_full_row() {
    let dir = TempDir::new().unwrap();
    let path = output(&dir);

    let sink = TabularSink::open(&path, false).unwrap();
    assert!(sink.append_url_only("http://app.test/later").await.unwrap());
    assert!(!sink.append_url_only("http://app.test/later").await.unwrap());
    sink.append_node_dedup(&state("http://app.test/later", "content")).await.unwrap();
    sink.close().await.unwrap();

    let rows = read_rows(&path).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_full());
    assert_eq!(rows[0].id, 1);
}

#[tokio::test]
async fn test_placeholder_kept_when_never_visited() {
    let dir = TempDir::new().unwrap();
    let path = output(&dir);

    let sink = TabularSink::open(&path, false).unwrap();
    sink.append_url_only("http://app.test/only").await.unwrap();
    sink.close().await.unwrap();

    let rows = read_rows(&path).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].is_full());
    assert_eq!(rows[0].site, "http://app.test");
}

// ============================================================================
// Close Tests
// ============================================================================

#[tokio::test]
async fn test_append_after_close_fails() {
    let dir = TempDir::new().unwrap();
    let path = output(&dir);

    let sink = TabularSink::open(&path, false).unwrap();
    sink.close().await.unwrap();
    assert!(sink.append_node_dedup(&state("http://app.test/", "x")).await.is_err());
    // Second close is a no-op
    assert!(sink.close().await.is_ok());
}

#[tokio::test]
async fn test_close_leaves_no_temp_file() {
    let dir = TempDir::new().unwrap();
    let path = output(&dir);

    let sink = TabularSink::open(&path, false).unwrap();
    sink.append_node_dedup(&state("http://app.test/", "x")).await.unwrap();
    sink.close().await.unwrap();

    let names: Vec<String> = fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["crawl.csv".to_string()]);
}
