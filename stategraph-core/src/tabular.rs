//! Append-only CSV output, keyed by URL.
//!
//! Rows are appended as the crawl runs so an interrupted run still leaves a
//! readable file. Ids are stable per URL across restarts because the existing
//! file is replayed on open. A clean close compacts the file to one row per
//! URL.

use crate::error::{Result, StoreError};
use chrono::{DateTime, FixedOffset};
use csv::{QuoteStyle, ReaderBuilder, Writer, WriterBuilder};
use stategraph_scanner::snapshot::{PageState, content_hash, now_timestamp, render_markdown};
use stategraph_scanner::url::site_and_route;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const HEADER_LINE: &str = "URL,id,site,\"snapshotfor AI\",\"snapshotin MD\",timestamp\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Another URL already holds this exact content.
    GlobalDuplicate,
    /// This URL already holds this exact content.
    Unchanged,
    /// Same URL, new content, same id.
    Updated,
    Inserted,
}

impl AppendOutcome {
    pub fn wrote_row(&self) -> bool {
        matches!(self, AppendOutcome::Updated | AppendOutcome::Inserted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabularRow {
    pub url: String,
    pub id: u64,
    pub site: String,
    /// JSON-encoded snapshot text, empty for placeholders.
    pub snapshot_ai: String,
    pub snapshot_md: String,
    pub timestamp: String,
}

impl TabularRow {
    pub fn is_full(&self) -> bool {
        !self.snapshot_ai.is_empty()
    }

    /// Decoded snapshot text of a full row.
    pub fn snapshot_text(&self) -> Option<String> {
        if !self.is_full() {
            return None;
        }
        serde_json::from_str(&self.snapshot_ai).ok()
    }

    fn fields(&self) -> [String; 6] {
        [
            self.url.clone(),
            self.id.to_string(),
            self.site.clone(),
            self.snapshot_ai.clone(),
            self.snapshot_md.clone(),
            self.timestamp.clone(),
        ]
    }
}

struct Inner {
    writer: Option<Writer<File>>,
    ids: HashMap<String, u64>,
    hash_by_url: HashMap<String, String>,
    owner_by_hash: HashMap<String, String>,
    next_id: u64,
}

impl Inner {
    fn writer(&mut self, path: &Path) -> Result<&mut Writer<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| StoreError::Closed(path.display().to_string()))
    }

    /// Make `hash` the current content of `url`. A URL only owns the hash it
    /// currently holds, so the hash it moved away from is released.
    fn set_hash(&mut self, url: &str, hash: String) {
        if let Some(previous) = self.hash_by_url.insert(url.to_string(), hash.clone())
            && previous != hash
            && self.owner_by_hash.get(&previous).is_some_and(|owner| owner == url)
        {
            self.owner_by_hash.remove(&previous);
        }
        self.owner_by_hash.entry(hash).or_insert_with(|| url.to_string());
    }

    fn allocate(&mut self, url: &str) -> u64 {
        if let Some(id) = self.ids.get(url) {
            return *id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.ids.insert(url.to_string(), id);
        id
    }
}

pub struct TabularSink {
    path: PathBuf,
    inner: Mutex<Inner>,
}

fn row_writer(file: File) -> Writer<File> {
    WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::Always)
        .from_writer(file)
}

/// Every parseable row of a tabular file, in file order.
pub fn read_rows(path: &Path) -> Result<Vec<TabularRow>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or_default().to_string();
        let Ok(id) = field(1).parse::<u64>() else {
            debug!("Skipping malformed row: {:?}", record);
            continue;
        };
        rows.push(TabularRow {
            url: field(0),
            id,
            site: field(2),
            snapshot_ai: field(3),
            snapshot_md: field(4),
            timestamp: field(5),
        });
    }
    Ok(rows)
}

fn parse_timestamp(ts: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(ts).ok()
}

/// Index of the row to keep for each URL: newest timestamp, then a full row
/// over a placeholder, then the later row.
fn choose_rows(rows: &[TabularRow]) -> HashMap<&str, usize> {
    let mut chosen: HashMap<&str, usize> = HashMap::new();
    for (idx, row) in rows.iter().enumerate() {
        let key = (parse_timestamp(&row.timestamp), row.is_full(), idx);
        match chosen.get(row.url.as_str()) {
            Some(&best) => {
                let current = &rows[best];
                let best_key = (parse_timestamp(&current.timestamp), current.is_full(), best);
                if key >= best_key {
                    chosen.insert(&row.url, idx);
                }
            }
            None => {
                chosen.insert(&row.url, idx);
            }
        }
    }
    chosen
}

impl TabularSink {
    /// Open (or create) the file at `path`, replaying any existing rows.
    pub fn open(path: &Path, clear: bool) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        if clear && path.exists() {
            info!("Clearing existing output {}", path.display());
            fs::remove_file(path)?;
        }

        let rows = read_rows(path)?;
        let mut inner = Inner {
            writer: None,
            ids: HashMap::new(),
            hash_by_url: HashMap::new(),
            owner_by_hash: HashMap::new(),
            next_id: 1,
        };
        for row in &rows {
            inner.ids.entry(row.url.clone()).or_insert(row.id);
            inner.next_id = inner.next_id.max(row.id + 1);
            if let Some(text) = row.snapshot_text() {
                inner.set_hash(&row.url, content_hash(&text));
            }
        }
        if !rows.is_empty() {
            info!(rows = rows.len(), urls = inner.ids.len(), "Resuming tabular output");
        }

        let needs_header = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if needs_header {
            file.write_all(HEADER_LINE.as_bytes())?;
            file.flush()?;
        }
        inner.writer = Some(row_writer(file));

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(inner),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a full row for `state` unless its content is already on file.
    pub async fn append_node_dedup(&self, state: &PageState) -> Result<AppendOutcome> {
        let url = state.url();
        let hash = content_hash(&state.snapshot_text);
        let mut inner = self.inner.lock().await;

        if let Some(owner) = inner.owner_by_hash.get(&hash)
            && *owner != url
        {
            debug!(url = %url, owner = %owner, "Skipping row, content already stored for another URL");
            return Ok(AppendOutcome::GlobalDuplicate);
        }
        let outcome = match inner.hash_by_url.get(&url) {
            Some(existing) if *existing == hash => return Ok(AppendOutcome::Unchanged),
            Some(_) => AppendOutcome::Updated,
            None => AppendOutcome::Inserted,
        };

        let row = TabularRow {
            id: inner.allocate(&url),
            url: url.clone(),
            site: state.site.clone(),
            snapshot_ai: serde_json::to_string(&state.snapshot_text)?,
            snapshot_md: serde_json::to_string(&render_markdown(&state.snapshot_text))?,
            timestamp: now_timestamp(),
        };
        let writer = inner.writer(&self.path)?;
        writer.write_record(row.fields())?;
        writer.flush()?;

        inner.set_hash(&url, hash);
        debug!(url = %row.url, id = row.id, outcome = ?outcome, "Appended row");
        Ok(outcome)
    }

    /// Append a placeholder row for a URL that has no id yet.
    pub async fn append_url_only(&self, url: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.ids.contains_key(url) {
            return Ok(false);
        }

        let (site, _) = site_and_route(url);
        let row = TabularRow {
            id: inner.allocate(url),
            url: url.to_string(),
            site,
            snapshot_ai: String::new(),
            snapshot_md: String::new(),
            timestamp: now_timestamp(),
        };
        let writer = inner.writer(&self.path)?;
        writer.write_record(row.fields())?;
        writer.flush()?;
        Ok(true)
    }

    pub async fn row_count(&self) -> usize {
        self.inner.lock().await.ids.len()
    }

    /// Flush and compact the file to one row per URL. The rewrite goes to a
    /// sibling file that is renamed over the original.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(mut writer) = inner.writer.take() else {
            return Ok(());
        };
        writer.flush()?;
        drop(writer);

        let rows = read_rows(&self.path)?;
        let chosen = choose_rows(&rows);
        let keep: Vec<&TabularRow> = rows
            .iter()
            .enumerate()
            .filter(|(idx, row)| chosen.get(row.url.as_str()) == Some(idx))
            .map(|(_, row)| row)
            .collect();

        let tmp = self.path.with_extension("csv.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(HEADER_LINE.as_bytes())?;
            let mut writer = row_writer(file);
            for row in &keep {
                writer.write_record(row.fields())?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;

        info!(
            before = rows.len(),
            after = keep.len(),
            "Compacted {}",
            self.path.display()
        );
        Ok(())
    }
}
