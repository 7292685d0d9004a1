use crate::browser::{LoadState, Page, Timeouts};
use crate::error::Result;
use crate::url::{build_url, site_and_route};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::sleep;
use tracing::{debug, warn};

/// One captured UI state. Identity is the content hash, not the URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageState {
    pub site: String,
    pub route: String,
    pub snapshot_text: String,
    pub snapshot_hash: String,
    pub depth: usize,
    pub timestamp: String,
}

impl PageState {
    pub fn new(url: &str, snapshot_text: String, depth: usize) -> Self {
        let (site, route) = site_and_route(url);
        Self {
            site,
            route,
            snapshot_hash: content_hash(&snapshot_text),
            snapshot_text,
            depth,
            timestamp: now_timestamp(),
        }
    }

    pub fn url(&self) -> String {
        if self.site.is_empty() {
            return self.route.clone();
        }
        build_url(&self.site, &self.route)
    }
}

/// Lowercase hex SHA-256 of the snapshot text.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Capture the page as it currently stands.
///
/// An empty dump is retried once after a longer idle wait and then accepted
/// as is. Only a closed session is an error.
pub async fn capture(page: &dyn Page, depth: usize, timeouts: &Timeouts) -> Result<PageState> {
    wait_quietly(page, LoadState::NetworkIdle, timeouts).await?;
    sleep(timeouts.settle).await;

    let mut text = read_snapshot(page).await?;
    if text.trim().is_empty() {
        debug!("Empty snapshot, retrying after a longer idle wait");
        if let Err(e) = page
            .wait_for_load_state(LoadState::NetworkIdle, timeouts.network_idle * 2)
            .await
            && e.is_session_closed()
        {
            return Err(e);
        }
        sleep(timeouts.settle).await;
        text = read_snapshot(page).await?;
    }

    let url = page.url().await?;
    Ok(PageState::new(&url, text, depth))
}

async fn wait_quietly(page: &dyn Page, state: LoadState, timeouts: &Timeouts) -> Result<()> {
    match page.wait_for_load_state(state, timeouts.network_idle).await {
        Err(e) if e.is_session_closed() => Err(e),
        _ => Ok(()),
    }
}

async fn read_snapshot(page: &dyn Page) -> Result<String> {
    match page.snapshot().await {
        Ok(text) => Ok(text),
        Err(e) if e.is_session_closed() => Err(e),
        Err(e) => {
            warn!("Snapshot read failed: {}", e);
            Ok(String::new())
        }
    }
}

/// Markdown view of a snapshot: markers dropped, `/url:` children folded into
/// links on their parent line.
pub fn render_markdown(snapshot: &str) -> String {
    let lines: Vec<&str> = snapshot.lines().collect();
    let mut out = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        let raw = lines[i];
        let indent = raw.len() - raw.trim_start().len();
        let body = raw.trim().trim_start_matches('-').trim();
        i += 1;

        if body.is_empty() || is_url_line(body) {
            continue;
        }

        let label = strip_markers(body);
        let mut link = None;
        if let Some(next) = lines.get(i) {
            let next_indent = next.len() - next.trim_start().len();
            let next_body = next.trim().trim_start_matches('-').trim();
            if next_indent > indent && is_url_line(next_body) {
                link = next_body
                    .split_once(':')
                    .map(|(_, v)| v.trim().trim_matches('"').to_string());
            }
        }

        let pad = "  ".repeat(indent / 2);
        let line = match link {
            Some(href) => format!("{}- [{}]({})", pad, label, href),
            None => format!("{}- {}", pad, label),
        };
        out.push(line);
    }

    out.join("\n")
}

fn is_url_line(body: &str) -> bool {
    body.starts_with("/url:") || body.starts_with("href:")
}

fn strip_markers(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut depth = 0usize;
    for c in body.chars() {
        match c {
            '[' => depth += 1,
            ']' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.trim().trim_end_matches(':').trim().to_string()
}
