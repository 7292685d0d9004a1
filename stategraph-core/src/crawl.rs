use crate::data::Database;
use crate::error::Result;
use crate::graph::{GraphStore, MemoryGraphStore, PageRecord, SessionStatus};
use crate::sink::Persistence;
use crate::tabular::TabularSink;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use stategraph_scanner::browser::{Browser, Timeouts};
use stategraph_scanner::collector::{CollectSettings, UrlCollector};
use stategraph_scanner::login::Credentials;
use stategraph_scanner::orchestrator::{CrawlOrchestrator, CrawlSettings, ProgressCallback};
use stategraph_scanner::result::{CollectSummary, CrawlSummary, StopReason};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

const DIVIDER: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n";

/// Options for configuring a crawl or collect run
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub urls: Vec<String>,
    pub login_url: Option<String>,
    pub credentials: Option<Credentials>,
    pub max_depth: usize,
    pub max_states: usize,
    pub parallel: usize,
    pub exhaustive: bool,
    pub subtree: bool,
    pub link_known_states: bool,
    pub headful: bool,
    pub timeouts: Timeouts,
    pub output: PathBuf,
    /// SQLite graph database. Without one the graph is kept in memory.
    pub graph_db: Option<PathBuf>,
    pub clear: bool,
    pub max_urls: Option<usize>,
    pub show_progress_bars: bool,
}

impl CrawlOptions {
    pub fn new(urls: Vec<String>, output: PathBuf) -> Self {
        Self {
            urls,
            login_url: None,
            credentials: None,
            max_depth: 20,
            max_states: 10_000,
            parallel: 8,
            exhaustive: false,
            subtree: false,
            link_known_states: false,
            headful: false,
            timeouts: Timeouts::default(),
            output,
            graph_db: None,
            clear: false,
            max_urls: None,
            show_progress_bars: false,
        }
    }

    /// Effective configuration as JSON, without the password.
    pub fn configuration_json(&self) -> String {
        json!({
            "urls": self.urls,
            "login_url": self.login_url,
            "username": self.credentials.as_ref().map(|c| c.username.clone()),
            "max_depth": self.max_depth,
            "max_states": self.max_states,
            "parallel": self.parallel,
            "exhaustive": self.exhaustive,
            "subtree": self.subtree,
            "link_known_states": self.link_known_states,
            "headful": self.headful,
            "timeout_ms": self.timeouts.action.as_millis() as u64,
            "settle_ms": self.timeouts.settle.as_millis() as u64,
            "output": self.output.display().to_string(),
            "graph_db": self.graph_db.as_ref().map(|p| p.display().to_string()),
            "clear": self.clear,
            "max_urls": self.max_urls,
        })
        .to_string()
    }

    fn crawl_settings(&self, url: &str) -> CrawlSettings {
        let mut settings = CrawlSettings::new(url)
            .with_max_depth(self.max_depth)
            .with_max_states(self.max_states)
            .with_parallelism(self.parallel)
            .with_exhaustive(self.exhaustive)
            .with_subtree(self.subtree)
            .with_link_known_states(self.link_known_states)
            .with_timeouts(self.timeouts);
        if let Some(credentials) = &self.credentials {
            settings = settings.with_login(self.login_url.clone(), credentials.clone());
        }
        settings
    }

    fn collect_settings(&self, url: &str) -> CollectSettings {
        let mut settings = CollectSettings::new(url)
            .with_max_urls(self.max_urls)
            .with_subtree(self.subtree)
            .with_timeouts(self.timeouts);
        if let Some(credentials) = &self.credentials {
            settings = settings.with_login(self.login_url.clone(), credentials.clone());
        }
        settings
    }
}

/// Callback for reporting per-target progress
pub type CrawlProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub targets: Vec<(String, CrawlSummary)>,
    pub failures: Vec<(String, String)>,
    pub pages: Vec<PageRecord>,
    pub edges: usize,
    pub rows_written: usize,
    pub output: PathBuf,
    pub session_id: Option<String>,
}

impl CrawlReport {
    pub fn total_states(&self) -> usize {
        self.targets.iter().map(|(_, s)| s.states).sum()
    }
}

#[derive(Debug, Clone)]
pub struct CollectReport {
    pub targets: Vec<(String, CollectSummary)>,
    pub failures: Vec<(String, String)>,
    pub rows_written: usize,
    pub output: PathBuf,
    pub session_id: Option<String>,
}

/// Extract the path component from a URL
pub fn extract_url_path(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| {
            let path = u.path().to_string();
            if path.is_empty() || path == "/" {
                "/".to_string()
            } else {
                path
            }
        })
        .unwrap_or_else(|| url.to_string())
}

fn spinner(show: bool, message: &str) -> Option<Arc<ProgressBar>> {
    if !show {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message.to_string());
    Some(Arc::new(pb))
}

/// Open the tabular file and the graph store behind one sink.
fn open_persistence(options: &CrawlOptions) -> Result<Persistence> {
    let tabular = Arc::new(TabularSink::open(&options.output, options.clear)?);
    let store: Box<dyn GraphStore> = match &options.graph_db {
        Some(path) => match Database::new(path) {
            Ok(db) => Box::new(db),
            Err(e) => {
                warn!(
                    "Graph database {} unavailable, keeping the graph in memory: {}",
                    path.display(),
                    e
                );
                Box::new(MemoryGraphStore::new())
            }
        },
        None => Box::new(MemoryGraphStore::new()),
    };
    let persistence = Persistence::new(tabular).with_graph(store);
    persistence.init_graph(options.clear);
    Ok(persistence)
}

fn seed_json(urls: &[String]) -> String {
    serde_json::to_string(urls).unwrap_or_else(|_| "[]".to_string())
}

fn session_status(failures: &[(String, String)], total: usize, reasons: &[StopReason]) -> SessionStatus {
    if total > 0 && failures.len() == total {
        SessionStatus::Failed
    } else if reasons.contains(&StopReason::StopRequested) {
        SessionStatus::Cancelled
    } else {
        SessionStatus::Completed
    }
}

fn join_reasons(reasons: &[StopReason]) -> Option<String> {
    if reasons.is_empty() {
        return None;
    }
    Some(reasons.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(", "))
}

/// Crawl every target URL into one state graph and tabular file.
///
/// Targets are crawled one after another with a shared browser. A target that
/// fails is reported and skipped; the tabular file is compacted and the
/// browser closed whatever the outcome.
pub async fn execute_crawl(
    options: CrawlOptions,
    browser: Arc<dyn Browser>,
    progress_callback: Option<CrawlProgressCallback>,
) -> Result<CrawlReport> {
    let persistence = Arc::new(open_persistence(&options)?);
    let session_id = persistence.begin_session("crawl", &seed_json(&options.urls), &options.configuration_json());

    let progress_bar = spinner(options.show_progress_bars, "Starting crawl...");
    let expanded = Arc::new(AtomicUsize::new(0));
    let internal_progress: ProgressCallback = match &progress_bar {
        Some(pb) => {
            let pb = pb.clone();
            let expanded = expanded.clone();
            Arc::new(move |states: usize, url: String| {
                let count = expanded.fetch_add(1, Ordering::Relaxed) + 1;
                pb.set_message(format!(
                    "Crawling... {} states expanded, {} stored: {}",
                    count,
                    states,
                    extract_url_path(&url)
                ));
            })
        }
        None => {
            let expanded = expanded.clone();
            Arc::new(move |_states: usize, _url: String| {
                expanded.fetch_add(1, Ordering::Relaxed);
            })
        }
    };

    let mut targets = Vec::new();
    let mut failures = Vec::new();
    let mut fatal = None;
    for (idx, url) in options.urls.iter().enumerate() {
        if let Some(callback) = &progress_callback
            && options.urls.len() > 1
        {
            callback(format!("Crawling target {}/{}: {}", idx + 1, options.urls.len(), url));
        }

        let orchestrator = CrawlOrchestrator::new(browser.clone(), persistence.clone(), options.crawl_settings(url))
            .with_progress_callback(internal_progress.clone());
        match orchestrator.run().await {
            Ok(summary) => {
                let stopped = summary.stop_reason == StopReason::SessionClosed;
                targets.push((url.clone(), summary));
                if stopped {
                    warn!("Browser session closed, skipping remaining targets");
                    break;
                }
            }
            Err(e) => {
                if let Some(callback) = &progress_callback {
                    callback(format!("[!]  Failed to crawl {}: {}", url, e));
                }
                warn!(url = %url, "Crawl failed: {}", e);
                failures.push((url.clone(), e.to_string()));
                if matches!(e, stategraph_scanner::ScanError::Persistence(_)) {
                    fatal = Some(e);
                    break;
                }
            }
        }
    }

    if let Err(e) = browser.close().await {
        warn!("Closing browser failed: {}", e);
    }
    let closed = persistence.close().await;

    let reasons: Vec<StopReason> = targets.iter().map(|(_, s)| s.stop_reason).collect();
    if let Some(id) = &session_id {
        let status = if fatal.is_some() || closed.is_err() {
            SessionStatus::Failed
        } else {
            session_status(&failures, options.urls.len(), &reasons)
        };
        persistence.end_session(id, status, join_reasons(&reasons).as_deref());
    }
    let (pages, edges) = persistence.graph_summary().unwrap_or_default();

    if let Some(pb) = &progress_bar {
        pb.finish_with_message(format!(
            "Crawl complete! {} states expanded",
            expanded.load(Ordering::Relaxed)
        ));
    }
    if let Some(e) = fatal {
        return Err(e.into());
    }
    closed?;

    let report = CrawlReport {
        targets,
        failures,
        pages,
        edges,
        rows_written: persistence.rows_written(),
        output: options.output.clone(),
        session_id,
    };
    info!(
        states = report.total_states(),
        rows = report.rows_written,
        "Crawl finished, output written to {}",
        report.output.display()
    );
    Ok(report)
}

/// Collect internal URLs for every target into the tabular file.
pub async fn execute_collect(
    options: CrawlOptions,
    browser: Arc<dyn Browser>,
    progress_callback: Option<CrawlProgressCallback>,
) -> Result<CollectReport> {
    let persistence = Arc::new(open_persistence(&options)?);
    let session_id = persistence.begin_session("collect", &seed_json(&options.urls), &options.configuration_json());

    let progress_bar = spinner(options.show_progress_bars, "Starting collection...");
    let internal_progress: ProgressCallback = match &progress_bar {
        Some(pb) => {
            let pb = pb.clone();
            Arc::new(move |known: usize, url: String| {
                pb.set_message(format!("Collecting... {} URLs known: {}", known, extract_url_path(&url)));
            })
        }
        None => Arc::new(|_known: usize, _url: String| {}),
    };

    let mut targets = Vec::new();
    let mut failures = Vec::new();
    let mut fatal = None;
    for (idx, url) in options.urls.iter().enumerate() {
        if let Some(callback) = &progress_callback
            && options.urls.len() > 1
        {
            callback(format!("Collecting target {}/{}: {}", idx + 1, options.urls.len(), url));
        }

        let collector = UrlCollector::new(browser.clone(), persistence.clone(), options.collect_settings(url))
            .with_progress_callback(internal_progress.clone());
        match collector.run().await {
            Ok(summary) => {
                let stopped = summary.stop_reason == StopReason::SessionClosed;
                targets.push((url.clone(), summary));
                if stopped {
                    break;
                }
            }
            Err(e) => {
                if let Some(callback) = &progress_callback {
                    callback(format!("[!]  Failed to collect {}: {}", url, e));
                }
                warn!(url = %url, "Collection failed: {}", e);
                failures.push((url.clone(), e.to_string()));
                if matches!(e, stategraph_scanner::ScanError::Persistence(_)) {
                    fatal = Some(e);
                    break;
                }
            }
        }
    }

    if let Err(e) = browser.close().await {
        warn!("Closing browser failed: {}", e);
    }
    let closed = persistence.close().await;

    let reasons: Vec<StopReason> = targets.iter().map(|(_, s)| s.stop_reason).collect();
    if let Some(id) = &session_id {
        let status = if fatal.is_some() || closed.is_err() {
            SessionStatus::Failed
        } else {
            session_status(&failures, options.urls.len(), &reasons)
        };
        persistence.end_session(id, status, join_reasons(&reasons).as_deref());
    }

    if let Some(pb) = &progress_bar {
        let total: usize = targets.iter().map(|(_, s)| s.urls.len()).sum();
        pb.finish_with_message(format!("Collection complete! {} URLs", total));
    }
    if let Some(e) = fatal {
        return Err(e.into());
    }
    closed?;

    Ok(CollectReport {
        targets,
        failures,
        rows_written: persistence.rows_written(),
        output: options.output.clone(),
        session_id,
    })
}

fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Generate a crawl report
pub fn generate_crawl_report(report: &CrawlReport) -> String {
    let mut out = String::new();
    out.push_str(DIVIDER);
    out.push_str("# Summary:\n");
    out.push_str(&format!("  States visited: {}\n", report.total_states()));
    out.push_str(&format!("  States stored: {}\n", report.pages.len()));
    out.push_str(&format!("  Transitions stored: {}\n", report.edges));
    let pops: usize = report.targets.iter().map(|(_, s)| s.pops).sum();
    out.push_str(&format!("  States expanded: {}\n", pops));
    out.push_str(&format!("  Rows written: {}\n", report.rows_written));
    out.push_str(&format!("  Output: {}\n", report.output.display()));
    if let Some(id) = &report.session_id {
        out.push_str(&format!("  Session: {}\n", id));
    }
    for (url, summary) in &report.targets {
        out.push_str(&format!("  {} stopped: {}\n", url, summary.stop_reason.to_string().cyan()));
    }
    for (url, error) in &report.failures {
        out.push_str(&format!("  {} {}: {}\n", "failed".red(), url, error));
    }
    out.push_str(&format!("\n{}", DIVIDER));

    let mut by_host: BTreeMap<String, Vec<&PageRecord>> = BTreeMap::new();
    for page in &report.pages {
        by_host.entry(host_of(&page.url)).or_default().push(page);
    }

    for (host, pages) in &by_host {
        out.push_str(&format!("## {}\n", host));
        out.push_str(&format!("  {} states found\n\n", pages.len()));

        for page in pages {
            let depth = format!("[{}]", page.depth);
            let mut line = format!("  {} {}", depth.green(), extract_url_path(&page.url));
            if page.out_edges > 0 {
                line.push_str(&format!(" {}", format!("({} out)", page.out_edges).bright_black()));
            }
            line.push_str(&format!(" {}", &page.snapshot_hash[..page.snapshot_hash.len().min(12)]));
            out.push_str(&line);
            out.push('\n');
        }
        out.push('\n');
    }

    out
}

/// Generate a URL collection report
pub fn generate_collect_report(report: &CollectReport) -> String {
    let mut out = String::new();
    out.push_str(DIVIDER);
    out.push_str("# Summary:\n");
    let total: usize = report.targets.iter().map(|(_, s)| s.urls.len()).sum();
    let visited: usize = report.targets.iter().map(|(_, s)| s.visited).sum();
    let clicks: usize = report.targets.iter().map(|(_, s)| s.clicks).sum();
    out.push_str(&format!("  URLs collected: {}\n", total));
    out.push_str(&format!("  Pages visited: {}\n", visited));
    out.push_str(&format!("  Clicks: {}\n", clicks));
    out.push_str(&format!("  Rows written: {}\n", report.rows_written));
    out.push_str(&format!("  Output: {}\n", report.output.display()));
    for (url, summary) in &report.targets {
        out.push_str(&format!("  {} stopped: {}\n", url, summary.stop_reason.to_string().cyan()));
    }
    for (url, error) in &report.failures {
        out.push_str(&format!("  {} {}: {}\n", "failed".red(), url, error));
    }
    out.push_str(&format!("\n{}", DIVIDER));

    let mut by_host: BTreeMap<String, Vec<&String>> = BTreeMap::new();
    for (_, summary) in &report.targets {
        for url in &summary.urls {
            by_host.entry(host_of(url)).or_default().push(url);
        }
    }
    for (host, urls) in &by_host {
        out.push_str(&format!("## {}\n", host));
        out.push_str(&format!("  {} URLs found\n\n", urls.len()));
        for url in urls {
            out.push_str(&format!("  {}\n", extract_url_path(url)));
        }
        out.push('\n');
    }

    out
}
