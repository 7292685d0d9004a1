use crate::config::options_from_matches;
use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use colored::Colorize;
use stategraph_core::crawl::CrawlOptions;
use stategraph_scanner::browser::Browser;
use stategraph_scanner::driver::HttpBrowser;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use url::Url;

// Re-export crawl types and functions from stategraph-core
pub use stategraph_core::crawl::{
    CrawlProgressCallback, execute_collect, execute_crawl, extract_url_path, generate_collect_report,
    generate_crawl_report,
};

// Helper functions for the run handlers

/// Load URLs from either a file or the `--url` arguments
pub fn load_urls_from_source(urls: &[Url], targets_file: Option<&PathBuf>) -> Result<Vec<String>> {
    if let Some(path) = targets_file {
        load_urls_from_file(path)
    } else if !urls.is_empty() {
        Ok(urls.iter().map(|u| u.as_str().to_string()).collect())
    } else {
        bail!("Either --url or --targets-file must be provided")
    }
}

/// Load and parse URLs from a file, skipping blank lines and `#` comments
pub fn load_urls_from_file(path: &PathBuf) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read targets file {}", path.display()))?;

    let urls: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_url_line)
        .collect();

    if urls.is_empty() {
        bail!("No valid URLs found in {}", path.display());
    }

    Ok(urls)
}

/// Parse a single line as a URL, trying to add http:// if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    if let Ok(url) = Url::parse(line)
        && matches!(url.scheme(), "http" | "https")
    {
        return Some(line.to_string());
    }

    // Try adding http://
    let with_scheme = format!("http://{}", line);
    if let Ok(url) = Url::parse(&with_scheme)
        && url.host_str().is_some_and(|h| !h.is_empty())
    {
        return Some(with_scheme);
    }

    warn!("Skipping invalid URL '{}'", line);
    None
}

fn start_browser(options: &CrawlOptions) -> Result<Arc<dyn Browser>> {
    if options.headful {
        warn!("The HTTP driver has no window; --headful is ignored");
    }
    let browser = HttpBrowser::new(options.timeouts.action).context("Failed to start the HTTP driver")?;
    Ok(Arc::new(browser))
}

fn print_run_header(verb: &str, options: &CrawlOptions) {
    println!("\n{} {} target(s)", verb.bright_white().bold(), options.urls.len());
    if let Some(credentials) = &options.credentials {
        println!("Login: {}", credentials.username);
    }
    println!("Output: {}", options.output.display());
    if let Some(db) = &options.graph_db {
        println!("Graph database: {}", db.display());
    }
}

fn progress_printer() -> CrawlProgressCallback {
    Arc::new(|msg: String| {
        println!("{}", msg);
    })
}

pub async fn handle_crawl(sub_matches: &ArgMatches, quiet: bool) -> Result<()> {
    let mut options = options_from_matches(sub_matches)?;
    options.show_progress_bars = !quiet;

    if !quiet {
        print_run_header("Crawling", &options);
        if options.exhaustive {
            println!("Mode: exhaustive");
        } else {
            println!("Max depth: {}", options.max_depth);
            println!("Max states: {}", options.max_states);
        }
        println!("Parallel: {}\n", options.parallel);
    }

    let browser = start_browser(&options)?;
    let report = execute_crawl(options, browser, Some(progress_printer()))
        .await
        .context("Crawl failed")?;

    if !quiet {
        println!("\n{} Crawl complete!\n", "✓".green().bold());
        print!("{}", generate_crawl_report(&report));
    }
    if !report.failures.is_empty() && report.targets.is_empty() {
        bail!("Every target failed");
    }
    Ok(())
}

pub async fn handle_collect(sub_matches: &ArgMatches, quiet: bool) -> Result<()> {
    let mut options = options_from_matches(sub_matches)?;
    options.show_progress_bars = !quiet;

    if !quiet {
        print_run_header("Collecting URLs from", &options);
        if let Some(max) = options.max_urls {
            println!("Max URLs: {}", max);
        }
        println!();
    }

    let browser = start_browser(&options)?;
    let report = execute_collect(options, browser, Some(progress_printer()))
        .await
        .context("URL collection failed")?;

    if !quiet {
        println!("\n{} Collection complete!\n", "✓".green().bold());
        print!("{}", generate_collect_report(&report));
    }
    if !report.failures.is_empty() && report.targets.is_empty() {
        bail!("Every target failed");
    }
    Ok(())
}
