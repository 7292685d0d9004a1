//! Turns parsed command-line arguments into run options.

use crate::handlers::load_urls_from_source;
use anyhow::{Result, bail};
use clap::ArgMatches;
use stategraph_core::crawl::CrawlOptions;
use stategraph_scanner::browser::Timeouts;
use stategraph_scanner::login::Credentials;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Expand `~` and environment variables in a user-supplied path.
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
    }
}

fn optional<'a, T: Clone + Send + Sync + 'static>(matches: &'a ArgMatches, id: &str) -> Option<&'a T> {
    matches.try_get_one::<T>(id).ok().flatten()
}

fn flag(matches: &ArgMatches, id: &str) -> bool {
    optional::<bool>(matches, id).copied().unwrap_or(false)
}

fn credentials(matches: &ArgMatches) -> Result<Option<Credentials>> {
    match (
        optional::<String>(matches, "user"),
        optional::<String>(matches, "password"),
    ) {
        (Some(username), Some(password)) => Ok(Some(Credentials {
            username: username.clone(),
            password: password.clone(),
        })),
        (None, None) => Ok(None),
        _ => bail!("--user and --password must be given together"),
    }
}

/// Build run options from a `crawl` or `collect` subcommand's matches.
pub fn options_from_matches(matches: &ArgMatches) -> Result<CrawlOptions> {
    let urls: Vec<Url> = matches
        .try_get_many::<Url>("url")
        .ok()
        .flatten()
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let targets_file = optional::<PathBuf>(matches, "targets-file");
    let urls = load_urls_from_source(&urls, targets_file)?;

    let output = optional::<String>(matches, "output")
        .map(|raw| expand_path(raw))
        .unwrap_or_else(|| PathBuf::from(crate::commands::DEFAULT_CRAWL_OUTPUT));

    let timeout_ms = optional::<u64>(matches, "timeout-ms")
        .copied()
        .unwrap_or(Timeouts::DEFAULT_ACTION_MS);
    let settle_ms = optional::<u64>(matches, "settle-ms").copied().unwrap_or(1500);
    let timeouts =
        Timeouts::from_action(Duration::from_millis(timeout_ms)).with_settle(Duration::from_millis(settle_ms));

    let mut options = CrawlOptions::new(urls, output);
    options.login_url = optional::<Url>(matches, "login-url").map(|u| u.to_string());
    options.credentials = credentials(matches)?;
    options.headful = flag(matches, "headful");
    options.graph_db = optional::<String>(matches, "graph-db").map(|raw| expand_path(raw));
    options.clear = flag(matches, "clear");
    options.subtree = flag(matches, "subtree");
    options.timeouts = timeouts;

    if let Some(depth) = optional::<usize>(matches, "max-depth") {
        options.max_depth = *depth;
    }
    if let Some(states) = optional::<usize>(matches, "max-states") {
        options.max_states = *states;
    }
    if let Some(parallel) = optional::<usize>(matches, "parallel") {
        options.parallel = *parallel;
    }
    options.exhaustive = flag(matches, "exhaustive");
    options.link_known_states = flag(matches, "link-known-states");
    options.max_urls = optional::<usize>(matches, "max-urls").copied();

    if options.login_url.is_some() && options.credentials.is_none() {
        bail!("--login-url needs --user and --password");
    }
    Ok(options)
}
