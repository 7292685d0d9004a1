//! Single-page deep discovery.
//!
//! Menus, accordions and tabs often reveal new controls or links without a
//! URL change. The explorer clicks through them recursively on one page,
//! diffing snapshots to find what each click revealed.

use crate::browser::{LoadState, Page, Target, Timeouts};
use crate::error::Result;
use crate::extract::{self, Interaction};
use crate::session::SessionContext;
use crate::signature::{ElementSignature, clickable_signatures};
use crate::snapshot::capture;
use crate::url::{is_internal, is_internal_subtree, normalize, resolve};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub type DiscoveredCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type StopPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Roles the explorer clicks. Links are harvested through their hrefs.
const CLICK_ROLES: [&str; 3] = ["button", "tab", "menuitem"];

const AUTH_SENSITIVE: [&str; 5] = ["signout", "logout", "signin", "login", "forgotyourpassword"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PathStep {
    role: String,
    name: Option<String>,
}

impl PathStep {
    fn target(&self) -> Target {
        Target::role(&self.role, self.name.as_deref())
    }
}

/// What one exploration found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exploration {
    /// Newly found internal URLs, in discovery order.
    pub discovered: Vec<String>,
    pub clicks: usize,
    pub stopped: bool,
}

/// Signature sets one recursion level works against. Candidates already
/// present before the click that opened the level are `inherited` and
/// skipped; what a click reveals is measured against `known`.
#[derive(Clone, Copy)]
struct Baseline<'s> {
    inherited: &'s HashSet<ElementSignature>,
    known: &'s HashSet<ElementSignature>,
}

#[derive(Default)]
struct Run {
    seen: HashSet<String>,
    result: Exploration,
}

/// Labels that would change the authentication state if clicked.
pub fn is_auth_sensitive(label: &str) -> bool {
    let squashed: String = label
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    AUTH_SENSITIVE.iter().any(|p| squashed.contains(p))
}

pub struct ClickExplorer<'a> {
    page: &'a dyn Page,
    session: &'a SessionContext,
    base_url: String,
    timeouts: Timeouts,
    subtree: bool,
    should_stop: Option<StopPredicate>,
    on_discovered: Option<DiscoveredCallback>,
}

impl<'a> ClickExplorer<'a> {
    pub fn new(page: &'a dyn Page, session: &'a SessionContext, base_url: &str, timeouts: Timeouts) -> Self {
        Self {
            page,
            session,
            base_url: base_url.to_string(),
            timeouts,
            subtree: false,
            should_stop: None,
            on_discovered: None,
        }
    }

    pub fn with_subtree(mut self, subtree: bool) -> Self {
        self.subtree = subtree;
        self
    }

    pub fn with_stop_predicate(mut self, predicate: StopPredicate) -> Self {
        self.should_stop = Some(predicate);
        self
    }

    pub fn with_discovered_callback(mut self, callback: DiscoveredCallback) -> Self {
        self.on_discovered = Some(callback);
        self
    }

    /// Explore the page as it currently stands. `snapshot` must be a capture
    /// of that state; `known_urls` are never reported as discoveries.
    pub async fn explore(&self, snapshot: &str, known_urls: &HashSet<String>) -> Result<Exploration> {
        let root = normalize(&self.page.url().await?);
        let base_sigs = clickable_signatures(snapshot);
        let mut base_urls = known_urls.clone();
        base_urls.extend(extract::extract_internal_urls(snapshot, &root, &self.base_url));

        let mut run = Run {
            seen: base_urls.clone(),
            ..Run::default()
        };

        let flow = self
            .explore_level(
                &mut run,
                snapshot.to_string(),
                &base_urls,
                Baseline {
                    inherited: &base_sigs,
                    known: &base_sigs,
                },
                &[],
                0,
                &root,
            )
            .await?;
        run.result.stopped = flow == Flow::Stop;

        info!(
            root = %root,
            discovered = run.result.discovered.len(),
            clicks = run.result.clicks,
            "Click exploration finished"
        );
        Ok(run.result)
    }

    fn in_scope(&self, url: &str) -> bool {
        if self.subtree {
            is_internal_subtree(url, &self.base_url)
        } else {
            is_internal(url, &self.base_url)
        }
    }

    fn stop_requested(&self) -> bool {
        self.should_stop.as_ref().is_some_and(|stop| stop())
    }

    fn record(&self, run: &mut Run, url: &str) {
        if run.seen.insert(url.to_string()) {
            info!(url = %url, "Discovered URL");
            run.result.discovered.push(url.to_string());
            if let Some(cb) = &self.on_discovered {
                cb(url);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn explore_level<'b>(
        &'b self,
        run: &'b mut Run,
        snapshot: String,
        base_urls: &'b HashSet<String>,
        sigs: Baseline<'b>,
        path: &'b [PathStep],
        level: usize,
        root: &'b str,
    ) -> BoxFuture<'b, Result<Flow>> {
        Box::pin(async move {
            let candidates: Vec<Interaction> = extract::parse(&snapshot)
                .into_iter()
                .filter(|i| CLICK_ROLES.contains(&i.role.as_str()))
                .collect();
            debug!(level, candidates = candidates.len(), path = ?path, "Exploring level");

            for (idx, it) in candidates.iter().enumerate() {
                if self.stop_requested() {
                    info!(level, "Stop requested, ending exploration");
                    return Ok(Flow::Stop);
                }

                let label = it.name.as_deref().unwrap_or_default();
                let sig = ElementSignature::new(&it.role, it.name.as_deref());
                debug!(level, sig = %sig, idx = idx + 1, total = candidates.len(), "Trying candidate");

                if level > 0 && sigs.inherited.contains(&sig) {
                    debug!(level, sig = %sig, reason = "inherited", "Skipping candidate");
                    continue;
                }
                if !self.session.try_reserve_signature(&sig) {
                    debug!(level, sig = %sig, reason = "already attempted", "Skipping candidate");
                    continue;
                }
                if is_auth_sensitive(label) {
                    info!(level, sig = %sig, reason = "auth", "Skipping candidate");
                    continue;
                }

                if let Some(href) = &it.href
                    && let Some(absolute) = resolve(href, root)
                {
                    let absolute = normalize(&absolute);
                    if self.in_scope(&absolute) && !base_urls.contains(&absolute) {
                        self.record(run, &absolute);
                    }
                    continue;
                }

                let target = Target::role(&it.role, it.name.as_deref());
                if let Err(e) = self.page.wait_for_visible(&target, self.timeouts.locate).await {
                    if e.is_session_closed() {
                        return Err(e);
                    }
                    warn!(level, element = %target, "Element not available: {}", e);
                    self.restore(root, path, false).await?;
                    continue;
                }

                let before = self.page.url().await?;
                let (clicked, changed) = tokio::join!(
                    self.page.click(&target, self.timeouts.action),
                    self.page.wait_for_url_change(&before, self.timeouts.url_change)
                );
                if let Err(e) = clicked {
                    if e.is_session_closed() {
                        return Err(e);
                    }
                    warn!(level, element = %target, "Click failed: {}", e);
                    self.restore(root, path, false).await?;
                    continue;
                }
                run.result.clicks += 1;

                let changed = match changed {
                    Ok(changed) => changed,
                    Err(e) if e.is_session_closed() => return Err(e),
                    Err(_) => None,
                };
                if let Some(new_url) = &changed {
                    let new_url = normalize(new_url);
                    info!(level, url = %new_url, "URL changed after click");
                    if self.in_scope(&new_url) {
                        self.record(run, &new_url);
                    }
                    if let Err(e) = self
                        .page
                        .wait_for_load_state(LoadState::DomContentLoaded, self.timeouts.dom_ready)
                        .await
                        && e.is_session_closed()
                    {
                        return Err(e);
                    }
                }

                let after = capture(self.page, level, &self.timeouts).await?;
                let after_url = after.url();
                let new_urls: Vec<String> =
                    extract::extract_internal_urls(&after.snapshot_text, &after_url, &self.base_url)
                        .into_iter()
                        .filter(|u| !base_urls.contains(u) && self.in_scope(u))
                        .collect();
                for url in &new_urls {
                    self.record(run, url);
                }
                if self.stop_requested() {
                    info!(level, "Stop requested, ending recursion");
                    return Ok(Flow::Stop);
                }

                let after_sigs = clickable_signatures(&after.snapshot_text);
                let novel = after_sigs.difference(sigs.known).count();
                debug!(level, novel, "Clickable elements revealed by click");

                if changed.is_some() {
                    self.restore(root, path, true).await?;
                } else if novel > 0 {
                    let child_known: HashSet<ElementSignature> =
                        sigs.known.union(&after_sigs).cloned().collect();
                    let mut child_urls = base_urls.clone();
                    child_urls.extend(new_urls);
                    let mut child_path = path.to_vec();
                    child_path.push(PathStep {
                        role: it.role.clone(),
                        name: it.name.clone(),
                    });

                    let flow = self
                        .explore_level(
                            run,
                            after.snapshot_text,
                            &child_urls,
                            Baseline {
                                inherited: sigs.known,
                                known: &child_known,
                            },
                            &child_path,
                            level + 1,
                            root,
                        )
                        .await?;
                    if flow == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                    if level == 0 {
                        self.restore(root, path, true).await?;
                    }
                }
            }

            Ok(Flow::Continue)
        })
    }

    /// Bring the page back to the state this level started from: the root
    /// URL, plus a replay of the clicks that opened the current level.
    async fn restore(&self, root: &str, path: &[PathStep], force: bool) -> Result<()> {
        if path.is_empty() {
            let current = normalize(&self.page.url().await?);
            if !force && current == root {
                return Ok(());
            }
        }

        debug!(root = %root, replay = path.len(), "Restoring page state");
        if let Err(e) = self.page.goto(root, self.timeouts.navigation).await {
            if e.is_session_closed() {
                return Err(e);
            }
            warn!(root = %root, "Failed to reload root: {}", e);
        }
        sleep(self.timeouts.restore_pause).await;

        for step in path {
            let target = step.target();
            let replay = async {
                self.page.wait_for_visible(&target, self.timeouts.locate).await?;
                self.page.click(&target, self.timeouts.action).await
            };
            if let Err(e) = replay.await {
                if e.is_session_closed() {
                    return Err(e);
                }
                warn!(element = %target, "Failed to replay click: {}", e);
                break;
            }
            sleep(self.timeouts.restore_pause).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_sensitive_labels() {
        assert!(is_auth_sensitive("Sign Out"));
        assert!(is_auth_sensitive("Log in"));
        assert!(is_auth_sensitive("LOGOUT"));
        assert!(is_auth_sensitive("Forgot your password?"));
        assert!(!is_auth_sensitive("Open Menu"));
        assert!(!is_auth_sensitive(""));
    }
}
