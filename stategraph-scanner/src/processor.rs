use crate::browser::{Browser, Page, Target, Timeouts, wait_for_app_ready};
use crate::error::{Result, ScanError};
use crate::extract::{ActionType, Interaction, find_href_by_ref, find_role_and_name_by_ref};
use crate::result::Transition;
use crate::session::{SessionContext, TriedAction};
use crate::snapshot::{PageState, capture};
use crate::url::{is_internal, is_internal_subtree, normalize, resolve};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const CLICK_VISIBLE_TIMEOUT: Duration = Duration::from_secs(15);

enum Plan {
    Navigate(String),
    Click { role: String, name: Option<String> },
}

/// Resolves one candidate interaction into a state transition, each in its
/// own disposable page.
#[derive(Clone)]
pub struct InteractionProcessor {
    browser: Arc<dyn Browser>,
    session: Arc<SessionContext>,
    base_url: String,
    timeouts: Timeouts,
    subtree: bool,
}

impl InteractionProcessor {
    pub fn new(
        browser: Arc<dyn Browser>,
        session: Arc<SessionContext>,
        base_url: &str,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            browser,
            session,
            base_url: base_url.to_string(),
            timeouts,
            subtree: false,
        }
    }

    pub fn with_subtree(mut self, subtree: bool) -> Self {
        self.subtree = subtree;
        self
    }

    fn in_scope(&self, url: &str) -> bool {
        if self.subtree {
            is_internal_subtree(url, &self.base_url)
        } else {
            is_internal(url, &self.base_url)
        }
    }

    /// Returns the state reached from `from` by `interaction`, or `None` when
    /// the interaction cannot be resolved, was already attempted, or fails.
    /// Only a closed browser session is an error.
    pub async fn process(&self, from: &PageState, interaction: &Interaction) -> Result<Option<Transition>> {
        if self.browser.is_closed() {
            return Err(ScanError::SessionClosed("browser closed".to_string()));
        }

        let Some(plan) = self.plan(from, interaction) else {
            return Ok(None);
        };

        let page = match self.browser.new_page().await {
            Ok(page) => page,
            Err(e) if e.is_session_closed() => return Err(e),
            Err(e) => {
                warn!("Could not open page for interaction: {}", e);
                return Ok(None);
            }
        };

        let outcome = self.execute(page.as_ref(), from, interaction, plan).await;
        if let Err(e) = page.close().await {
            debug!("Closing interaction page failed: {}", e);
        }

        match outcome {
            Ok(transition) => Ok(transition),
            Err(e) if e.is_session_closed() => Err(e),
            Err(e) if e.is_transient() => {
                debug!(
                    role = %interaction.role,
                    ref_token = %interaction.ref_token,
                    reason = %e,
                    "Skipping interaction"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(
                    role = %interaction.role,
                    ref_token = %interaction.ref_token,
                    "Interaction failed: {}",
                    e
                );
                Ok(None)
            }
        }
    }

    /// Pick how to act and reserve the action. Reservation happens here,
    /// before any await, so concurrent duplicates lose the race cleanly.
    fn plan(&self, from: &PageState, interaction: &Interaction) -> Option<Plan> {
        let from_url = from.url();
        let href = interaction
            .href
            .clone()
            .or_else(|| find_href_by_ref(&from.snapshot_text, &interaction.ref_token));

        if let Some(target) = href.and_then(|h| resolve(&h, &from_url)).map(|u| normalize(&u)) {
            if !self.in_scope(&target) {
                debug!(url = %target, reason = "external", "Skipping href");
                return None;
            }
            let reserved = self.session.try_reserve_action(TriedAction::Navigate {
                from_hash: from.snapshot_hash.clone(),
                url: target.clone(),
            });
            if !reserved {
                debug!(url = %target, reason = "already tried", "Skipping href");
                return None;
            }
            return Some(Plan::Navigate(target));
        }

        let Some((role, name)) = find_role_and_name_by_ref(&from.snapshot_text, &interaction.ref_token)
        else {
            debug!(ref_token = %interaction.ref_token, "Reference does not resolve to a pointer element");
            return None;
        };
        let reserved = self.session.try_reserve_action(TriedAction::Click {
            role: role.clone(),
            name: name.clone().unwrap_or_default(),
            from_hash: from.snapshot_hash.clone(),
        });
        if !reserved {
            debug!(role = %role, name = ?name, reason = "already tried", "Skipping click");
            return None;
        }
        Some(Plan::Click { role, name })
    }

    async fn execute(
        &self,
        page: &dyn Page,
        from: &PageState,
        interaction: &Interaction,
        plan: Plan,
    ) -> Result<Option<Transition>> {
        let depth = from.depth + 1;

        match plan {
            Plan::Navigate(url) => {
                info!(from = %from.url(), to = %url, "Following href");
                page.goto(&url, self.timeouts.navigation).await?;
                wait_for_app_ready(page, &self.timeouts).await?;
                let state = capture(page, depth, &self.timeouts).await?;
                Ok(Some(Transition {
                    state,
                    interaction: Interaction {
                        action_type: ActionType::Navigate,
                        href: Some(url),
                        ..interaction.clone()
                    },
                }))
            }
            Plan::Click { role, name } => {
                page.goto(&from.url(), self.timeouts.navigation).await?;
                wait_for_app_ready(page, &self.timeouts).await?;

                let target = Target::role_flexible(&role, name.as_deref());
                info!(from = %from.url(), element = %target, "Clicking");
                if let Err(e) = page
                    .wait_for_visible(&target, self.timeouts.action.min(CLICK_VISIBLE_TIMEOUT))
                    .await
                {
                    if e.is_session_closed() {
                        return Err(e);
                    }
                    warn!(element = %target, "Click target not visible");
                    return Ok(None);
                }
                page.click(&target, self.timeouts.action).await?;
                wait_for_app_ready(page, &self.timeouts).await?;
                let state = capture(page, depth, &self.timeouts).await?;
                Ok(Some(Transition {
                    state,
                    interaction: Interaction {
                        action_type: ActionType::Click,
                        role,
                        name,
                        ref_token: interaction.ref_token.clone(),
                        href: None,
                    },
                }))
            }
        }
    }
}
