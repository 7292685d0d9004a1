//! Best-effort credential submission.

use crate::browser::{Page, Target, Timeouts, wait_for_app_ready};
use crate::error::Result;
use std::fmt;
use tracing::{info, warn};

const USERNAME_SELECTORS: [&str; 5] = [
    r#"input[name="emailOrUsername"]"#,
    r#"input[name="username"]"#,
    r#"input[name="email"]"#,
    r#"input[type="email"]"#,
    r#"input[type="text"]"#,
];
const PASSWORD_SELECTOR: &str = r#"input[type="password"]"#;
const SUBMIT_SELECTORS: [&str; 3] = [
    "button.login",
    r#"button[type="submit"]"#,
    r#"input[type="submit"]"#,
];
const SUBMIT_LABELS: [&str; 3] = ["Login", "Sign in", "Log in"];

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Submitted,
    FormNotFound,
    Failed(String),
}

async fn first_visible(page: &dyn Page, candidates: Vec<Target>) -> Result<Option<Target>> {
    for target in candidates {
        match page.is_visible(&target).await {
            Ok(true) => return Ok(Some(target)),
            Ok(false) => {}
            Err(e) if e.is_session_closed() => return Err(e),
            Err(_) => {}
        }
    }
    Ok(None)
}

/// Open `login_url`, fill the first matching username and password fields
/// and submit. A page without a recognisable form is left alone.
pub async fn login(
    page: &dyn Page,
    login_url: &str,
    credentials: &Credentials,
    timeouts: &Timeouts,
) -> Result<LoginOutcome> {
    if let Err(e) = page.goto(login_url, timeouts.navigation).await {
        if e.is_session_closed() {
            return Err(e);
        }
        warn!("Could not open login page {}: {}", login_url, e);
    }
    wait_for_app_ready(page, timeouts).await?;

    let username = first_visible(page, USERNAME_SELECTORS.iter().map(|s| Target::css(s)).collect()).await?;
    let password = first_visible(page, vec![Target::css(PASSWORD_SELECTOR)]).await?;
    let mut submit_candidates: Vec<Target> = SUBMIT_SELECTORS.iter().map(|s| Target::css(s)).collect();
    submit_candidates.extend(
        SUBMIT_LABELS
            .iter()
            .map(|label| Target::role_flexible("button", Some(label))),
    );
    let submit = first_visible(page, submit_candidates).await?;

    let (Some(username), Some(password), Some(submit)) = (username, password, submit) else {
        info!("Login form not found, continuing");
        return Ok(LoginOutcome::FormNotFound);
    };

    let attempt = async {
        page.fill(&username, &credentials.username, timeouts.action).await?;
        page.fill(&password, &credentials.password, timeouts.action).await?;
        page.click(&submit, timeouts.action).await
    };
    if let Err(e) = attempt.await {
        if e.is_session_closed() {
            return Err(e);
        }
        warn!("Login submission failed: {}", e);
        return Ok(LoginOutcome::Failed(e.to_string()));
    }

    wait_for_app_ready(page, timeouts).await?;
    info!(user = %credentials.username, "Submitted login form");
    Ok(LoginOutcome::Submitted)
}
