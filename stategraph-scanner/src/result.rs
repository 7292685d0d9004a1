use crate::extract::{ActionType, Interaction};
use crate::snapshot::PageState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A transition between two distinct states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from_hash: String,
    pub to_hash: String,
    pub action_type: ActionType,
    pub ref_token: Option<String>,
    pub href: Option<String>,
    pub role: Option<String>,
    pub name: Option<String>,
}

impl Edge {
    pub fn new(from: &PageState, to: &PageState, interaction: &Interaction) -> Self {
        Self {
            from_hash: from.snapshot_hash.clone(),
            to_hash: to.snapshot_hash.clone(),
            action_type: interaction.action_type,
            ref_token: Some(interaction.ref_token.clone()).filter(|r| !r.is_empty()),
            href: interaction.href.clone(),
            role: Some(interaction.role.clone()).filter(|r| !r.is_empty()),
            name: interaction.name.clone(),
        }
    }

    /// The edge produced by submitting the login form.
    pub fn submit(from: &PageState, to: &PageState) -> Self {
        Self {
            from_hash: from.snapshot_hash.clone(),
            to_hash: to.snapshot_hash.clone(),
            action_type: ActionType::Submit,
            ref_token: None,
            href: Some(to.url()),
            role: Some("button".to_string()),
            name: Some("login".to_string()),
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.from_hash == self.to_hash
    }
}

/// The state an interaction led to, plus the interaction as it was actually
/// performed.
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: PageState,
    pub interaction: Interaction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    FrontierExhausted,
    Saturated,
    MaxStates,
    MaxUrls,
    StopRequested,
    SessionClosed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::FrontierExhausted => "frontier exhausted",
            StopReason::Saturated => "discovery saturated",
            StopReason::MaxStates => "max states reached",
            StopReason::MaxUrls => "max URLs reached",
            StopReason::StopRequested => "stop requested",
            StopReason::SessionClosed => "browser session closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub states: usize,
    pub edges: usize,
    pub pops: usize,
    pub stop_reason: StopReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectSummary {
    pub urls: Vec<String>,
    pub visited: usize,
    pub clicks: usize,
    pub stop_reason: StopReason,
}
