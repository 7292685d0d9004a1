//! Candidate interactions parsed out of snapshot text.
//!
//! The snapshot format is loosely structured, so everything here is a small
//! line scanner that yields partial results instead of failing.

use crate::url::{is_internal, normalize, resolve};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

pub const POINTER_MARKER: &str = "[cursor=pointer]";
const REF_MARKER: &str = "[ref=";

/// Roles the crawler is willing to act on.
pub const INTERACTIVE_ROLES: [&str; 4] = ["button", "link", "tab", "menuitem"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Click,
    Navigate,
    Submit,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Click => "click",
            ActionType::Navigate => "navigate",
            ActionType::Submit => "submit",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An element that can be acted on. `ref_token` is only meaningful against
/// the snapshot it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub action_type: ActionType,
    pub role: String,
    pub name: Option<String>,
    pub ref_token: String,
    pub href: Option<String>,
}

/// Parse pointer-cursor lines with a reference token into interactions,
/// keeping the first occurrence of each token.
pub fn parse(snapshot: &str) -> Vec<Interaction> {
    let lines: Vec<&str> = snapshot.lines().collect();
    let mut seen = HashSet::new();
    let mut interactions = Vec::new();

    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim();
        if !line.contains(POINTER_MARKER) || !line.contains(REF_MARKER) {
            continue;
        }
        let Some(role) = parse_role(line) else {
            continue;
        };
        if !INTERACTIVE_ROLES.contains(&role.as_str()) {
            continue;
        }
        let Some(ref_token) = parse_ref(line) else {
            continue;
        };
        if !seen.insert(ref_token.clone()) {
            continue;
        }

        interactions.push(Interaction {
            action_type: ActionType::Click,
            role,
            name: parse_name(line),
            ref_token,
            href: child_href(&lines, i),
        });
    }

    debug!("Extracted {} pointer interactions", interactions.len());
    interactions
}

/// Re-derive role and name for a reference token from the snapshot it came
/// from. Tokens on non-pointer lines or outside the interactive roles do not
/// resolve.
pub fn find_role_and_name_by_ref(snapshot: &str, ref_token: &str) -> Option<(String, Option<String>)> {
    let needle = format!("{}{}]", REF_MARKER, ref_token);
    let line = snapshot.lines().map(str::trim).find(|l| l.contains(&needle))?;
    if !line.contains(POINTER_MARKER) {
        return None;
    }
    let role = parse_role(line)?;
    if !INTERACTIVE_ROLES.contains(&role.as_str()) {
        return None;
    }
    Some((role, parse_name(line)))
}

pub fn find_href_by_ref(snapshot: &str, ref_token: &str) -> Option<String> {
    let needle = format!("{}{}]", REF_MARKER, ref_token);
    let lines: Vec<&str> = snapshot.lines().collect();
    let idx = lines.iter().position(|l| l.contains(&needle))?;
    child_href(&lines, idx)
}

/// Every internal URL mentioned by an `href:` or `/url:` entry, resolved
/// against `from_url`, normalized and deduplicated in order of appearance.
pub fn extract_internal_urls(snapshot: &str, from_url: &str, base_url: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for line in snapshot.lines() {
        let Some(value) = url_value(line.trim()) else {
            continue;
        };
        let value = value.trim_end_matches([')', ',', ';', ']']);
        let value = strip_quotes(value);
        let Some(absolute) = resolve(value, from_url) else {
            continue;
        };
        let normalized = normalize(&absolute);
        if is_internal(&normalized, base_url) && seen.insert(normalized.clone()) {
            urls.push(normalized);
        }
    }

    urls
}

fn indent_of(raw: &str) -> usize {
    raw.len() - raw.trim_start().len()
}

/// Scan the lines nested under `lines[idx]` for an href. A sibling or
/// shallower item ends the block.
fn child_href(lines: &[&str], idx: usize) -> Option<String> {
    let base_indent = indent_of(lines[idx]);
    for raw in &lines[idx + 1..] {
        let trimmed = raw.trim();
        if trimmed.starts_with('-') && indent_of(raw) <= base_indent {
            break;
        }
        if let Some(value) = url_value(trimmed) {
            let value = strip_quotes(value);
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn strip_quotes(value: &str) -> &str {
    value.trim_matches(|c| c == '"' || c == '\'')
}

/// `- role ...` -> lowercase role word.
fn parse_role(line: &str) -> Option<String> {
    let rest = line.strip_prefix('-')?.trim_start();
    let end = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    // The role word must end at a word boundary.
    if rest[end..]
        .chars()
        .next()
        .is_some_and(|c| c.is_alphanumeric() || c == '_')
    {
        return None;
    }
    Some(rest[..end].to_ascii_lowercase())
}

/// `- role "Name" ...` -> Name.
fn parse_name(line: &str) -> Option<String> {
    let rest = line.strip_prefix('-')?.trim_start();
    let after_role = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    if after_role.len() == rest.len() {
        return None;
    }
    let quoted = after_role.trim_start();
    if quoted.len() == after_role.len() {
        return None;
    }
    let body = quoted.strip_prefix('"')?;
    let end = body.find('"')?;
    if end == 0 {
        return None;
    }
    Some(body[..end].to_string())
}

/// `[ref=e12]` -> e12.
fn parse_ref(line: &str) -> Option<String> {
    let start = line.find(REF_MARKER)? + REF_MARKER.len();
    let rest = &line[start..];
    let end = rest.find(']')?;
    let token = rest[..end].trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return None;
    }
    Some(token.to_string())
}

/// Value following the first `href:` or `/url:` key in a line.
fn url_value(line: &str) -> Option<&str> {
    let lower = line.to_ascii_lowercase();
    let mut best: Option<&str> = None;
    let mut best_pos = usize::MAX;

    for key in ["href", "/url"] {
        let mut from = 0;
        while let Some(pos) = lower[from..].find(key) {
            let at = from + pos;
            from = at + key.len();
            if at >= best_pos {
                break;
            }
            let rest = line[from..].trim_start();
            let Some(after_colon) = rest.strip_prefix(':') else {
                continue;
            };
            let value = after_colon.trim_start();
            let end = value.find(char::is_whitespace).unwrap_or(value.len());
            if end > 0 {
                best = Some(&value[..end]);
                best_pos = at;
                break;
            }
        }
    }

    best
}
