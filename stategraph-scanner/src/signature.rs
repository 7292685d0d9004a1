//! Stable identity for elements whose reference tokens change on every render.

use crate::extract::POINTER_MARKER;
use std::collections::HashSet;
use std::fmt;

/// Roles whose signatures count when diffing clickable surfaces.
const SIGNATURE_ROLES: [&str; 6] = ["button", "link", "tab", "menuitem", "treeitem", "disclosure"];

/// `role|normalized name`, lowercase with collapsed whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementSignature(String);

impl ElementSignature {
    pub fn new(role: &str, name: Option<&str>) -> Self {
        let name = name
            .unwrap_or_default()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        Self(format!("{}|{}", role.trim(), name).to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signatures of every pointer-cursor element in a snapshot, with or without
/// a reference token.
pub fn clickable_signatures(snapshot: &str) -> HashSet<ElementSignature> {
    let mut sigs = HashSet::new();

    for line in snapshot.lines().map(str::trim) {
        if !line.contains(POINTER_MARKER) {
            continue;
        }
        let Some(rest) = line.strip_prefix('-').map(str::trim_start) else {
            continue;
        };
        let role_end = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let role = rest[..role_end].to_ascii_lowercase();
        if !SIGNATURE_ROLES.contains(&role.as_str()) {
            continue;
        }
        let name = rest[role_end..]
            .trim_start()
            .strip_prefix('"')
            .and_then(|body| body.find('"').map(|end| &body[..end]));
        sigs.insert(ElementSignature::new(&role, name));
    }

    sigs
}

fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Loose name match: ignores case, whitespace, underscores and hyphens, and
/// accepts the wanted name anywhere inside the candidate.
pub fn names_match(wanted: &str, candidate: &str) -> bool {
    squash(candidate).contains(&squash(wanted))
}
