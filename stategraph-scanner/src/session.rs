//! Per-run bookkeeping shared by every component of one crawl.

use crate::signature::ElementSignature;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// An action attempted from a source state. Each is tried at most once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TriedAction {
    Navigate { from_hash: String, url: String },
    Click { role: String, name: String, from_hash: String },
}

/// Visited states, tried actions and reserved element signatures for one
/// session. Check-and-insert happens under a single lock acquisition, and no
/// lock is held across an `.await`.
#[derive(Debug, Default)]
pub struct SessionContext {
    visited: Mutex<HashSet<String>>,
    tried: Mutex<HashSet<TriedAction>>,
    signatures: Mutex<HashSet<ElementSignature>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the hash was not visited before.
    pub fn mark_visited(&self, hash: &str) -> bool {
        lock(&self.visited).insert(hash.to_string())
    }

    pub fn is_visited(&self, hash: &str) -> bool {
        lock(&self.visited).contains(hash)
    }

    /// Reserve an action. Returns false if it was already attempted.
    pub fn try_reserve_action(&self, action: TriedAction) -> bool {
        lock(&self.tried).insert(action)
    }

    /// Reserve an element signature for the whole run. Returns false if it
    /// was already taken.
    pub fn try_reserve_signature(&self, sig: &ElementSignature) -> bool {
        lock(&self.signatures).insert(sig.clone())
    }
}
