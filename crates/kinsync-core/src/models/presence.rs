//! Online presence model

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default liveness window for a heartbeat.
pub const PRESENCE_TTL: Duration = Duration::from_secs(30);

/// `userId -> last heartbeat (Unix ms)`.
///
/// Presence is a soft TTL: entries are never expired explicitly, a user is simply
/// considered offline once their last heartbeat is older than the TTL.
///
/// Signing out is stored as a negated instant (`-t` for "signed out at `t`") so
/// that it travels through the max-heartbeat merge like any other entry and
/// outranks every heartbeat sent before it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresenceMap(BTreeMap<String, i64>);

impl PresenceMap {
    /// Record a heartbeat; an older heartbeat never overwrites a newer one.
    pub fn heartbeat(&mut self, user_id: impl Into<String>, at: i64) -> bool {
        self.record(user_id.into(), at)
    }

    /// Mark the user signed out at `at`, unless a later heartbeat is already known.
    pub fn sign_out(&mut self, user_id: impl Into<String>, at: i64) -> bool {
        self.record(user_id.into(), at.saturating_neg())
    }

    /// Last heartbeat of a user who has not signed out since.
    pub fn last_seen(&self, user_id: &str) -> Option<i64> {
        self.0.get(user_id).copied().filter(|seen| *seen > 0)
    }

    pub fn is_online(&self, user_id: &str, now: i64, ttl: Duration) -> bool {
        self.last_seen(user_id)
            .is_some_and(|seen| now.saturating_sub(seen) < ttl_millis(ttl))
    }

    /// Users whose last heartbeat falls inside the TTL window, sorted by id.
    pub fn online_users(&self, now: i64, ttl: Duration) -> Vec<String> {
        self.0
            .iter()
            .filter(|(_, seen)| **seen > 0 && now.saturating_sub(**seen) < ttl_millis(ttl))
            .map(|(user, _)| user.clone())
            .collect()
    }

    /// Fold `other` into `self` keeping the newest entry per user.
    ///
    /// Returns whether anything changed.
    pub fn merge_from(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (user, entry) in &other.0 {
            changed |= self.record(user.clone(), *entry);
        }
        changed
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn record(&mut self, user_id: String, entry: i64) -> bool {
        match self.0.get_mut(&user_id) {
            Some(current) if !supersedes(entry, *current) => false,
            Some(current) => {
                *current = entry;
                true
            }
            None => {
                self.0.insert(user_id, entry);
                true
            }
        }
    }
}

/// Later instants win; at the same instant a sign-out beats a heartbeat.
const fn supersedes(entry: i64, current: i64) -> bool {
    let (at, current_at) = (entry.saturating_abs(), current.saturating_abs());
    at > current_at || (at == current_at && entry < 0 && current > 0)
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}
