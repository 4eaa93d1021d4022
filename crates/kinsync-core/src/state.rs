//! Sync coordinator state.

use std::fmt;

/// `Idle -> Syncing -> Idle`, or `Idle -> Syncing -> Failed` until the next
/// cycle starts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    /// The last cycle could not reach the server or got a bad answer.
    Failed,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Failed => "failed",
        })
    }
}
