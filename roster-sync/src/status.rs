//! Per-parent sync and watch state, as reported by `RosterEngine::status`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use roster_core::ParentId;

/// Remote sync state machine for one parent.
///
/// `Idle → Syncing` when a refresh or migration starts, `Syncing → Idle` on
/// success, `Syncing → Error` when the remote fetch fails.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    Error { message: String },
}

impl SyncState {
    pub fn is_error(&self) -> bool {
        matches!(self, SyncState::Error { .. })
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::Syncing => write!(f, "syncing"),
            SyncState::Error { message } => write!(f, "error: {message}"),
        }
    }
}

/// Whether a live remote listener is attached for the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    #[default]
    Unwatched,
    Watching,
}

impl std::fmt::Display for WatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchState::Unwatched => write!(f, "unwatched"),
            WatchState::Watching => write!(f, "watching"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentStatus {
    pub parent: ParentId,
    pub sync: SyncState,
    pub watch: WatchState,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Records currently held in the in-memory cache.
    pub cached: usize,
    pub subscribers: usize,
}

/// Bookkeeping the engine keeps per parent.
#[derive(Debug, Clone, Default)]
pub(crate) struct SyncTrack {
    pub(crate) state: SyncState,
    pub(crate) last_synced_at: Option<DateTime<Utc>>,
}
