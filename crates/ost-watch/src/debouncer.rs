//! Per-path change coalescing.
//!
//! Editors often emit several events for a single save (truncate, write,
//! rename over). The debouncer keeps one pending change per path and only
//! releases it once no further events arrived for the debounce duration.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Kind of filesystem change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// File appeared.
    Created,
    /// File content or metadata changed.
    Modified,
    /// File disappeared.
    Removed,
}

/// A change that survived debouncing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Changed path.
    pub path: PathBuf,
    /// Coalesced change kind.
    pub kind: ChangeKind,
}

struct PendingChange {
    kind: ChangeKind,
    deadline: Instant,
}

/// Thread-safe change debouncer.
pub(crate) struct EventDebouncer {
    pending: Mutex<HashMap<PathBuf, PendingChange>>,
    debounce_duration: Duration,
}

impl EventDebouncer {
    pub fn new(debounce_duration: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            debounce_duration,
        }
    }

    /// Record a change. Called from the notify callback thread.
    pub fn record(&self, path: PathBuf, kind: ChangeKind) {
        let mut pending = self.lock();
        let deadline = Instant::now() + self.debounce_duration;

        match pending.entry(path) {
            Entry::Vacant(entry) => {
                entry.insert(PendingChange { kind, deadline });
            }
            Entry::Occupied(mut entry) => {
                if let Some(kind) = Self::coalesce(entry.get().kind, kind) {
                    let change = entry.get_mut();
                    change.kind = kind;
                    change.deadline = deadline;
                } else {
                    entry.remove();
                }
            }
        }
    }

    /// Combine a pending change with a new one.
    ///
    /// `None` means the path is back to its original state (created, then
    /// removed before anyone looked) and nothing should be reported.
    #[allow(clippy::match_same_arms)]
    fn coalesce(existing: ChangeKind, new: ChangeKind) -> Option<ChangeKind> {
        use ChangeKind::{Created, Modified, Removed};

        match (existing, new) {
            (Created, Created | Modified) => Some(Created),
            (Created, Removed) => None,
            (Modified, Created) => Some(Created),
            (Modified, Modified) => Some(Modified),
            (Modified, Removed) => Some(Removed),
            (Removed, Created) => Some(Modified),
            (Removed, Modified | Removed) => Some(Removed),
        }
    }

    /// Remove and return changes whose deadline has passed.
    pub fn drain_ready(&self) -> Vec<Change> {
        let now = Instant::now();
        let mut changes: Vec<Change> = self
            .lock()
            .extract_if(|_, change| change.deadline <= now)
            .map(|(path, change)| Change {
                path,
                kind: change.kind,
            })
            .collect();
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        changes
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, PendingChange>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
