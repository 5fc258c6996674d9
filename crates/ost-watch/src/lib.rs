//! Directory watcher for ost rebuilds.
//!
//! [`DirWatcher`] watches a set of roots recursively and invokes a callback
//! from a single worker thread, at most once per poll interval, whenever
//! something under the roots changed. Because the callback always runs on
//! that one thread, a slow callback delays later invocations instead of
//! overlapping with them.
//!
//! ```no_run
//! # fn main() -> Result<(), ost_watch::WatchError> {
//! use std::time::Duration;
//! use ost_watch::DirWatcher;
//!
//! let handle = DirWatcher::new(["src", "templates"], Duration::from_millis(500))
//!     .start(|| println!("rebuild"))?;
//! // ...
//! handle.stop();
//! # Ok(())
//! # }
//! ```

mod debouncer;

use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use notify::{RecursiveMode, Watcher};

use crate::debouncer::EventDebouncer;
pub use crate::debouncer::{Change, ChangeKind};

/// Quiet period a path needs before its change is released.
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Error returned when a watcher cannot start.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The underlying notify watcher failed.
    #[error("Failed to watch {}: {source}", .path.display())]
    Watch {
        /// Root being watched.
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    /// The notify backend could not be created.
    #[error("Failed to create watcher: {0}")]
    Backend(#[source] notify::Error),
    /// The worker thread could not be spawned.
    #[error("Failed to spawn watcher thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Watches directory roots for changes.
#[derive(Debug, Clone)]
pub struct DirWatcher {
    roots: Vec<PathBuf>,
    ignored: Vec<PathBuf>,
    poll_interval: Duration,
}

impl DirWatcher {
    /// Create a watcher over `roots`, polled every `poll_interval`.
    ///
    /// Relative roots are resolved against the current directory.
    pub fn new<I, P>(roots: I, poll_interval: Duration) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(|root| absolute(root.into())).collect(),
            ignored: Vec::new(),
            poll_interval,
        }
    }

    /// Ignore changes below `path`.
    ///
    /// Used for a destination root nested inside a watched root, so that
    /// writing output does not trigger another rebuild. A relative `path` is
    /// resolved against the current directory.
    #[must_use]
    pub fn ignore(mut self, path: impl Into<PathBuf>) -> Self {
        self.ignored.push(absolute(path.into()));
        self
    }

    /// Watched roots.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Start watching. `callback` runs on the worker thread.
    ///
    /// The returned handle stops the worker when stopped or dropped.
    pub fn start<F>(&self, mut callback: F) -> Result<WatchHandle, WatchError>
    where
        F: FnMut() + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let debouncer = Arc::new(EventDebouncer::new(DEBOUNCE.min(self.poll_interval)));

        let watcher_debouncer = Arc::clone(&debouncer);
        let ignored = self.ignored.clone();
        let mut watcher = notify::recommended_watcher(move |res| {
            record_notify_events(res, &watcher_debouncer, &ignored);
        })
        .map_err(WatchError::Backend)?;

        for root in &self.roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|source| WatchError::Watch {
                    path: root.clone(),
                    source,
                })?;
            tracing::debug!(root = %root.display(), "Watching");
        }

        let poll_interval = self.poll_interval;
        let worker = thread::Builder::new()
            .name("ost-watch".to_owned())
            .spawn(move || {
                // Keep the notify watcher alive as long as the worker runs
                let _watcher = watcher;
                loop {
                    match shutdown_rx.recv_timeout(poll_interval) {
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                        Err(mpsc::RecvTimeoutError::Timeout) => {}
                    }

                    let changes = debouncer.drain_ready();
                    if changes.is_empty() {
                        continue;
                    }
                    for change in &changes {
                        tracing::debug!(path = %change.path.display(), kind = ?change.kind, "Change detected");
                    }
                    tracing::info!(changes = changes.len(), "Changes detected");
                    callback();
                }
                tracing::debug!("Watcher stopped");
            })?;

        Ok(WatchHandle {
            shutdown: Some(shutdown_tx),
            worker: Some(worker),
        })
    }
}

/// Running watcher.
///
/// Dropping the handle signals the worker to stop without waiting for it.
pub struct WatchHandle {
    shutdown: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Stop the worker and wait for an in-progress callback to finish.
    pub fn stop(mut self) {
        self.shutdown.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::error!("Watcher thread panicked");
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.shutdown.take();
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("running", &self.shutdown.is_some())
            .finish()
    }
}

fn change_kind(kind: notify::EventKind) -> Option<ChangeKind> {
    match kind {
        notify::EventKind::Create(_) => Some(ChangeKind::Created),
        notify::EventKind::Modify(_) => Some(ChangeKind::Modified),
        notify::EventKind::Remove(_) => Some(ChangeKind::Removed),
        _ => None,
    }
}

fn record_notify_events(
    res: Result<notify::Event, notify::Error>,
    debouncer: &EventDebouncer,
    ignored: &[PathBuf],
) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Watch error");
            return;
        }
    };
    let Some(kind) = change_kind(event.kind) else {
        return;
    };
    for path in event.paths {
        if !is_ignored(&path, ignored) {
            debouncer.record(path, kind);
        }
    }
}

// Notify reports absolute event paths.
fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

fn is_ignored(path: &Path, ignored: &[PathBuf]) -> bool {
    ignored.iter().any(|prefix| path.starts_with(prefix))
}
