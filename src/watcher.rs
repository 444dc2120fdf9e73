//! Filesystem change notification.
//!
//! The daemon only sees the [`FileWatcher`] capability: subscribe to settled
//! create/modify/remove events under a root, or unsubscribe. Two
//! implementations exist:
//!
//! - [`NotifyWatcher`], backed by `notify`'s recommended OS watcher
//! - `ManualWatcher` (tests only), which lets a test inject events directly
//!
//! # Architecture
//!
//! ```text
//! OS events -> notify RecommendedWatcher -> debouncer-mini (settle window)
//!   -> mpsc channel -> worker thread: rebase + classify
//!   -> settled batch -> EventSink (daemon)
//! ```
//!
//! Editors and copy tools emit bursts of events for one logical save. The
//! debouncer holds each path until no event has arrived for it during the
//! settle window. Paths that are still being written when the window runs out
//! arrive as `AnyContinuous` and are skipped; the final quiet event follows.
//! Since the debouncer does not keep the raw event kind, a settled path is
//! classified from whether it exists at that moment: present paths are
//! reported as [`ChangeKind::Modified`], missing ones as
//! [`ChangeKind::Removed`]. The daemon tells creations apart by index
//! membership.

use crate::scan::is_hidden;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{
    DebounceEventResult, DebouncedEvent, DebouncedEventKind, Debouncer, new_debouncer,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Watch error: {0}")]
    Notify(#[from] notify::Error),
    #[error("Scan error: {0}")]
    Scan(#[from] crate::scan::ScanError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// A settled change to one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl WatchEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Receives batches of settled events. Called from the watcher's own thread.
pub type EventSink = Arc<dyn Fn(Vec<WatchEvent>) + Send + Sync>;

/// Subscription to filesystem changes under a root directory, recursively.
pub trait FileWatcher: Send {
    fn watch(&mut self, root: &Path, sink: EventSink) -> Result<(), WatchError>;

    /// Tear down the subscription. A no-op when not watching.
    fn unwatch(&mut self);
}

/// The filesystem has the final word once a path settles.
fn classify(path: &Path) -> ChangeKind {
    if path.exists() {
        ChangeKind::Modified
    } else {
        ChangeKind::Removed
    }
}

/// Turn one debounced batch into settled events under `root`, sorted by path.
fn settle_batch(
    events: Vec<DebouncedEvent>,
    root: &Path,
    canonical_root: &Path,
) -> Vec<WatchEvent> {
    let mut settled: Vec<WatchEvent> = events
        .into_iter()
        .filter(|event| event.kind == DebouncedEventKind::Any)
        .filter_map(|event| rebase(&event.path, root, canonical_root))
        .map(|path| {
            let kind = classify(&path);
            WatchEvent { path, kind }
        })
        .collect();
    settled.sort_by(|a, b| a.path.cmp(&b.path));
    settled.dedup();
    settled
}

// ============================================================================
// NotifyWatcher
// ============================================================================

struct ActiveWatch {
    debouncer: Debouncer<RecommendedWatcher>,
    shutdown: mpsc::Sender<()>,
    worker: JoinHandle<()>,
}

/// [`FileWatcher`] backed by the OS notification API through `notify`.
pub struct NotifyWatcher {
    settle: Duration,
    poll: Duration,
    active: Option<ActiveWatch>,
}

impl NotifyWatcher {
    pub fn new(settle: Duration, poll: Duration) -> Self {
        Self {
            settle,
            poll,
            active: None,
        }
    }
}

impl FileWatcher for NotifyWatcher {
    fn watch(&mut self, root: &Path, sink: EventSink) -> Result<(), WatchError> {
        self.unwatch();

        // Backends may report canonical paths; events are mapped back onto `root`.
        let canonical_root = root.canonicalize()?;
        let (event_tx, event_rx) = mpsc::channel::<Vec<DebouncedEvent>>();
        let (shutdown, shutdown_rx) = mpsc::channel::<()>();

        let mut debouncer = new_debouncer(self.settle, move |result: DebounceEventResult| {
            match result {
                Ok(events) if !events.is_empty() => {
                    let _ = event_tx.send(events);
                }
                Err(e) => warn!(error = %e, "watch error"),
                _ => {}
            }
        })?;
        debouncer
            .watcher()
            .watch(&canonical_root, RecursiveMode::Recursive)?;

        let worker_root = root.to_path_buf();
        let poll = self.poll;
        let worker = thread::Builder::new()
            .name("thumbd-watcher".into())
            .spawn(move || {
                watch_loop(
                    &event_rx,
                    &shutdown_rx,
                    &worker_root,
                    &canonical_root,
                    poll,
                    &sink,
                );
            })?;

        self.active = Some(ActiveWatch {
            debouncer,
            shutdown,
            worker,
        });
        Ok(())
    }

    fn unwatch(&mut self) {
        if let Some(active) = self.active.take() {
            drop(active.debouncer);
            let _ = active.shutdown.send(());
            if active.worker.join().is_err() {
                warn!("watcher worker panicked");
            }
        }
    }
}

impl Drop for NotifyWatcher {
    fn drop(&mut self) {
        self.unwatch();
    }
}

fn watch_loop(
    event_rx: &mpsc::Receiver<Vec<DebouncedEvent>>,
    shutdown_rx: &mpsc::Receiver<()>,
    root: &Path,
    canonical_root: &Path,
    poll: Duration,
    sink: &EventSink,
) {
    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }
        match event_rx.recv_timeout(poll) {
            Ok(events) => {
                let batch = settle_batch(events, root, canonical_root);
                for event in &batch {
                    debug!(path = %event.path.display(), kind = ?event.kind, "settled fs event");
                }
                if !batch.is_empty() {
                    sink(batch);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Map an event path onto `root`, dropping paths outside it or hidden below it.
fn rebase(path: &Path, root: &Path, canonical_root: &Path) -> Option<PathBuf> {
    let relative = path
        .strip_prefix(canonical_root)
        .or_else(|_| path.strip_prefix(root))
        .ok()?;
    if relative.as_os_str().is_empty() || relative.iter().any(is_hidden) {
        return None;
    }
    Some(root.join(relative))
}
