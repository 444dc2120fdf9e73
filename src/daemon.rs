//! Watch daemon: keeps thumbnails and the index in step with the source tree.
//!
//! ```text
//!            start()                       stop()
//! Stopped ──────────▶ subscribe ─▶ initial pass ─▶ Watching ──────▶ Stopped
//!    ▲                    │ error                                    │
//!    └────────────────────┘ (unsubscribe)                            │
//!    └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both transitions are idempotent. `Watching` is only reported once the
//! initial generate-if-stale pass over the existing tree has completed.
//!
//! ## Event handling
//!
//! | Settled event | Action |
//! |---|---|
//! | created | generate if stale |
//! | modified, not indexed | treated as created |
//! | modified | regenerate unconditionally |
//! | removed | delete thumbnail, drop index entry |
//!
//! Created and modified events are gated by the [`ProcessingSet`]: an event for
//! a path already being generated is dropped, since the in-flight generation
//! reads the file after it settled. Every handled event invalidates the
//! listing cache. Events for directories are expanded to the images below
//! them. A batch of settled events is processed in parallel.

use crate::generate::{Generator, Outcome};
use crate::index::IndexStats;
use crate::listing::ListingCache;
use crate::naming::normalize_relative_path;
use crate::scan::{self, SourceFile};
use crate::watcher::{ChangeKind, EventSink, FileWatcher, WatchError, WatchEvent};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Relative paths with a generation in flight.
#[derive(Debug, Default)]
pub struct ProcessingSet {
    paths: Mutex<HashSet<String>>,
}

impl ProcessingSet {
    /// Claim `path`, or `None` if it is already claimed.
    /// The claim is released when the guard drops.
    pub fn try_claim(&self, path: &str) -> Option<ProcessingGuard<'_>> {
        if !self.paths.lock().insert(path.to_string()) {
            return None;
        }
        Some(ProcessingGuard {
            set: self,
            path: path.to_string(),
        })
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.lock().contains(path)
    }

    pub fn snapshot(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.paths.lock().iter().cloned().collect();
        paths.sort();
        paths
    }
}

pub struct ProcessingGuard<'a> {
    set: &'a ProcessingSet,
    path: String,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.set.paths.lock().remove(&self.path);
    }
}

/// Point-in-time view of the daemon.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
    pub watching: bool,
    pub watched_root: PathBuf,
    pub processing_queue: Vec<String>,
    pub index: IndexStats,
}

struct EventHandler {
    root: PathBuf,
    generator: Generator,
    listing: Arc<ListingCache>,
    processing: ProcessingSet,
}

impl EventHandler {
    fn handle_batch(&self, events: Vec<WatchEvent>) {
        debug!(events = events.len(), "handling watch batch");
        events.par_iter().for_each(|event| self.handle(event));
    }

    fn handle(&self, event: &WatchEvent) {
        if event.kind != ChangeKind::Removed && event.path.is_dir() {
            self.handle_new_directory(&event.path);
            return;
        }

        let Some(file) = scan::source_file_for(&self.root, &event.path) else {
            if event.kind == ChangeKind::Removed {
                self.handle_removed_directory(&event.path);
            } else {
                debug!(path = %event.path.display(), "ignoring non-image event");
            }
            return;
        };

        let kind = match event.kind {
            ChangeKind::Modified if self.generator.index().get(&file.relative_path).is_none() => {
                ChangeKind::Created
            }
            kind => kind,
        };
        info!(path = %file.relative_path, ?kind, "file change");
        match kind {
            ChangeKind::Created => self.generate(&file, false),
            ChangeKind::Modified => self.generate(&file, true),
            ChangeKind::Removed => self.remove(&file.relative_path),
        }
        self.listing.invalidate_all();
    }

    fn generate(&self, file: &SourceFile, force: bool) {
        let Some(_claim) = self.processing.try_claim(&file.relative_path) else {
            debug!(path = %file.relative_path, "already processing, event dropped");
            return;
        };
        let result = if force {
            self.generator.regenerate(file).map(|()| Outcome::Generated)
        } else {
            self.generator.ensure(file)
        };
        match result {
            Ok(Outcome::Fresh) => debug!(path = %file.relative_path, "thumbnail already current"),
            Ok(Outcome::Generated) => {}
            Err(e) => warn!(path = %file.relative_path, error = %e, "failed to process change"),
        }
    }

    fn remove(&self, relative_path: &str) {
        let index = self.generator.index();
        remove_thumbnail(&index.thumbnail_path(relative_path));
        if index.remove(relative_path).is_some() {
            info!(path = %relative_path, "removed thumbnail and index entry");
        }
    }

    fn handle_new_directory(&self, dir: &Path) {
        let files = match scan::scan_tree(dir) {
            Ok(files) => files,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "failed to scan new directory");
                return;
            }
        };
        let files: Vec<SourceFile> = files
            .iter()
            .filter_map(|f| scan::source_file_for(&self.root, &f.absolute_path))
            .collect();
        info!(path = %dir.display(), files = files.len(), "directory appeared");
        files.par_iter().for_each(|file| self.generate(file, false));
        self.listing.invalidate_all();
    }

    fn handle_removed_directory(&self, path: &Path) {
        let Some(relative) = path
            .strip_prefix(&self.root)
            .ok()
            .and_then(normalize_relative_path)
        else {
            return;
        };
        if relative.is_empty() {
            return;
        }
        let index = self.generator.index();
        let removed = index.remove_under(&relative);
        if removed.is_empty() {
            return;
        }
        for rel in &removed {
            remove_thumbnail(&index.thumbnail_path(rel));
        }
        info!(path = %relative, files = removed.len(), "directory removed");
        self.listing.invalidate_all();
    }
}

fn remove_thumbnail(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "deleted thumbnail"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to delete thumbnail"),
    }
}

pub struct WatchDaemon {
    handler: Arc<EventHandler>,
    watcher: Mutex<Box<dyn FileWatcher>>,
    /// Serializes start and stop.
    lifecycle: Mutex<()>,
    watching: AtomicBool,
}

impl WatchDaemon {
    pub fn new(
        root: PathBuf,
        generator: Generator,
        listing: Arc<ListingCache>,
        watcher: Box<dyn FileWatcher>,
    ) -> Self {
        Self {
            handler: Arc::new(EventHandler {
                root,
                generator,
                listing,
                processing: ProcessingSet::default(),
            }),
            watcher: Mutex::new(watcher),
            lifecycle: Mutex::new(()),
            watching: AtomicBool::new(false),
        }
    }

    pub fn root(&self) -> &Path {
        &self.handler.root
    }

    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::SeqCst)
    }

    pub fn processing(&self) -> &ProcessingSet {
        &self.handler.processing
    }

    /// Subscribe to changes and run the initial pass. No-op if already watching.
    pub fn start(&self) -> Result<(), WatchError> {
        let _lifecycle = self.lifecycle.lock();
        if self.is_watching() {
            info!("daemon already watching");
            return Ok(());
        }

        let root = &self.handler.root;
        info!(root = %root.display(), "starting watch daemon");
        let handler = self.handler.clone();
        let sink: EventSink = Arc::new(move |events| handler.handle_batch(events));
        self.watcher.lock().watch(root, sink)?;

        match self.handler.generator.generate_all(root) {
            Ok(report) => info!(%report, "initial pass complete"),
            Err(e) => {
                self.watcher.lock().unwatch();
                return Err(e.into());
            }
        }
        self.handler.listing.invalidate_all();

        self.watching.store(true, Ordering::SeqCst);
        info!(root = %root.display(), "watching for changes");
        Ok(())
    }

    /// Tear down the subscription. No-op if not watching.
    pub fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();
        if !self.is_watching() {
            info!("daemon not watching");
            return;
        }
        self.watcher.lock().unwatch();
        self.watching.store(false, Ordering::SeqCst);
        info!("watch daemon stopped");
    }

    /// Handle a batch of settled events, as the watcher would.
    pub fn handle_batch(&self, events: Vec<WatchEvent>) {
        self.handler.handle_batch(events);
    }

    pub fn status(&self) -> DaemonStatus {
        let root = &self.handler.root;
        DaemonStatus {
            watching: self.is_watching(),
            watched_root: fs::canonicalize(root).unwrap_or_else(|_| root.clone()),
            processing_queue: self.handler.processing.snapshot(),
            index: self.handler.generator.index().stats(),
        }
    }
}

impl Drop for WatchDaemon {
    fn drop(&mut self) {
        self.watcher.get_mut().unwatch();
    }
}
