//! Thumbnail generation.
//!
//! The [`Generator`] ties the backend, metadata extraction and the staleness
//! index together:
//!
//! ```text
//! ensure(file)            is_up_to_date? ── yes ──▶ Fresh
//!                               │ no
//!                               ▼
//! regenerate(file)   extract metadata ─▶ backend.thumbnail ─▶ record_generation
//!                                              │ error
//!                                              ▼
//!                                     record_failed_generation
//! ```
//!
//! Metadata is extracted *before* the encode and its signature is what gets
//! recorded, so a file modified mid-encode is left looking stale.
//!
//! ## Bulk operations
//!
//! [`Generator::generate_all`] scans once, runs generate-if-stale for every
//! file in parallel with [rayon](https://docs.rs/rayon), and flushes the index
//! once at the end. A failing file is logged and counted, never fatal.

use crate::config::ThumbnailsConfig;
use crate::imaging::{BackendError, ImageBackend, Quality, ThumbnailParams};
use crate::index::{IndexError, Persist, StalenessIndex};
use crate::metadata;
use crate::scan::{self, ScanError, SourceFile};
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

const BULK_PROGRESS_EVERY: usize = 10;

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Thumbnail generation failed: {0}")]
    Imaging(#[from] BackendError),
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

/// What [`Generator::ensure`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The recorded thumbnail was still valid.
    Fresh,
    Generated,
}

/// Counts reported at the end of a bulk generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub total: usize,
    pub generated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for BulkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files: {} generated, {} up to date, {} failed",
            self.total, self.generated, self.skipped, self.failed
        )
    }
}

#[derive(Clone)]
pub struct Generator {
    index: Arc<StalenessIndex>,
    backend: Arc<dyn ImageBackend>,
    size: u32,
    quality: Quality,
}

impl Generator {
    pub fn new(
        index: Arc<StalenessIndex>,
        backend: Arc<dyn ImageBackend>,
        thumbnails: &ThumbnailsConfig,
    ) -> Self {
        Self {
            index,
            backend,
            size: thumbnails.size,
            quality: Quality::new(thumbnails.quality),
        }
    }

    pub fn index(&self) -> &Arc<StalenessIndex> {
        &self.index
    }

    /// Generate the thumbnail only if the recorded one is stale.
    pub fn ensure(&self, file: &SourceFile) -> Result<Outcome, GenerateError> {
        if self.index.is_up_to_date(file) {
            debug!(path = %file.relative_path, "thumbnail up to date");
            return Ok(Outcome::Fresh);
        }
        self.generate(file, Persist::Periodic)?;
        Ok(Outcome::Generated)
    }

    /// Generate the thumbnail unconditionally.
    pub fn regenerate(&self, file: &SourceFile) -> Result<(), GenerateError> {
        self.generate(file, Persist::Periodic)
    }

    fn generate(&self, file: &SourceFile, persist: Persist) -> Result<(), GenerateError> {
        let started = Instant::now();
        let metadata = metadata::extract(self.backend.as_ref(), &file.absolute_path)?;
        let params = ThumbnailParams {
            source: file.absolute_path.clone(),
            output: self.index.thumbnail_path(&file.relative_path),
            size: self.size,
            quality: self.quality,
        };

        if let Err(e) = self.backend.thumbnail(&params) {
            self.index.record_failed_generation(file, metadata, persist);
            return Err(e.into());
        }
        self.index
            .record_generation(file, Some(metadata), persist)?;
        info!(
            path = %file.relative_path,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generated thumbnail"
        );
        Ok(())
    }

    /// Generate-if-stale over the whole tree, flushing the index once at the end.
    pub fn generate_all(&self, source_root: &Path) -> Result<BulkReport, ScanError> {
        let files = scan::scan_tree(source_root)?;
        info!(files = files.len(), "generating thumbnails");

        let generated = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        files.par_iter().for_each(|file| {
            if self.index.is_up_to_date(file) {
                skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            match self.generate(file, Persist::Deferred) {
                Ok(()) => {
                    let done = generated.fetch_add(1, Ordering::Relaxed) + 1;
                    if done % BULK_PROGRESS_EVERY == 0 {
                        info!(generated = done, total = files.len(), "generation progress");
                    }
                }
                Err(e) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                    warn!(path = %file.relative_path, error = %e, "thumbnail generation failed");
                }
            }
        });

        self.index.flush_logged();
        let report = BulkReport {
            total: files.len(),
            generated: generated.into_inner(),
            skipped: skipped.into_inner(),
            failed: failed.into_inner(),
        };
        info!(%report, "bulk generation finished");
        Ok(report)
    }
}
