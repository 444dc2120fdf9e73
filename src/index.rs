//! Staleness index: the record of which thumbnails are still valid.
//!
//! Generating a thumbnail means decoding and re-encoding the full source
//! image, which is by far the most expensive thing the daemon does. This
//! module lets every caller decide, from a `stat` alone, whether a previously
//! generated thumbnail still matches its source file.
//!
//! # Design
//!
//! The index maps each source file's root-relative path to an [`IndexEntry`]
//! holding the file's staleness signature at the time of generation, the
//! thumbnail file name, and cached [`ImageMetadata`].
//!
//! ## Validity
//!
//! An entry is valid for the file currently on disk iff all of:
//! 1. `modTime` equals the file's current mtime (milliseconds)
//! 2. `fileSize` equals the file's current size
//! 3. a thumbnail was recorded and the file exists
//! 4. the thumbnail file is at least `min_thumbnail_bytes` long
//!
//! Generation and indexing are two separate steps. The signature recorded is
//! the one read *before* the encode, so a crash or a concurrent write between
//! the steps can only leave an entry looking stale, never falsely valid.
//!
//! ## Storage
//!
//! The table is mirrored to `<cache_dir>/thumbnail-index.json`:
//!
//! ```json
//! {
//!   "version": 1,
//!   "entries": {
//!     "a/1.jpg": {
//!       "modTime": 1718000000000,
//!       "fileSize": 48213,
//!       "thumbnailFile": "YS8xLmpwZw.jpg",
//!       "metadata": { "filename": "1.jpg", "width": 500, ... },
//!       "createdAt": 1718000001000,
//!       "updatedAt": 1718000001000
//!     }
//!   }
//! }
//! ```
//!
//! The file is a crash-recovery snapshot, not a live store. It is written
//! every `flush_every` mutations, and always after a deletion, a rebuild, or
//! an explicit [`StalenessIndex::flush`]. Writes go to a temp file and are
//! renamed into place. A missing, corrupt or wrong-version file loads as an
//! empty index; a failed write is logged and the in-memory table kept.

use crate::config::DaemonConfig;
use crate::imaging::ImageBackend;
use crate::metadata::{self, FileSignature, ImageMetadata};
use crate::naming::ThumbnailId;
use crate::scan::{self, ScanError, SourceFile};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Version of the persisted document. Bump to discard existing indexes when
/// the entry format changes.
const INDEX_VERSION: u32 = 1;

const REBUILD_PROGRESS_EVERY: usize = 50;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("Unsupported index version {0}")]
    UnsupportedVersion(u32),
}

/// State of one source file at its last successful thumbnail generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    /// Source mtime, milliseconds since the Unix epoch.
    pub mod_time: i64,
    pub file_size: u64,
    /// Basename of the thumbnail inside the thumbnails directory. `None` when
    /// the last attempt failed to produce one.
    #[serde(default)]
    pub thumbnail_file: Option<String>,
    #[serde(default)]
    pub metadata: Option<ImageMetadata>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl IndexEntry {
    fn new(
        relative_path: &str,
        metadata: ImageMetadata,
        has_thumbnail: bool,
        created_at: i64,
        now: i64,
    ) -> Self {
        let signature = metadata.signature();
        Self {
            mod_time: signature.mod_time,
            file_size: signature.size,
            thumbnail_file: has_thumbnail
                .then(|| ThumbnailId::from_relative_path(relative_path).thumbnail_file_name()),
            metadata: Some(metadata),
            created_at,
            updated_at: now,
        }
    }

    fn matches(&self, signature: &FileSignature) -> bool {
        self.mod_time == signature.mod_time && self.file_size == signature.size
    }
}

/// When a recorded mutation is written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persist {
    /// Counts towards the every-Nth-mutation flush.
    Periodic,
    /// Left for the caller to flush, used by bulk operations.
    Deferred,
}

#[derive(Deserialize)]
struct IndexDocument {
    version: u32,
    entries: BTreeMap<String, IndexEntry>,
}

#[derive(Serialize)]
struct IndexDocumentRef<'a> {
    version: u32,
    entries: &'a BTreeMap<String, IndexEntry>,
}

/// Where the index lives and how strict it is.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub index_file: PathBuf,
    pub thumbnails_dir: PathBuf,
    pub min_thumbnail_bytes: u64,
    pub flush_every: usize,
}

impl IndexSettings {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            index_file: config.index_file(),
            thumbnails_dir: config.thumbnails_dir(),
            min_thumbnail_bytes: config.thumbnails.min_bytes,
            flush_every: config.index.flush_every.max(1),
        }
    }
}

/// Process-wide staleness index. Shared behind an `Arc`; all methods take `&self`.
pub struct StalenessIndex {
    entries: RwLock<BTreeMap<String, IndexEntry>>,
    settings: IndexSettings,
    backend: Arc<dyn ImageBackend>,
    mutations: AtomicUsize,
    /// Byte length of the document last loaded or written.
    persisted_bytes: AtomicU64,
    /// Serializes snapshot writes so an older snapshot never replaces a newer one.
    write_lock: Mutex<()>,
}

impl StalenessIndex {
    /// Create an empty index that has not been loaded from disk.
    pub fn empty(settings: IndexSettings, backend: Arc<dyn ImageBackend>) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            settings,
            backend,
            mutations: AtomicUsize::new(0),
            persisted_bytes: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    /// Load the persisted index, or start empty if it is absent or unreadable.
    pub fn load(settings: IndexSettings, backend: Arc<dyn ImageBackend>) -> Self {
        let index = Self::empty(settings, backend);
        let path = &index.settings.index_file;
        match read_document(path) {
            Ok(Some((entries, bytes))) => {
                info!(entries = entries.len(), path = %path.display(), "loaded thumbnail index");
                *index.entries.write() = entries;
                index.persisted_bytes.store(bytes, Ordering::SeqCst);
            }
            Ok(None) => info!(path = %path.display(), "no thumbnail index yet, starting empty"),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read thumbnail index, starting empty")
            }
        }
        index
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    /// Path the thumbnail for `relative_path` is written to.
    pub fn thumbnail_path(&self, relative_path: &str) -> PathBuf {
        self.settings
            .thumbnails_dir
            .join(ThumbnailId::from_relative_path(relative_path).thumbnail_file_name())
    }

    pub fn get(&self, relative_path: &str) -> Option<IndexEntry> {
        self.entries.read().get(relative_path).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Whether the recorded thumbnail is still valid for the file on disk.
    /// See the [module docs](self) for the four conditions.
    pub fn is_up_to_date(&self, file: &SourceFile) -> bool {
        let Some(entry) = self.get(&file.relative_path) else {
            return false;
        };
        let Ok(signature) = FileSignature::read(&file.absolute_path) else {
            return false;
        };
        if !entry.matches(&signature) {
            return false;
        }
        let Some(thumbnail_file) = entry.thumbnail_file else {
            return false;
        };
        let thumbnail = self.settings.thumbnails_dir.join(thumbnail_file);
        fs::metadata(&thumbnail)
            .is_ok_and(|m| m.is_file() && m.len() >= self.settings.min_thumbnail_bytes)
    }

    /// Record a successful generation. Last write wins.
    ///
    /// When `metadata` is supplied its signature is recorded, so callers should
    /// extract it before encoding. Otherwise metadata is extracted now.
    pub fn record_generation(
        &self,
        file: &SourceFile,
        metadata: Option<ImageMetadata>,
        persist: Persist,
    ) -> Result<(), IndexError> {
        let metadata = match metadata {
            Some(m) => m,
            None => metadata::extract(self.backend.as_ref(), &file.absolute_path)?,
        };
        self.insert(file, metadata, true, persist);
        Ok(())
    }

    /// Record metadata for a file whose thumbnail could not be generated.
    /// The entry never validates until a later generation succeeds.
    pub fn record_failed_generation(
        &self,
        file: &SourceFile,
        metadata: ImageMetadata,
        persist: Persist,
    ) {
        self.insert(file, metadata, false, persist);
    }

    fn insert(&self, file: &SourceFile, metadata: ImageMetadata, has_thumbnail: bool, persist: Persist) {
        let now = Utc::now().timestamp_millis();
        {
            let mut entries = self.entries.write();
            let created_at = entries
                .get(&file.relative_path)
                .map_or(now, |e| e.created_at);
            entries.insert(
                file.relative_path.clone(),
                IndexEntry::new(&file.relative_path, metadata, has_thumbnail, created_at, now),
            );
        }
        if persist == Persist::Periodic {
            self.note_mutation();
        }
    }

    fn note_mutation(&self) {
        let count = self.mutations.fetch_add(1, Ordering::SeqCst) + 1;
        if count % self.settings.flush_every == 0 {
            self.flush_logged();
        }
    }

    /// Metadata for the file on disk, from the cache when it still matches.
    ///
    /// A cache miss re-extracts and refreshes the cached copy in place. The
    /// entry's staleness signature is left alone, so this never makes an old
    /// thumbnail look valid.
    pub fn lookup_metadata(&self, file: &SourceFile) -> io::Result<ImageMetadata> {
        let signature = FileSignature::read(&file.absolute_path)?;
        let cached = self
            .entries
            .read()
            .get(&file.relative_path)
            .and_then(|e| e.metadata.clone());
        if let Some(cached) = cached
            && cached.signature() == signature
        {
            return Ok(cached);
        }

        let fresh = metadata::extract(self.backend.as_ref(), &file.absolute_path)?;
        if let Some(entry) = self.entries.write().get_mut(&file.relative_path) {
            debug!(path = %file.relative_path, "refreshed cached metadata");
            entry.metadata = Some(fresh.clone());
        }
        Ok(fresh)
    }

    /// Delete the entry for `relative_path` and persist immediately.
    pub fn remove(&self, relative_path: &str) -> Option<IndexEntry> {
        let removed = self.entries.write().remove(relative_path);
        if removed.is_some() {
            self.flush_logged();
        }
        removed
    }

    /// Delete every entry below the directory `relative_dir`, persisting once.
    /// Returns the removed paths.
    pub fn remove_under(&self, relative_dir: &str) -> Vec<String> {
        let prefix = format!("{}/", relative_dir.trim_end_matches('/'));
        let removed: Vec<String> = {
            let mut entries = self.entries.write();
            let keys: Vec<String> = entries
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                entries.remove(key);
            }
            keys
        };
        if !removed.is_empty() {
            self.flush_logged();
        }
        removed
    }

    /// Paths of every indexed file, sorted.
    pub fn relative_paths(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Discard the table and re-derive it from thumbnails already on disk.
    ///
    /// Every scanned file whose thumbnail exists gets a fresh entry built from
    /// newly extracted metadata. Nothing is generated. Returns the entry count.
    pub fn rebuild(&self, source_root: &Path) -> Result<usize, IndexError> {
        let files = scan::scan_tree(source_root)?;
        info!(files = files.len(), "rebuilding thumbnail index");

        let progress = AtomicUsize::new(0);
        let now = Utc::now().timestamp_millis();
        let rebuilt: BTreeMap<String, IndexEntry> = files
            .par_iter()
            .filter_map(|file| {
                if !self.thumbnail_path(&file.relative_path).is_file() {
                    return None;
                }
                let metadata = match metadata::extract(self.backend.as_ref(), &file.absolute_path)
                {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(path = %file.relative_path, error = %e, "skipping file during rebuild");
                        return None;
                    }
                };
                let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
                if done % REBUILD_PROGRESS_EVERY == 0 {
                    info!(rebuilt = done, total = files.len(), "rebuild progress");
                }
                Some((
                    file.relative_path.clone(),
                    IndexEntry::new(&file.relative_path, metadata, true, now, now),
                ))
            })
            .collect();

        let count = rebuilt.len();
        *self.entries.write() = rebuilt;
        self.mutations.store(0, Ordering::SeqCst);
        self.flush_logged();
        info!(entries = count, "thumbnail index rebuilt");
        Ok(count)
    }

    /// Write the current table to disk.
    pub fn flush(&self) -> Result<(), IndexError> {
        let _guard = self.write_lock.lock();
        let (json, count) = {
            let entries = self.entries.read();
            let doc = IndexDocumentRef {
                version: INDEX_VERSION,
                entries: &entries,
            };
            (serde_json::to_string_pretty(&doc)?, entries.len())
        };

        let path = &self.settings.index_file;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(path).map_err(|e| IndexError::Io(e.error))?;
        self.persisted_bytes
            .store(json.len() as u64, Ordering::SeqCst);
        debug!(entries = count, path = %path.display(), "thumbnail index saved");
        Ok(())
    }

    /// Flush, logging instead of propagating a failure.
    pub fn flush_logged(&self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, path = %self.settings.index_file.display(), "failed to save thumbnail index");
        }
    }

    pub fn stats(&self) -> IndexStats {
        let snapshot: Vec<IndexEntry> = self.entries.read().values().cloned().collect();

        let total_entries = snapshot.len();
        let entries_with_metadata = snapshot.iter().filter(|e| e.metadata.is_some()).count();
        let entries_with_thumbnails = snapshot
            .iter()
            .filter_map(|e| e.thumbnail_file.as_ref())
            .filter(|name| self.settings.thumbnails_dir.join(name).is_file())
            .count();
        let oldest_entry = snapshot.iter().map(|e| e.created_at).min();
        let newest_entry = snapshot.iter().map(|e| e.updated_at.max(e.created_at)).max();
        let cache_hit_ratio = if total_entries == 0 {
            0.0
        } else {
            entries_with_metadata as f64 / total_entries as f64
        };

        IndexStats {
            total_entries,
            entries_with_metadata,
            entries_with_thumbnails,
            oldest_entry,
            newest_entry,
            cache_hit_ratio,
            index_file: self.settings.index_file.clone(),
            index_size: self.persisted_bytes.load(Ordering::SeqCst),
        }
    }
}

/// Entries of the persisted document and its length in bytes.
fn read_document(path: &Path) -> Result<Option<(BTreeMap<String, IndexEntry>, u64)>, IndexError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let doc: IndexDocument = serde_json::from_str(&content)?;
    if doc.version != INDEX_VERSION {
        return Err(IndexError::UnsupportedVersion(doc.version));
    }
    Ok(Some((doc.entries, content.len() as u64)))
}

/// Summary of the index for status and stats reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub total_entries: usize,
    pub entries_with_metadata: usize,
    /// Entries whose thumbnail file is present on disk.
    pub entries_with_thumbnails: usize,
    /// Earliest `createdAt`, milliseconds since the epoch.
    pub oldest_entry: Option<i64>,
    /// Latest `updatedAt`, milliseconds since the epoch.
    pub newest_entry: Option<i64>,
    /// `entries_with_metadata / total_entries`, 0 for an empty index.
    pub cache_hit_ratio: f64,
    pub index_file: PathBuf,
    /// Size of the document as last loaded or saved, 0 if never persisted.
    pub index_size: u64,
}

impl fmt::Display for IndexStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries, {} with metadata ({:.0}%), {} with thumbnails",
            self.total_entries,
            self.entries_with_metadata,
            self.cache_hit_ratio * 100.0,
            self.entries_with_thumbnails
        )
    }
}
