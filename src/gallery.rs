//! The control and query surface.
//!
//! [`Gallery`] is the one service instance a process constructs. It owns the
//! staleness index, the generator, the listing cache and the watch daemon,
//! loads the index on construction and flushes it on [`Gallery::shutdown`].
//! Everything an HTTP layer or the CLI needs goes through it.
//!
//! Read operations generate thumbnails on demand, but only for the items they
//! return: a page of 20 images costs at most 20 staleness checks.
//!
//! ## Search grammar
//!
//! `list_images` accepts `dir="travel"&keyword="beach"`. Values may be quoted.
//! `dir` matches a substring of the relative path, `keyword` matches a
//! case-insensitive substring. A search string without any `key=value` pair
//! is taken as a keyword.

use crate::config::{ConfigError, DaemonConfig};
use crate::daemon::{DaemonStatus, WatchDaemon};
use crate::generate::Generator;
use crate::imaging::{ImageBackend, RustBackend};
use crate::index::{IndexError, IndexSettings, IndexStats, StalenessIndex};
use crate::listing::ListingCache;
use crate::metadata::ImageMetadata;
use crate::naming::ThumbnailId;
use crate::scan::{self, ROOT_DIRECTORY, ScanError, SourceFile};
use crate::types::{
    CategoryItem, CategorySummary, FolderSummary, Health, ImageItem, Page, Pagination,
    RefreshReport, ThumbnailData,
};
use crate::watcher::{FileWatcher, NotifyWatcher, WatchError};
use chrono::Utc;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Component, Path};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

pub const DEFAULT_PAGE_LIMIT: usize = 20;

/// Thumbnail extensions probed by [`Gallery::thumbnail_bytes`], in order.
const THUMBNAIL_PROBES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("webp", "image/webp"),
    ("png", "image/png"),
];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// 1-based page selection. Always at least page 1 with one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: usize,
    limit: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PageRequest {
    /// Zero values fall back to the first page and at least one item.
    pub fn new(page: usize, limit: usize) -> Self {
        Self {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn window<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let limit = self.limit.max(1);
        let start = self.page.saturating_sub(1).saturating_mul(limit).min(items.len());
        let end = start.saturating_add(limit).min(items.len());
        &items[start..end]
    }

    fn pagination(&self, total: usize) -> Pagination {
        Pagination::new(self.page, self.limit, total)
    }
}

/// Parsed `list_images` filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSearch {
    pub dir: Option<String>,
    pub keyword: Option<String>,
}

impl ImageSearch {
    pub fn parse(search: &str) -> Self {
        let search = search.trim();
        if search.is_empty() {
            return Self::default();
        }
        if !search.contains('=') {
            return Self {
                dir: None,
                keyword: Some(search.to_string()),
            };
        }

        let mut parsed = Self::default();
        for pair in search.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');
            if value.is_empty() {
                continue;
            }
            match key.trim() {
                "dir" => parsed.dir = Some(value.to_string()),
                "keyword" => parsed.keyword = Some(value.to_string()),
                _ => {}
            }
        }
        parsed
    }

    pub fn matches(&self, file: &SourceFile) -> bool {
        if let Some(dir) = &self.dir
            && !file.relative_path.contains(dir.as_str())
        {
            return false;
        }
        if let Some(keyword) = &self.keyword
            && !file
                .relative_path
                .to_lowercase()
                .contains(&keyword.to_lowercase())
        {
            return false;
        }
        true
    }
}

pub struct Gallery {
    config: DaemonConfig,
    generator: Generator,
    listing: Arc<ListingCache>,
    daemon: WatchDaemon,
    started: Instant,
}

impl Gallery {
    /// Build the service with the image-crate backend and OS file watching.
    pub fn open(config: DaemonConfig) -> Result<Self, GalleryError> {
        config.validate()?;
        let watcher = NotifyWatcher::new(config.watcher.settle(), config.watcher.poll());
        Ok(Self::with_parts(
            config,
            Arc::new(RustBackend::new()),
            Box::new(watcher),
        ))
    }

    pub fn with_parts(
        config: DaemonConfig,
        backend: Arc<dyn ImageBackend>,
        watcher: Box<dyn FileWatcher>,
    ) -> Self {
        let index = Arc::new(StalenessIndex::load(
            IndexSettings::from_config(&config),
            backend.clone(),
        ));
        let generator = Generator::new(index, backend, &config.thumbnails);
        let listing = Arc::new(ListingCache::new(config.listing.ttl()));
        let daemon = WatchDaemon::new(
            config.source_dir.clone(),
            generator.clone(),
            listing.clone(),
            watcher,
        );
        Self {
            config,
            generator,
            listing,
            daemon,
            started: Instant::now(),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<StalenessIndex> {
        self.generator.index()
    }

    pub fn daemon(&self) -> &WatchDaemon {
        &self.daemon
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Apply the `[daemon]` startup settings. Failures are logged, not fatal.
    ///
    /// Returns the background generation handle when one was started.
    pub fn startup(&self) -> Option<JoinHandle<()>> {
        let startup = &self.config.daemon;
        if startup.watch_on_start {
            if let Err(e) = self.daemon.start() {
                error!(error = %e, "failed to start watch daemon");
            }
            if self.daemon.is_watching() {
                return None;
            }
        }
        if startup.generate_on_start {
            match self.generate_all() {
                Ok(handle) => return Some(handle),
                Err(e) => error!(error = %e, "failed to start background generation"),
            }
        }
        None
    }

    /// Stop watching and persist the index.
    pub fn shutdown(&self) -> Result<(), GalleryError> {
        self.daemon.stop();
        self.index().flush()?;
        info!("shutdown complete");
        Ok(())
    }

    // =========================================================================
    // Listings
    // =========================================================================

    fn all_images(&self) -> Result<Arc<Vec<SourceFile>>, GalleryError> {
        Ok(self
            .listing
            .images(|| scan::scan_tree(&self.config.source_dir))?)
    }

    fn categories(&self) -> Result<Arc<Vec<String>>, GalleryError> {
        Ok(self
            .listing
            .categories(|| scan::subdirectories(&self.config.source_dir))?)
    }

    fn items_of(
        &self,
        category: &str,
        images: &[SourceFile],
    ) -> Result<Arc<Vec<String>>, GalleryError> {
        Ok(self
            .listing
            .category_items(category, || Ok(item_names(category, images)))?)
    }

    fn require_category(&self, category: &str) -> Result<(), GalleryError> {
        if self.categories()?.iter().any(|c| c == category) {
            Ok(())
        } else {
            Err(GalleryError::NotFound(format!("category {category}")))
        }
    }

    fn is_cover(&self, file: &SourceFile) -> bool {
        let stem = file.stem().to_lowercase();
        self.config
            .folders
            .cover_names
            .iter()
            .any(|name| name.to_lowercase() == stem)
    }

    /// Cover images first, then by path.
    fn sort_for_display(&self, files: &mut [&SourceFile]) {
        files.sort_by(|a, b| {
            self.is_cover(b)
                .cmp(&self.is_cover(a))
                .then_with(|| a.relative_path.cmp(&b.relative_path))
        });
    }

    /// Build the response item, generating the thumbnail first if stale.
    fn image_item(&self, file: &SourceFile) -> ImageItem {
        if let Err(e) = self.generator.ensure(file) {
            warn!(path = %file.relative_path, error = %e, "on-demand generation failed");
        }
        let metadata = match self.index().lookup_metadata(file) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(path = %file.relative_path, error = %e, "metadata unavailable");
                None
            }
        };
        let id = ThumbnailId::from_relative_path(&file.relative_path);
        ImageItem {
            thumbnail: id.thumbnail_file_name(),
            id,
            relative_path: file.relative_path.clone(),
            directory: file.directory.clone(),
            metadata,
        }
    }

    fn image_items(&self, files: &[&SourceFile]) -> Vec<ImageItem> {
        files.par_iter().map(|f| self.image_item(f)).collect()
    }

    /// Images sorted by path, filtered by `search`, one page at a time.
    pub fn list_images(
        &self,
        search: Option<&str>,
        request: PageRequest,
    ) -> Result<Page<ImageItem>, GalleryError> {
        let images = self.all_images()?;
        let search = search.map(ImageSearch::parse).unwrap_or_default();
        let matching: Vec<&SourceFile> = images.iter().filter(|f| search.matches(f)).collect();
        Ok(Page {
            items: self.image_items(request.window(&matching)),
            pagination: request.pagination(matching.len()),
        })
    }

    /// One summary per directory that directly contains images.
    pub fn list_folders(&self, search: Option<&str>) -> Result<Vec<FolderSummary>, GalleryError> {
        let images = self.all_images()?;
        let needle = search.map(str::trim).filter(|s| !s.is_empty());

        let mut folders: BTreeMap<&str, Vec<&SourceFile>> = BTreeMap::new();
        for file in images.iter() {
            if let Some(needle) = needle
                && !file.relative_path.contains(needle)
                && !file.directory.contains(needle)
            {
                continue;
            }
            folders.entry(file.directory.as_str()).or_default().push(file);
        }

        let preview_count = self.config.folders.preview_count;
        let summaries = folders
            .into_iter()
            .filter_map(|(directory, mut files)| {
                self.sort_for_display(&mut files);
                let shown = &files[..files.len().min(preview_count + 1)];
                let mut items = self.image_items(shown).into_iter();
                let main_image = items.next()?;
                Some(FolderSummary {
                    directory: directory.to_string(),
                    display_name: display_name(directory),
                    image_count: files.len(),
                    main_image,
                    preview_images: items.collect(),
                    has_more: files.len() > preview_count + 1,
                })
            })
            .collect();
        Ok(summaries)
    }

    /// Top-level directories with their item and image counts.
    pub fn list_categories(&self) -> Result<Vec<CategorySummary>, GalleryError> {
        let names = self.categories()?;
        let images = self.all_images()?;
        names
            .iter()
            .map(|name| {
                let items = self.items_of(name, &images)?;
                Ok(CategorySummary {
                    name: name.clone(),
                    item_count: items.len(),
                    image_count: images
                        .iter()
                        .filter(|f| f.category() == Some(name.as_str()))
                        .count(),
                })
            })
            .collect()
    }

    pub fn list_category_items(
        &self,
        category: &str,
        search: Option<&str>,
        request: PageRequest,
    ) -> Result<Page<CategoryItem>, GalleryError> {
        self.require_category(category)?;
        let images = self.all_images()?;
        let names = self.items_of(category, &images)?;
        let needle = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        let matching: Vec<&String> = names
            .iter()
            .filter(|name| {
                needle
                    .as_deref()
                    .is_none_or(|n| name.to_lowercase().contains(n))
            })
            .collect();

        let items = request
            .window(&matching)
            .par_iter()
            .map(|name| {
                let mut files = item_files(category, name, &images);
                self.sort_for_display(&mut files);
                CategoryItem {
                    name: name.to_string(),
                    category: category.to_string(),
                    image_count: files.len(),
                    main_image: files.first().map(|f| self.image_item(f)),
                }
            })
            .collect();
        Ok(Page {
            items,
            pagination: request.pagination(matching.len()),
        })
    }

    pub fn list_item_images(
        &self,
        category: &str,
        item: &str,
        request: PageRequest,
    ) -> Result<Page<ImageItem>, GalleryError> {
        self.require_category(category)?;
        let images = self.all_images()?;
        if !self.items_of(category, &images)?.iter().any(|n| n == item) {
            return Err(GalleryError::NotFound(format!("item {category}/{item}")));
        }
        let files = item_files(category, item, &images);
        Ok(Page {
            items: self.image_items(request.window(&files)),
            pagination: request.pagination(files.len()),
        })
    }

    // =========================================================================
    // Lookups by id
    // =========================================================================

    /// Resolve an id to a source file under the root.
    fn resolve(&self, id: &str) -> Result<SourceFile, GalleryError> {
        let not_found = || GalleryError::NotFound(id.to_string());
        let id: ThumbnailId = id.parse().map_err(|_| not_found())?;
        let relative = id.relative_path().map_err(|_| not_found())?;
        if !Path::new(&relative)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(not_found());
        }
        let root = &self.config.source_dir;
        scan::source_file_for(root, &root.join(&relative)).ok_or_else(not_found)
    }

    pub fn thumbnail_bytes(&self, id: &str) -> Result<ThumbnailData, GalleryError> {
        let thumbnail_id: ThumbnailId = id
            .parse()
            .map_err(|_| GalleryError::NotFound(id.to_string()))?;
        let dir = self.config.thumbnails_dir();
        for &(ext, content_type) in THUMBNAIL_PROBES {
            let file_name = thumbnail_id.file_name_with_extension(ext);
            match fs::read(dir.join(&file_name)) {
                Ok(bytes) => {
                    return Ok(ThumbnailData {
                        bytes,
                        content_type,
                        file_name,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(GalleryError::NotFound(format!("thumbnail {id}")))
    }

    pub fn metadata(&self, id: &str) -> Result<ImageMetadata, GalleryError> {
        let file = self.resolve(id)?;
        self.index().lookup_metadata(&file).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                GalleryError::NotFound(file.relative_path.clone())
            } else {
                e.into()
            }
        })
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Drop the listing cache and rescan.
    pub fn refresh(&self) -> Result<RefreshReport, GalleryError> {
        self.listing.invalidate_all();
        let report = RefreshReport {
            images: self.all_images()?.len(),
            categories: self.categories()?.len(),
        };
        info!(images = report.images, categories = report.categories, "listing refreshed");
        Ok(report)
    }

    pub fn daemon_status(&self) -> DaemonStatus {
        self.daemon.status()
    }

    pub fn start_daemon(&self) -> Result<(), GalleryError> {
        Ok(self.daemon.start()?)
    }

    pub fn stop_daemon(&self) {
        self.daemon.stop();
    }

    /// Run generate-if-stale over the whole tree on a background thread.
    pub fn generate_all(&self) -> Result<JoinHandle<()>, GalleryError> {
        let generator = self.generator.clone();
        let listing = self.listing.clone();
        let root = self.config.source_dir.clone();
        let handle = thread::Builder::new()
            .name("thumbd-generate".into())
            .spawn(move || {
                match generator.generate_all(&root) {
                    Ok(report) => info!(%report, "background generation finished"),
                    Err(e) => error!(error = %e, "background generation failed"),
                }
                listing.invalidate_all();
            })?;
        info!("background generation started");
        Ok(handle)
    }

    /// Re-derive the index from thumbnails on disk. Returns the entry count.
    pub fn rebuild_index(&self) -> Result<usize, GalleryError> {
        let count = self.index().rebuild(&self.config.source_dir)?;
        self.listing.invalidate_all();
        Ok(count)
    }

    pub fn index_stats(&self) -> IndexStats {
        self.index().stats()
    }

    pub fn health(&self) -> Health {
        Health {
            status: "healthy",
            timestamp: Utc::now(),
            uptime_secs: self.started.elapsed().as_secs(),
            watching: self.daemon.is_watching(),
        }
    }
}

fn display_name(directory: &str) -> String {
    if directory == ROOT_DIRECTORY {
        return "Root".to_string();
    }
    directory
        .rsplit('/')
        .next()
        .unwrap_or(directory)
        .to_string()
}

/// Names of the subfolders of `category` that contain images, sorted.
fn item_names(category: &str, images: &[SourceFile]) -> Vec<String> {
    let prefix = format!("{category}/");
    images
        .iter()
        .filter_map(|f| f.relative_path.strip_prefix(&prefix))
        .filter_map(|rest| rest.split_once('/').map(|(item, _)| item.to_string()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Images anywhere below `category/item/`, in path order.
fn item_files<'a>(category: &str, item: &str, images: &'a [SourceFile]) -> Vec<&'a SourceFile> {
    let prefix = format!("{category}/{item}/");
    images
        .iter()
        .filter(|f| f.relative_path.starts_with(&prefix))
        .collect()
}
