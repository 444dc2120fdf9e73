//! Directory-listing cache.
//!
//! Walking the source tree on every request is wasteful, so scan results and
//! the listings derived from them are kept in a short-lived in-memory cache.
//! The cache sits behind the [`TimedCache`] capability so the storage can be
//! swapped (tests use a zero TTL to force reloads).
//!
//! | Key | Value |
//! |---|---|
//! | `all_images` | every scanned [`SourceFile`], sorted by path |
//! | `all_categories` | top-level directory names |
//! | `category_items_<name>` | item (subfolder) names of one category |
//!
//! Entries expire after the configured TTL regardless of in-flight work, and
//! the whole cache is dropped whenever a watch event, refresh or rebuild
//! changes what a listing would return.

use crate::scan::{ScanError, SourceFile};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub const ALL_IMAGES_KEY: &str = "all_images";
pub const ALL_CATEGORIES_KEY: &str = "all_categories";

pub fn category_items_key(category: &str) -> String {
    format!("category_items_{category}")
}

/// Key/value cache whose entries expire after a fixed lifetime.
pub trait TimedCache<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;
    fn set(&self, key: &str, value: V);
    fn invalidate(&self, key: &str);
    fn clear(&self);
}

/// In-memory [`TimedCache`] with a single TTL for every entry.
pub struct TtlCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, V)>>,
}

impl<V> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone + Send> TimedCache<V> for TtlCache<V> {
    fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((stored, value)) if stored.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: V) {
        self.entries
            .lock()
            .insert(key.to_string(), (Instant::now(), value));
    }

    fn invalidate(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// A cached listing.
#[derive(Debug, Clone)]
pub enum CachedListing {
    Images(Arc<Vec<SourceFile>>),
    Names(Arc<Vec<String>>),
}

/// Typed facade over a [`TimedCache`] of listings.
pub struct ListingCache {
    cache: Box<dyn TimedCache<CachedListing>>,
}

impl ListingCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_cache(Box::new(TtlCache::new(ttl)))
    }

    pub fn with_cache(cache: Box<dyn TimedCache<CachedListing>>) -> Self {
        Self { cache }
    }

    /// All scanned images sorted by relative path, loading on a miss.
    pub fn images(
        &self,
        load: impl FnOnce() -> Result<Vec<SourceFile>, ScanError>,
    ) -> Result<Arc<Vec<SourceFile>>, ScanError> {
        if let Some(CachedListing::Images(images)) = self.cache.get(ALL_IMAGES_KEY) {
            return Ok(images);
        }
        let mut images = load()?;
        images.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        let images = Arc::new(images);
        self.cache
            .set(ALL_IMAGES_KEY, CachedListing::Images(images.clone()));
        debug!(count = images.len(), "cached image listing");
        Ok(images)
    }

    pub fn categories(
        &self,
        load: impl FnOnce() -> Result<Vec<String>, ScanError>,
    ) -> Result<Arc<Vec<String>>, ScanError> {
        self.names(ALL_CATEGORIES_KEY, load)
    }

    pub fn category_items(
        &self,
        category: &str,
        load: impl FnOnce() -> Result<Vec<String>, ScanError>,
    ) -> Result<Arc<Vec<String>>, ScanError> {
        self.names(&category_items_key(category), load)
    }

    fn names(
        &self,
        key: &str,
        load: impl FnOnce() -> Result<Vec<String>, ScanError>,
    ) -> Result<Arc<Vec<String>>, ScanError> {
        if let Some(CachedListing::Names(names)) = self.cache.get(key) {
            return Ok(names);
        }
        let names = Arc::new(load()?);
        self.cache.set(key, CachedListing::Names(names.clone()));
        Ok(names)
    }

    pub fn invalidate(&self, key: &str) {
        self.cache.invalidate(key);
    }

    /// Drop every cached listing.
    pub fn invalidate_all(&self) {
        self.cache.clear();
        debug!("listing cache cleared");
    }
}
