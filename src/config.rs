//! Daemon configuration.
//!
//! Handles loading, validating, and merging `thumbd.toml`. Stock defaults are the
//! base layer; the user's file is merged on top of them key by key, and CLI flags
//! (`--source`, `--cache`) override the merged result.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! source_dir = "images"     # Tree of source images to index
//! cache_dir = "cache"       # Thumbnails + persisted index live here
//!
//! [thumbnails]
//! size = 300                # Square edge length in pixels
//! quality = 80              # JPEG quality (1-100)
//! min_bytes = 1000          # Smaller thumbnail files are treated as broken
//!
//! [index]
//! flush_every = 10          # Persist the index every N mutations
//!
//! [listing]
//! ttl_secs = 3600           # Directory listing cache lifetime
//!
//! [watcher]
//! settle_ms = 2000          # Quiet period before a changed file is processed
//! poll_ms = 100             # How often the watcher worker checks for shutdown
//!
//! [folders]
//! preview_count = 5         # Additional images shown per folder
//! cover_names = ["main", "封面"]
//!
//! [daemon]
//! watch_on_start = true
//! generate_on_start = true
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILENAME: &str = "thumbd.toml";

const THUMBNAILS_SUBDIR: &str = "thumbnails";
const INDEX_FILENAME: &str = "thumbnail-index.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Daemon configuration loaded from `thumbd.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Root of the watched image tree.
    pub source_dir: PathBuf,
    /// Directory holding generated thumbnails and the persisted index.
    pub cache_dir: PathBuf,
    pub thumbnails: ThumbnailsConfig,
    pub index: IndexConfig,
    pub listing: ListingConfig,
    pub watcher: WatcherConfig,
    pub folders: FoldersConfig,
    pub daemon: StartupConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("images"),
            cache_dir: PathBuf::from("cache"),
            thumbnails: ThumbnailsConfig::default(),
            index: IndexConfig::default(),
            listing: ListingConfig::default(),
            watcher: WatcherConfig::default(),
            folders: FoldersConfig::default(),
            daemon: StartupConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thumbnails.quality == 0 || self.thumbnails.quality > 100 {
            return Err(ConfigError::Validation(
                "thumbnails.quality must be 1-100".into(),
            ));
        }
        if self.thumbnails.size == 0 {
            return Err(ConfigError::Validation(
                "thumbnails.size must be non-zero".into(),
            ));
        }
        if self.index.flush_every == 0 {
            return Err(ConfigError::Validation(
                "index.flush_every must be non-zero".into(),
            ));
        }
        if self.watcher.settle_ms == 0 {
            return Err(ConfigError::Validation(
                "watcher.settle_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Directory holding generated thumbnail files.
    pub fn thumbnails_dir(&self) -> PathBuf {
        self.cache_dir.join(THUMBNAILS_SUBDIR)
    }

    /// Location of the persisted index document.
    pub fn index_file(&self) -> PathBuf {
        self.cache_dir.join(INDEX_FILENAME)
    }
}

/// Thumbnail encoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailsConfig {
    /// Edge length of the square thumbnail, in pixels.
    pub size: u32,
    /// JPEG quality, 1-100.
    pub quality: u32,
    /// Thumbnails smaller than this many bytes never count as up to date.
    pub min_bytes: u64,
}

impl Default for ThumbnailsConfig {
    fn default() -> Self {
        Self {
            size: 300,
            quality: 80,
            min_bytes: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    /// Persist the index after every `flush_every` mutations.
    pub flush_every: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { flush_every: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListingConfig {
    pub ttl_secs: u64,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self { ttl_secs: 3600 }
    }
}

impl ListingConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Filesystem watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatcherConfig {
    /// A changed path is processed once it has seen no events for this long.
    pub settle_ms: u64,
    /// How often the watcher worker wakes to check for shutdown.
    pub poll_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            settle_ms: 2000,
            poll_ms: 100,
        }
    }
}

impl WatcherConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(1))
    }
}

/// Folder aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FoldersConfig {
    /// Number of images shown alongside a folder's main image.
    pub preview_count: usize,
    /// File stems (case-insensitive) that are promoted to a folder's main image.
    pub cover_names: Vec<String>,
}

impl Default for FoldersConfig {
    fn default() -> Self {
        Self {
            preview_count: 5,
            cover_names: vec!["main".to_string(), "封面".to_string()],
        }
    }
}

/// What the `watch` command does when it boots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StartupConfig {
    pub watch_on_start: bool,
    pub generate_on_start: bool,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            watch_on_start: true,
            generate_on_start: true,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(DaemonConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Load config from the given file, merged over stock defaults and validated.
///
/// A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<DaemonConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match load_raw_config(path)? {
        Some(overlay) => merge_toml(base, overlay),
        None => base,
    };
    let config: DaemonConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Returns a fully-commented stock `thumbd.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# thumbd configuration
# ====================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# Tree of source images to index and watch.
source_dir = "images"

# Generated thumbnails go to <cache_dir>/thumbnails/, the persisted
# index to <cache_dir>/thumbnail-index.json.
cache_dir = "cache"

# ---------------------------------------------------------------------------
# Thumbnail generation
# ---------------------------------------------------------------------------
[thumbnails]
# Edge length of the square, center-cropped thumbnail.
size = 300

# JPEG encoding quality (1 = worst, 100 = best).
quality = 80

# Thumbnails smaller than this are assumed broken and regenerated.
min_bytes = 1000

# ---------------------------------------------------------------------------
# Staleness index
# ---------------------------------------------------------------------------
[index]
# Write the index to disk after this many updates. Deletions, rebuilds and
# shutdown always write it.
flush_every = 10

# ---------------------------------------------------------------------------
# Directory listing cache
# ---------------------------------------------------------------------------
[listing]
ttl_secs = 3600

# ---------------------------------------------------------------------------
# Watcher
# ---------------------------------------------------------------------------
[watcher]
# A file is processed once no further writes were seen for this long.
settle_ms = 2000
poll_ms = 100

# ---------------------------------------------------------------------------
# Folder view
# ---------------------------------------------------------------------------
[folders]
preview_count = 5
cover_names = ["main", "封面"]

# ---------------------------------------------------------------------------
# Startup behavior of `thumbd watch`
# ---------------------------------------------------------------------------
[daemon]
watch_on_start = true
generate_on_start = true
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = DaemonConfig::default();
        assert_eq!(config.source_dir, PathBuf::from("images"));
        assert_eq!(config.thumbnails.size, 300);
        assert_eq!(config.thumbnails.quality, 80);
        assert_eq!(config.thumbnails.min_bytes, 1000);
        assert_eq!(config.index.flush_every, 10);
        assert_eq!(config.listing.ttl(), Duration::from_secs(3600));
        assert_eq!(config.watcher.settle(), Duration::from_millis(2000));
        assert_eq!(config.folders.preview_count, 5);
    }

    #[test]
    fn derived_paths_live_under_cache_dir() {
        let config = DaemonConfig {
            cache_dir: PathBuf::from("/var/cache/thumbd"),
            ..Default::default()
        };
        assert_eq!(
            config.thumbnails_dir(),
            PathBuf::from("/var/cache/thumbd/thumbnails")
        );
        assert_eq!(
            config.index_file(),
            PathBuf::from("/var/cache/thumbd/thumbnail-index.json")
        );
    }

    #[test]
    fn parse_partial_config() {
        let toml = r##"
[thumbnails]
size = 200
"##;
        let config: DaemonConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.thumbnails.size, 200);
        assert_eq!(config.thumbnails.quality, 80);
        assert_eq!(config.index.flush_every, 10);
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join(CONFIG_FILENAME)).unwrap();
        assert_eq!(config.thumbnails.size, 300);
        assert_eq!(config.cache_dir, PathBuf::from("cache"));
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILENAME);
        fs::write(
            &path,
            r#"
source_dir = "/srv/photos"

[watcher]
settle_ms = 500

[folders]
cover_names = ["cover"]
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.source_dir, PathBuf::from("/srv/photos"));
        assert_eq!(config.watcher.settle_ms, 500);
        assert_eq!(config.watcher.poll_ms, 100);
        assert_eq!(config.folders.cover_names, vec!["cover".to_string()]);
        assert_eq!(config.folders.preview_count, 5);
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILENAME);
        fs::write(&path, "this is not valid toml [[[").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn unknown_key_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILENAME);
        fs::write(&path, "[thumbnails]\nsise = 10\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn load_config_validates_values() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILENAME);
        fs::write(&path, "[thumbnails]\nquality = 0\n").unwrap();
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::Validation(_))
        ));
    }

    // =========================================================================
    // validate tests
    // =========================================================================

    #[test]
    fn validate_default_config_passes() {
        assert!(DaemonConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_size() {
        let mut config = DaemonConfig::default();
        config.thumbnails.size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_flush_interval() {
        let mut config = DaemonConfig::default();
        config.index.flush_every = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_settle_window() {
        let mut config = DaemonConfig::default();
        config.watcher.settle_ms = 0;
        assert!(config.validate().is_err());
    }

    // =========================================================================
    // merge_toml tests
    // =========================================================================

    #[test]
    fn merge_toml_table_merge() {
        let base: toml::Value = toml::from_str("[a]\nx = 1\ny = 2\n").unwrap();
        let overlay: toml::Value = toml::from_str("[a]\ny = 3\n").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["a"]["x"].as_integer(), Some(1));
        assert_eq!(merged["a"]["y"].as_integer(), Some(3));
    }

    #[test]
    fn stock_config_toml_is_valid_and_matches_defaults() {
        let config: DaemonConfig = toml::from_str(stock_config_toml()).unwrap();
        let defaults = DaemonConfig::default();
        assert_eq!(config.thumbnails.size, defaults.thumbnails.size);
        assert_eq!(config.thumbnails.quality, defaults.thumbnails.quality);
        assert_eq!(config.watcher.settle_ms, defaults.watcher.settle_ms);
        assert_eq!(config.folders.cover_names, defaults.folders.cover_names);
    }
}
