//! Shared test utilities for the thumbd test suite.
//!
//! Provides synthetic image writers and a fixture-tree builder so tests never
//! depend on checked-in binary fixtures.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let fx = Fixture::new();
//! fx.jpeg("a/1.jpg", 500, 500);
//! fx.corrupt("a/2.jpg");
//! let config = fx.config();
//! ```

use crate::config::DaemonConfig;
use image::{DynamicImage, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

// =========================================================================
// Synthetic images
// =========================================================================

fn gradient(width: u32, height: u32) -> DynamicImage {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    DynamicImage::ImageRgb8(img)
}

/// Write a valid JPEG with the given dimensions, creating parent directories.
pub fn write_test_jpeg(path: &Path, width: u32, height: u32) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    gradient(width, height)
        .save_with_format(path, image::ImageFormat::Jpeg)
        .unwrap();
}

/// Write a valid PNG with the given dimensions, creating parent directories.
pub fn write_test_png(path: &Path, width: u32, height: u32) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    gradient(width, height)
        .save_with_format(path, image::ImageFormat::Png)
        .unwrap();
}

/// Push a file's mtime forward so its staleness signature changes even when
/// the rewrite lands within the filesystem's timestamp granularity.
pub fn bump_mtime(path: &Path) {
    let file = fs::File::options().write(true).open(path).unwrap();
    let later = SystemTime::now() + Duration::from_secs(5);
    file.set_modified(later).unwrap();
}

// =========================================================================
// Fixture tree
// =========================================================================

/// A temp directory with `images/` (source root) and `cache/` beneath it.
pub struct Fixture {
    pub tmp: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("images")).unwrap();
        Self { tmp }
    }

    pub fn source_dir(&self) -> PathBuf {
        self.tmp.path().join("images")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.tmp.path().join("cache")
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.source_dir().join(rel)
    }

    pub fn jpeg(&self, rel: &str, width: u32, height: u32) -> PathBuf {
        let path = self.path(rel);
        write_test_jpeg(&path, width, height);
        path
    }

    /// Write a file with an image extension but non-image content.
    pub fn corrupt(&self, rel: &str) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"this is not image data at all").unwrap();
        path
    }

    /// Default config pointed at this fixture's directories.
    pub fn config(&self) -> DaemonConfig {
        DaemonConfig {
            source_dir: self.source_dir(),
            cache_dir: self.cache_dir(),
            ..DaemonConfig::default()
        }
    }
}
