//! Directory scanning.
//!
//! Walks the source tree and yields every qualifying image file. A file
//! qualifies when its extension is on the allow-list (case-insensitive) and
//! neither it nor any directory above it is hidden (name starts with `.`).
//!
//! ```text
//! images/                     relative_path        directory
//! ├── cover.jpg               cover.jpg            /
//! ├── .drafts/                (skipped)
//! └── travel/
//!     ├── kyoto/
//!     │   └── main.png        travel/kyoto/main.png travel/kyoto
//!     └── notes.txt           (not an image)
//! ```
//!
//! Unreadable subdirectories are logged and skipped; only a missing or
//! unreadable root fails the scan. Output order is unspecified, callers sort
//! when they need a stable presentation order.

use crate::naming::normalize_relative_path;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

/// Lowercase extensions of files treated as images.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff"];

/// `directory` value of files directly under the root.
pub const ROOT_DIRECTORY: &str = "/";

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Source directory not found: {0}")]
    MissingRoot(PathBuf),
}

/// An image file discovered under the source root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Root-relative, forward-slash path. The index key.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    /// Relative parent directory, [`ROOT_DIRECTORY`] for top-level files.
    pub directory: String,
}

impl SourceFile {
    /// Build from a root-relative path, without touching the filesystem.
    pub fn new(root: &Path, relative_path: &str) -> Self {
        Self {
            relative_path: relative_path.to_string(),
            absolute_path: root.join(relative_path),
            directory: directory_of(relative_path),
        }
    }

    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit_once('/')
            .map_or(self.relative_path.as_str(), |(_, name)| name)
    }

    /// File name without its extension.
    pub fn stem(&self) -> &str {
        let name = self.file_name();
        name.rsplit_once('.').map_or(name, |(stem, _)| stem)
    }

    /// Top-level directory containing this file, if it is not at the root.
    pub fn category(&self) -> Option<&str> {
        self.relative_path.split_once('/').map(|(first, _)| first)
    }
}

fn directory_of(relative_path: &str) -> String {
    match relative_path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => ROOT_DIRECTORY.to_string(),
    }
}

/// Whether `path` has an allow-listed image extension.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| e.eq_ignore_ascii_case(supported))
        })
}

pub fn is_hidden(name: &OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

/// Recursively enumerate the image files under `root`.
pub fn scan_tree(root: &Path) -> Result<Vec<SourceFile>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::MissingRoot(root.to_path_buf()));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if err.depth() == 0 {
                    return Err(ScanError::Io(err.into()));
                }
                warn!(
                    path = %err.path().map(|p| p.display().to_string()).unwrap_or_default(),
                    error = %err,
                    "skipping unreadable entry"
                );
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_supported_image(entry.path()) {
            continue;
        }
        if let Some(file) = source_file_for(root, entry.path()) {
            files.push(file);
        }
    }

    Ok(files)
}

/// Map an absolute path under `root` to a [`SourceFile`].
///
/// Returns `None` when the path is outside the root, hidden, or not an image.
/// Existence is not checked, so this also resolves paths of deleted files.
pub fn source_file_for(root: &Path, path: &Path) -> Option<SourceFile> {
    let relative = path.strip_prefix(root).ok()?;
    if relative.iter().any(is_hidden) || !is_supported_image(relative) {
        return None;
    }
    let relative_path = normalize_relative_path(relative)?;
    if relative_path.is_empty() {
        return None;
    }
    Some(SourceFile {
        directory: directory_of(&relative_path),
        relative_path,
        absolute_path: path.to_path_buf(),
    })
}

/// Names of the visible directories directly under `dir`, sorted.
pub fn subdirectories(dir: &Path) -> Result<Vec<String>, ScanError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if is_hidden(&entry.file_name()) || !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn sorted_paths(files: &[SourceFile]) -> Vec<&str> {
        let mut paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        paths.sort();
        paths
    }

    // =========================================================================
    // scan_tree
    // =========================================================================

    #[test]
    fn scan_finds_nested_images() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "top.jpg");
        touch(tmp.path(), "a/1.png");
        touch(tmp.path(), "a/b/2.webp");

        let files = scan_tree(tmp.path()).unwrap();
        assert_eq!(sorted_paths(&files), vec!["a/1.png", "a/b/2.webp", "top.jpg"]);
    }

    #[test]
    fn scan_sets_directory_and_absolute_path() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "top.jpg");
        touch(tmp.path(), "a/b/2.gif");

        let files = scan_tree(tmp.path()).unwrap();
        let top = files.iter().find(|f| f.relative_path == "top.jpg").unwrap();
        assert_eq!(top.directory, "/");
        assert_eq!(top.absolute_path, tmp.path().join("top.jpg"));

        let nested = files.iter().find(|f| f.relative_path == "a/b/2.gif").unwrap();
        assert_eq!(nested.directory, "a/b");
    }

    #[test]
    fn scan_ignores_unsupported_extensions() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "notes.txt");
        touch(tmp.path(), "raw.cr2");
        touch(tmp.path(), "ok.TIFF");
        touch(tmp.path(), "ok.Jpeg");

        let files = scan_tree(tmp.path()).unwrap();
        assert_eq!(sorted_paths(&files), vec!["ok.Jpeg", "ok.TIFF"]);
    }

    #[test]
    fn scan_skips_hidden_files_and_directories() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), ".hidden.jpg");
        touch(tmp.path(), ".cache/x.jpg");
        touch(tmp.path(), "a/.y.png");
        touch(tmp.path(), "a/visible.png");

        let files = scan_tree(tmp.path()).unwrap();
        assert_eq!(sorted_paths(&files), vec!["a/visible.png"]);
    }

    #[test]
    fn scan_missing_root_is_error() {
        let tmp = TempDir::new().unwrap();
        let result = scan_tree(&tmp.path().join("nope"));
        assert!(matches!(result, Err(ScanError::MissingRoot(_))));
    }

    #[cfg(unix)]
    #[test]
    fn scan_skips_unreadable_subdirectory() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "ok/1.jpg");
        touch(tmp.path(), "locked/2.jpg");
        let locked = tmp.path().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let result = scan_tree(tmp.path());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let files = result.unwrap();
        assert!(files.iter().any(|f| f.relative_path == "ok/1.jpg"));
    }

    // =========================================================================
    // source_file_for / SourceFile helpers
    // =========================================================================

    #[test]
    fn source_file_for_resolves_deleted_paths() {
        let root = Path::new("/srv/images");
        let file = source_file_for(root, &root.join("a/gone.jpg")).unwrap();
        assert_eq!(file.relative_path, "a/gone.jpg");
        assert_eq!(file.directory, "a");
    }

    #[test]
    fn source_file_for_rejects_outside_hidden_and_non_images() {
        let root = Path::new("/srv/images");
        assert!(source_file_for(root, Path::new("/tmp/x.jpg")).is_none());
        assert!(source_file_for(root, &root.join(".git/x.jpg")).is_none());
        assert!(source_file_for(root, &root.join("a/readme.md")).is_none());
        assert!(source_file_for(root, root).is_none());
    }

    #[test]
    fn source_file_name_helpers() {
        let file = SourceFile::new(Path::new("/r"), "travel/kyoto/main.png");
        assert_eq!(file.file_name(), "main.png");
        assert_eq!(file.stem(), "main");
        assert_eq!(file.category(), Some("travel"));
        assert_eq!(file.directory, "travel/kyoto");

        let top = SourceFile::new(Path::new("/r"), "cover.jpg");
        assert_eq!(top.category(), None);
        assert_eq!(top.directory, "/");
    }

    #[test]
    fn subdirectories_sorted_and_visible_only() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "zeta/1.jpg");
        touch(tmp.path(), "alpha/1.jpg");
        touch(tmp.path(), ".hidden/1.jpg");
        touch(tmp.path(), "file.jpg");

        assert_eq!(subdirectories(tmp.path()).unwrap(), vec!["alpha", "zeta"]);
    }
}
