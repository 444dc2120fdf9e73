//! Image metadata extraction.
//!
//! [`extract`] stats the file and then asks the [`ImageBackend`] to identify
//! it. Identification is best effort: a corrupt or unsupported file still
//! yields metadata, with `width`/`height` absent and `format` taken from the
//! file extension. Only a failed stat (missing file, permission error) is
//! reported to the caller.
//!
//! The same stat produces the [`FileSignature`], the `(mtime, size)` pair the
//! staleness index compares against.

use crate::imaging::ImageBackend;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Format reported when neither decoding nor the extension tells us anything.
pub const UNKNOWN_FORMAT: &str = "unknown";

/// Descriptive metadata of a source image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: String,
    pub last_modified: DateTime<Utc>,
}

impl ImageMetadata {
    /// Signature of the file state this metadata was extracted from.
    pub fn signature(&self) -> FileSignature {
        FileSignature {
            mod_time: self.last_modified.timestamp_millis(),
            size: self.size,
        }
    }
}

/// Cheap proxy for "file content changed": modification time and byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSignature {
    /// Milliseconds since the Unix epoch.
    pub mod_time: i64,
    pub size: u64,
}

impl FileSignature {
    pub fn read(path: &Path) -> io::Result<Self> {
        let (modified, size) = stat(path)?;
        Ok(Self {
            mod_time: modified.timestamp_millis(),
            size,
        })
    }
}

fn stat(path: &Path) -> io::Result<(DateTime<Utc>, u64)> {
    let meta = fs::metadata(path)?;
    if !meta.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a regular file: {}", path.display()),
        ));
    }
    Ok((DateTime::<Utc>::from(meta.modified()?), meta.len()))
}

/// Extract metadata from the file at `path`.
pub fn extract(backend: &dyn ImageBackend, path: &Path) -> io::Result<ImageMetadata> {
    let (last_modified, size) = stat(path)?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let (width, height, format) = match backend.identify(path) {
        Ok(identified) => (
            Some(identified.dimensions.width),
            Some(identified.dimensions.height),
            identified.format,
        ),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "identify failed, using partial metadata");
            (None, None, extension_format(path))
        }
    };

    Ok(ImageMetadata {
        filename,
        size,
        width,
        height,
        format,
        last_modified,
    })
}

fn extension_format(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| UNKNOWN_FORMAT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::RustBackend;
    use crate::imaging::backend::tests::MockBackend;
    use crate::imaging::Dimensions;
    use crate::test_helpers::write_test_jpeg;
    use tempfile::TempDir;

    #[test]
    fn extract_decodes_dimensions_and_format() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("photo.jpg");
        write_test_jpeg(&path, 320, 200);

        let meta = extract(&RustBackend::new(), &path).unwrap();
        assert_eq!(meta.filename, "photo.jpg");
        assert_eq!(meta.width, Some(320));
        assert_eq!(meta.height, Some(200));
        assert_eq!(meta.format, "jpeg");
        assert_eq!(meta.size, fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn extract_uses_content_not_extension_for_format() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("mislabeled.png");
        write_test_jpeg(&path, 10, 10);

        let meta = extract(&RustBackend::new(), &path).unwrap();
        assert_eq!(meta.format, "jpeg");
    }

    #[test]
    fn extract_corrupt_file_degrades_to_partial_metadata() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.JPG");
        fs::write(&path, b"definitely not a jpeg").unwrap();

        let meta = extract(&RustBackend::new(), &path).unwrap();
        assert_eq!(meta.width, None);
        assert_eq!(meta.height, None);
        assert_eq!(meta.format, "jpg");
        assert_eq!(meta.size, 21);
    }

    #[test]
    fn extract_missing_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let err = extract(&RustBackend::new(), &tmp.path().join("gone.jpg")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn extract_goes_through_backend() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.webp");
        fs::write(&path, b"whatever").unwrap();

        let backend = MockBackend::with_dimensions(Dimensions {
            width: 7,
            height: 9,
        });
        let meta = extract(&backend, &path).unwrap();
        assert_eq!((meta.width, meta.height), (Some(7), Some(9)));
        assert_eq!(backend.identify_count(), 1);
    }

    #[test]
    fn signature_matches_metadata_signature() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.jpg");
        write_test_jpeg(&path, 8, 8);

        let meta = extract(&RustBackend::new(), &path).unwrap();
        assert_eq!(meta.signature(), FileSignature::read(&path).unwrap());
    }

    #[test]
    fn metadata_serializes_camel_case_with_nulls() {
        let meta = ImageMetadata {
            filename: "x.gif".into(),
            size: 3,
            width: None,
            height: None,
            format: "gif".into(),
            last_modified: DateTime::from_timestamp_millis(0).unwrap(),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("lastModified").is_some());
        assert!(json["width"].is_null());
    }
}
