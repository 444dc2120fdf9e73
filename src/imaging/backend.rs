//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations the daemon needs:
//! identify (dimensions + decoded format) and thumbnail (square crop + encode).
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate. Tests use the recording `MockBackend` below so they can count
//! encodes without paying for them.

use super::params::ThumbnailParams;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Result of an identify operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identified {
    pub dimensions: Dimensions,
    /// Lowercase format name detected from the file content (`jpeg`, `png`, ...).
    pub format: String,
}

/// Trait for image processing backends.
///
/// `Send + Sync` so one backend can be shared by the watcher thread, request
/// handlers and rayon workers.
pub trait ImageBackend: Send + Sync {
    /// Decode enough of the image to learn its dimensions and format.
    fn identify(&self, path: &Path) -> Result<Identified, BackendError>;

    /// Execute a thumbnail operation (resize + center crop + encode).
    ///
    /// On failure the output path must be left untouched.
    fn thumbnail(&self, params: &ThumbnailParams) -> Result<(), BackendError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Size of the placeholder file written by [`MockBackend::thumbnail`].
    /// Comfortably above the default minimum thumbnail size.
    pub const MOCK_THUMBNAIL_BYTES: usize = 4096;

    /// Mock backend that records operations instead of decoding pixels.
    ///
    /// `thumbnail` writes a placeholder file so staleness checks see a real
    /// output. Uses Mutex (not RefCell) so it is Sync and works with rayon's
    /// par_iter.
    #[derive(Default)]
    pub struct MockBackend {
        pub dimensions: Option<Dimensions>,
        pub fail_thumbnails: bool,
        pub operations: Mutex<Vec<RecordedOp>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Identify(String),
        Thumbnail {
            source: String,
            output: String,
            size: u32,
            quality: u32,
        },
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_dimensions(dimensions: Dimensions) -> Self {
            Self {
                dimensions: Some(dimensions),
                ..Self::default()
            }
        }

        pub fn failing() -> Self {
            Self {
                fail_thumbnails: true,
                ..Self::default()
            }
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        pub fn thumbnail_count(&self) -> usize {
            self.get_operations()
                .iter()
                .filter(|op| matches!(op, RecordedOp::Thumbnail { .. }))
                .count()
        }

        pub fn identify_count(&self) -> usize {
            self.get_operations()
                .iter()
                .filter(|op| matches!(op, RecordedOp::Identify(_)))
                .count()
        }
    }

    impl ImageBackend for MockBackend {
        fn identify(&self, path: &Path) -> Result<Identified, BackendError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::Identify(path.to_string_lossy().to_string()));

            self.dimensions
                .map(|dimensions| Identified {
                    dimensions,
                    format: "jpeg".to_string(),
                })
                .ok_or_else(|| BackendError::ProcessingFailed("No mock dimensions".to_string()))
        }

        fn thumbnail(&self, params: &ThumbnailParams) -> Result<(), BackendError> {
            self.operations.lock().unwrap().push(RecordedOp::Thumbnail {
                source: params.source.to_string_lossy().to_string(),
                output: params.output.to_string_lossy().to_string(),
                size: params.size,
                quality: params.quality.value(),
            });
            if self.fail_thumbnails {
                return Err(BackendError::ProcessingFailed("mock failure".to_string()));
            }
            if let Some(parent) = params.output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&params.output, vec![0u8; MOCK_THUMBNAIL_BYTES])?;
            Ok(())
        }
    }

    #[test]
    fn mock_records_identify() {
        let backend = MockBackend::with_dimensions(Dimensions {
            width: 800,
            height: 600,
        });

        let result = backend.identify(Path::new("/test/image.jpg")).unwrap();
        assert_eq!(result.dimensions.width, 800);
        assert_eq!(result.dimensions.height, 600);

        let ops = backend.get_operations();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], RecordedOp::Identify(p) if p == "/test/image.jpg"));
    }

    #[test]
    fn mock_identify_without_dimensions_fails() {
        let backend = MockBackend::new();
        assert!(backend.identify(Path::new("/x.jpg")).is_err());
    }

    #[test]
    fn mock_records_thumbnail_and_writes_output() {
        let tmp = tempfile::TempDir::new().unwrap();
        let output = tmp.path().join("thumbs/t.jpg");
        let backend = MockBackend::new();

        backend
            .thumbnail(&ThumbnailParams {
                source: "/source.jpg".into(),
                output: output.clone(),
                size: 300,
                quality: super::super::params::Quality::new(80),
            })
            .unwrap();

        assert_eq!(
            std::fs::metadata(&output).unwrap().len(),
            MOCK_THUMBNAIL_BYTES as u64
        );
        let ops = backend.get_operations();
        assert!(matches!(
            &ops[0],
            RecordedOp::Thumbnail {
                size: 300,
                quality: 80,
                ..
            }
        ));
    }

    #[test]
    fn failing_mock_leaves_output_absent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let output = tmp.path().join("t.jpg");
        let backend = MockBackend::failing();

        let result = backend.thumbnail(&ThumbnailParams {
            source: "/source.jpg".into(),
            output: output.clone(),
            size: 300,
            quality: super::super::params::Quality::default(),
        });
        assert!(result.is_err());
        assert!(!output.exists());
        assert_eq!(backend.thumbnail_count(), 1);
    }
}
