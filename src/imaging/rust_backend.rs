//! Pure Rust image processing backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, WebP, BMP, TIFF) | `image` crate decoders |
//! | Identify | `ImageReader::with_guessed_format` + `into_dimensions` |
//! | Thumbnail crop | `image::DynamicImage::resize_to_fill` (Lanczos3) |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//! | Atomic write | `tempfile::NamedTempFile::persist` |
//!
//! Thumbnails are encoded fully in memory, written to a temp file in the
//! destination directory and renamed over the final path, so a reader never
//! observes a truncated thumbnail and a failed encode never touches the old one.

use super::backend::{BackendError, Dimensions, Identified, ImageBackend};
use super::params::ThumbnailParams;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase format name reported in image metadata.
fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Png => "png",
        ImageFormat::Gif => "gif",
        ImageFormat::WebP => "webp",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Tiff => "tiff",
        other => other.extensions_str().first().copied().unwrap_or("unknown"),
    }
}

/// Load and decode an image from disk, sniffing the format from content.
fn load_image(path: &Path) -> Result<DynamicImage, BackendError> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
        })
}

/// Encode as baseline JPEG into memory.
fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, BackendError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(&rgb)
        .map_err(|e| BackendError::ProcessingFailed(format!("JPEG encode failed: {}", e)))?;
    Ok(buf)
}

/// Write `bytes` to `path` through a sibling temp file and a rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BackendError> {
    let dir = path.parent().ok_or_else(|| {
        BackendError::ProcessingFailed(format!("No parent directory: {}", path.display()))
    })?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| BackendError::Io(e.error))?;
    Ok(())
}

impl ImageBackend for RustBackend {
    fn identify(&self, path: &Path) -> Result<Identified, BackendError> {
        let reader = ImageReader::open(path)?.with_guessed_format()?;
        let format = reader.format().ok_or_else(|| {
            BackendError::ProcessingFailed(format!("Unknown image format: {}", path.display()))
        })?;
        let (width, height) = reader.into_dimensions().map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Ok(Identified {
            dimensions: Dimensions { width, height },
            format: format_name(format).to_string(),
        })
    }

    fn thumbnail(&self, params: &ThumbnailParams) -> Result<(), BackendError> {
        let img = load_image(&params.source)?;
        let thumb = img.resize_to_fill(params.size, params.size, FilterType::Lanczos3);
        let quality = params.quality.value().clamp(1, 100) as u8;
        let bytes = encode_jpeg(&thumb, quality)?;
        write_atomic(&params.output, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::Quality;
    use crate::test_helpers::{write_test_jpeg, write_test_png};

    #[test]
    fn identify_synthetic_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("test.jpg");
        write_test_jpeg(&path, 200, 150);

        let backend = RustBackend::new();
        let identified = backend.identify(&path).unwrap();
        assert_eq!(identified.dimensions.width, 200);
        assert_eq!(identified.dimensions.height, 150);
        assert_eq!(identified.format, "jpeg");
    }

    #[test]
    fn identify_png_reports_png() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("test.png");
        write_test_png(&path, 40, 30);

        let identified = RustBackend::new().identify(&path).unwrap();
        assert_eq!(identified.format, "png");
        assert_eq!(identified.dimensions, Dimensions { width: 40, height: 30 });
    }

    #[test]
    fn identify_nonexistent_file_errors() {
        let backend = RustBackend::new();
        let result = backend.identify(Path::new("/nonexistent/image.jpg"));
        assert!(result.is_err());
    }

    #[test]
    fn identify_corrupt_file_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bad.jpg");
        fs::write(&path, b"garbage bytes").unwrap();
        assert!(RustBackend::new().identify(&path).is_err());
    }

    #[test]
    fn thumbnail_landscape_source_is_square() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        write_test_jpeg(&source, 800, 600);

        let output = tmp.path().join("thumbs/thumb.jpg");
        let backend = RustBackend::new();
        backend
            .thumbnail(&ThumbnailParams {
                source,
                output: output.clone(),
                size: 300,
                quality: Quality::new(80),
            })
            .unwrap();

        let dims = image::image_dimensions(&output).unwrap();
        assert_eq!(dims, (300, 300));
    }

    #[test]
    fn thumbnail_portrait_source_is_square() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.png");
        write_test_png(&source, 120, 480);

        let output = tmp.path().join("thumb.jpg");
        RustBackend::new()
            .thumbnail(&ThumbnailParams {
                source,
                output: output.clone(),
                size: 64,
                quality: Quality::default(),
            })
            .unwrap();

        assert_eq!(image::image_dimensions(&output).unwrap(), (64, 64));
    }

    #[test]
    fn thumbnail_overwrites_existing_output() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        write_test_jpeg(&source, 100, 100);
        let output = tmp.path().join("thumb.jpg");
        fs::write(&output, b"old").unwrap();

        RustBackend::new()
            .thumbnail(&ThumbnailParams {
                source,
                output: output.clone(),
                size: 50,
                quality: Quality::default(),
            })
            .unwrap();

        assert_eq!(image::image_dimensions(&output).unwrap(), (50, 50));
    }

    #[test]
    fn thumbnail_failure_leaves_existing_output_unchanged() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("corrupt.jpg");
        fs::write(&source, b"not an image").unwrap();
        let output = tmp.path().join("thumb.jpg");
        fs::write(&output, b"previous thumbnail").unwrap();

        let result = RustBackend::new().thumbnail(&ThumbnailParams {
            source,
            output: output.clone(),
            size: 50,
            quality: Quality::default(),
        });

        assert!(result.is_err());
        assert_eq!(fs::read(&output).unwrap(), b"previous thumbnail");
        let leftovers = fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(leftovers, 2);
    }

    #[test]
    fn format_names_are_lowercase() {
        assert_eq!(format_name(ImageFormat::Jpeg), "jpeg");
        assert_eq!(format_name(ImageFormat::Tiff), "tiff");
        assert_eq!(format_name(ImageFormat::WebP), "webp");
    }
}
