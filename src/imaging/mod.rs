//! Image processing in pure Rust, built on the `image` crate.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `ImageReader::into_dimensions` + format sniffing |
//! | **Thumbnail** | `resize_to_fill` (Lanczos3) → JPEG |
//!
//! The module is split into:
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]

pub mod backend;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, Identified, ImageBackend};
pub use params::{Quality, ThumbnailParams};
pub use rust_backend::RustBackend;
