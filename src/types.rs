//! Response records returned by the [`Gallery`](crate::gallery::Gallery)
//! service and rendered by [`output`](crate::output).
//!
//! All records serialize to camelCase JSON so they can be handed straight to
//! an HTTP layer.

use crate::metadata::ImageMetadata;
use crate::naming::ThumbnailId;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One source image, thumbnail-backed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageItem {
    pub id: ThumbnailId,
    pub relative_path: String,
    /// Thumbnail file name under the thumbnails directory.
    pub thumbnail: String,
    pub directory: String,
    pub metadata: Option<ImageMetadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// 1-based.
    pub page: usize,
    pub limit: usize,
    pub total_count: usize,
    pub total_pages: usize,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(page: usize, limit: usize, total_count: usize) -> Self {
        let page = page.max(1);
        let limit = limit.max(1);
        Self {
            page,
            limit,
            total_count,
            total_pages: total_count.div_ceil(limit),
            has_more: page.saturating_mul(limit) < total_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

/// Images of one directory: a representative image plus a bounded preview.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderSummary {
    pub directory: String,
    pub display_name: String,
    pub image_count: usize,
    pub main_image: ImageItem,
    pub preview_images: Vec<ImageItem>,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    pub name: String,
    pub item_count: usize,
    pub image_count: usize,
}

/// A subfolder of a category.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryItem {
    pub name: String,
    pub category: String,
    pub image_count: usize,
    pub main_image: Option<ImageItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub images: usize,
    pub categories: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    pub watching: bool,
}

/// Encoded thumbnail bytes with their content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailData {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub file_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_counts() {
        let p = Pagination::new(1, 20, 45);
        assert_eq!(p.total_pages, 3);
        assert!(p.has_more);

        let last = Pagination::new(3, 20, 45);
        assert!(!last.has_more);

        let empty = Pagination::new(1, 20, 0);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_more);
    }

    #[test]
    fn pagination_with_zero_values_is_first_page() {
        let p = Pagination::new(0, 0, 3);
        assert_eq!(p.page, 1);
        assert_eq!(p.limit, 1);
        assert_eq!(p.total_pages, 3);
        assert!(p.has_more);
    }

    #[test]
    fn pagination_serializes_camel_case() {
        let json = serde_json::to_value(Pagination::new(2, 10, 25)).unwrap();
        assert_eq!(json["totalCount"], 25);
        assert_eq!(json["totalPages"], 3);
        assert_eq!(json["hasMore"], true);
    }
}
