//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Every entity leads with its positional index and name; file paths, ids and
//! sizes follow as indented context lines:
//!
//! ```text
//! 001 1.jpg (500x500 jpeg, 48.2 KB)
//!     Path: a/1.jpg
//!     Id: YS8xLmpwZw
//! 002 2.jpg (unknown size jpg, 29 B)
//!     Path: a/2.jpg
//!     Id: YS8yLmpwZw
//!
//! Page 1/1, 2 images
//! ```
//!
//! ## Folders
//!
//! ```text
//! 001 Root (3 images)
//!     Main: cover.jpg
//!     Preview: 1.jpg, 2.jpg
//! 002 kyoto (12 images, more)
//!     Main: travel/kyoto/封面.jpg
//! ```
//!
//! ## Status
//!
//! ```text
//! Watching: yes
//! Root: /srv/images
//! Processing: 0 files
//! Index: 4 entries, 3 with metadata (75%), 4 with thumbnails
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure.

use crate::daemon::DaemonStatus;
use crate::index::IndexStats;
use crate::metadata::ImageMetadata;
use crate::types::{CategoryItem, CategorySummary, FolderSummary, ImageItem, Page, RefreshReport};
use chrono::{DateTime, Utc};

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

/// Human-readable byte size: `512 B`, `48.2 KB`, `3.1 MB`.
fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let b = bytes as f64;
    if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

fn format_dimensions(meta: &ImageMetadata) -> String {
    match (meta.width, meta.height) {
        (Some(w), Some(h)) => format!("{}x{}", w, h),
        _ => "unknown size".to_string(),
    }
}

fn format_millis(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

/// Header line for an image: index, file name and a metadata summary.
fn image_header(index: usize, item: &ImageItem) -> String {
    let name = item
        .relative_path
        .rsplit('/')
        .next()
        .unwrap_or(&item.relative_path);
    match &item.metadata {
        Some(meta) => format!(
            "{} {} ({} {}, {})",
            format_index(index),
            name,
            format_dimensions(meta),
            meta.format,
            format_bytes(meta.size)
        ),
        None => format!("{} {}", format_index(index), name),
    }
}

fn page_footer<T>(page: &Page<T>, noun: &str) -> String {
    let p = &page.pagination;
    format!(
        "Page {}/{}, {}",
        p.page,
        p.total_pages.max(1),
        plural(p.total_count, noun)
    )
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{}", line);
    }
}

// ============================================================================
// Listings
// ============================================================================

pub fn format_image_page(page: &Page<ImageItem>) -> Vec<String> {
    let offset = page.pagination.page.saturating_sub(1) * page.pagination.limit;
    let mut lines = Vec::new();
    for (i, item) in page.items.iter().enumerate() {
        lines.push(image_header(offset + i + 1, item));
        lines.push(format!("{}Path: {}", indent(1), item.relative_path));
        lines.push(format!("{}Id: {}", indent(1), item.id));
    }
    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(page_footer(page, "image"));
    lines
}

pub fn print_image_page(page: &Page<ImageItem>) {
    print_lines(format_image_page(page));
}

pub fn format_folders(folders: &[FolderSummary]) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, folder) in folders.iter().enumerate() {
        let more = if folder.has_more { ", more" } else { "" };
        lines.push(format!(
            "{} {} ({}{})",
            format_index(i + 1),
            folder.display_name,
            plural(folder.image_count, "image"),
            more
        ));
        lines.push(format!(
            "{}Main: {}",
            indent(1),
            folder.main_image.relative_path
        ));
        if !folder.preview_images.is_empty() {
            let names: Vec<&str> = folder
                .preview_images
                .iter()
                .map(|img| img.relative_path.as_str())
                .collect();
            lines.push(format!("{}Preview: {}", indent(1), names.join(", ")));
        }
    }
    if folders.is_empty() {
        lines.push("No folders".to_string());
    }
    lines
}

pub fn print_folders(folders: &[FolderSummary]) {
    print_lines(format_folders(folders));
}

pub fn format_categories(categories: &[CategorySummary]) -> Vec<String> {
    let mut lines: Vec<String> = categories
        .iter()
        .enumerate()
        .map(|(i, c)| {
            format!(
                "{} {} ({}, {})",
                format_index(i + 1),
                c.name,
                plural(c.item_count, "item"),
                plural(c.image_count, "image")
            )
        })
        .collect();
    if lines.is_empty() {
        lines.push("No categories".to_string());
    }
    lines
}

pub fn print_categories(categories: &[CategorySummary]) {
    print_lines(format_categories(categories));
}

pub fn format_category_items(page: &Page<CategoryItem>) -> Vec<String> {
    let offset = page.pagination.page.saturating_sub(1) * page.pagination.limit;
    let mut lines = Vec::new();
    for (i, item) in page.items.iter().enumerate() {
        lines.push(format!(
            "{} {} ({})",
            format_index(offset + i + 1),
            item.name,
            plural(item.image_count, "image")
        ));
        if let Some(main) = &item.main_image {
            lines.push(format!("{}Main: {}", indent(1), main.relative_path));
        }
    }
    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(page_footer(page, "item"));
    lines
}

pub fn print_category_items(page: &Page<CategoryItem>) {
    print_lines(format_category_items(page));
}

// ============================================================================
// Single records
// ============================================================================

pub fn format_metadata(meta: &ImageMetadata) -> Vec<String> {
    vec![
        meta.filename.clone(),
        format!("{}Size: {}", indent(1), format_bytes(meta.size)),
        format!("{}Dimensions: {}", indent(1), format_dimensions(meta)),
        format!("{}Format: {}", indent(1), meta.format),
        format!("{}Modified: {}", indent(1), meta.last_modified.to_rfc3339()),
    ]
}

pub fn print_metadata(meta: &ImageMetadata) {
    print_lines(format_metadata(meta));
}

pub fn format_index_stats(stats: &IndexStats) -> Vec<String> {
    let mut lines = vec![
        format!("Index: {}", stats),
        format!(
            "{}File: {} ({})",
            indent(1),
            stats.index_file.display(),
            format_bytes(stats.index_size)
        ),
    ];
    if let Some(oldest) = stats.oldest_entry {
        lines.push(format!("{}Oldest: {}", indent(1), format_millis(oldest)));
    }
    if let Some(newest) = stats.newest_entry {
        lines.push(format!("{}Newest: {}", indent(1), format_millis(newest)));
    }
    lines
}

pub fn print_index_stats(stats: &IndexStats) {
    print_lines(format_index_stats(stats));
}

pub fn format_status(status: &DaemonStatus) -> Vec<String> {
    let mut lines = vec![
        format!("Watching: {}", if status.watching { "yes" } else { "no" }),
        format!("Root: {}", status.watched_root.display()),
        format!(
            "Processing: {}",
            plural(status.processing_queue.len(), "file")
        ),
    ];
    for path in &status.processing_queue {
        lines.push(format!("{}{}", indent(1), path));
    }
    lines.push(format!("Index: {}", status.index));
    lines
}

pub fn print_status(status: &DaemonStatus) {
    print_lines(format_status(status));
}

pub fn format_refresh(report: &RefreshReport) -> String {
    let noun = if report.categories == 1 {
        "category"
    } else {
        "categories"
    };
    format!(
        "Refreshed: {}, {} {}",
        plural(report.images, "image"),
        report.categories,
        noun
    )
}
