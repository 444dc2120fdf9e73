//! # thumbd
//!
//! A thumbnail cache and indexing daemon for directory trees of images.
//! Point it at a folder: it generates square thumbnails on demand, remembers
//! which ones are still valid, and keeps them in step with the tree as files
//! come and go.
//!
//! # Architecture
//!
//! ```text
//! scan ──▶ candidate files ──▶ index.is_up_to_date? ──no──▶ metadata + imaging
//!                                     │ yes                       │
//!                                     ▼                           ▼
//!                                  serve           index.record_generation
//!                                                                 │
//!                                                                 ▼
//!                                                     listing cache invalidated
//! ```
//!
//! The same path is driven two ways: lazily by read requests through
//! [`gallery::Gallery`], and reactively by the [`daemon::WatchDaemon`] when
//! the filesystem reports a change.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`scan`] | Walks the source tree and yields qualifying image files |
//! | [`metadata`] | Byte size, mtime, dimensions and format of one image |
//! | [`imaging`] | Square thumbnail encoding behind the `ImageBackend` trait |
//! | [`naming`] | `ThumbnailId`: reversible, separator-free ids for source paths |
//! | [`index`] | The staleness index and its persisted JSON snapshot |
//! | [`listing`] | Short-TTL cache of scan results and aggregations |
//! | [`generate`] | Generate-if-stale, forced regeneration and bulk generation |
//! | [`watcher`] | The `FileWatcher` capability and the `notify` backend |
//! | [`daemon`] | Watch state machine, per-path dedup and status |
//! | [`gallery`] | The control and query surface |
//! | [`config`] | `thumbd.toml` loading, merging and validation |
//! | [`types`] | Serializable response records |
//! | [`output`] | CLI text formatting |
//!
//! # Design Decisions
//!
//! ## Staleness From `stat` Alone
//!
//! Whether a thumbnail is valid is decided from the source file's mtime and
//! byte size plus the thumbnail file's presence and size. No image bytes are
//! read and nothing is hashed, so checking a page of images costs one `stat`
//! per file. See [`index`] for the four conditions.
//!
//! ## Safely Stale, Never Falsely Valid
//!
//! Encoding and indexing are two steps. The signature recorded is the one read
//! before the encode began, so a crash or a concurrent write in between can
//! only make an entry look stale.
//!
//! ## One Owned Service
//!
//! The index, the listing cache and the daemon are fields of a single
//! [`gallery::Gallery`] built at startup, loaded explicitly and flushed on
//! shutdown. There is no global state, and every seam that touches the
//! outside world (pixels, filesystem events, cache storage) is a trait.
//!
//! ## Pure-Rust Imaging
//!
//! Decoding and encoding use the `image` crate with Lanczos3 resampling. The
//! binary has no system dependencies.

pub mod config;
pub mod daemon;
pub mod gallery;
pub mod generate;
pub mod imaging;
pub mod index;
pub mod listing;
pub mod metadata;
pub mod naming;
pub mod output;
pub mod scan;
pub mod types;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_helpers;
