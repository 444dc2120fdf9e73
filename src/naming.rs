//! Thumbnail identifiers and file naming.
//!
//! Every source image is identified externally by a [`ThumbnailId`]: the
//! URL-safe, unpadded base64 encoding of its root-relative path. The same id
//! names the generated thumbnail file on disk:
//!
//! ```text
//! a/1.jpg        → YS8xLmpwZw           → thumbnails/YS8xLmpwZw.jpg
//! 旅行/main.png  → 5peF6KGML21haW4ucG5n → thumbnails/5peF6KGML21haW4ucG5n.jpg
//! ```
//!
//! The URL-safe alphabet (`A-Z a-z 0-9 - _`) never contains `/` or `\`, so an
//! id is always a single path component. Base64 is a bijection over bytes, so
//! distinct relative paths always produce distinct ids.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;
use thiserror::Error;

/// Extension of every generated thumbnail file.
pub const THUMBNAIL_EXTENSION: &str = "jpg";

#[derive(Error, Debug, PartialEq)]
pub enum NamingError {
    #[error("Invalid thumbnail id: {0}")]
    InvalidId(String),
}

/// Reversible, separator-free identifier of a source image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ThumbnailId(String);

impl ThumbnailId {
    /// Encode a forward-slash relative path.
    pub fn from_relative_path(relative_path: &str) -> Self {
        Self(URL_SAFE_NO_PAD.encode(relative_path.as_bytes()))
    }

    /// Decode back to the relative path this id was created from.
    pub fn relative_path(&self) -> Result<String, NamingError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(self.0.as_bytes())
            .map_err(|_| NamingError::InvalidId(self.0.clone()))?;
        String::from_utf8(bytes).map_err(|_| NamingError::InvalidId(self.0.clone()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the thumbnail generated for this id.
    pub fn thumbnail_file_name(&self) -> String {
        self.file_name_with_extension(THUMBNAIL_EXTENSION)
    }

    pub fn file_name_with_extension(&self, ext: &str) -> String {
        format!("{}.{}", self.0, ext)
    }
}

impl FromStr for ThumbnailId {
    type Err = NamingError;

    /// Parse an externally supplied id, rejecting anything that does not decode
    /// to a non-empty UTF-8 path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Self(s.to_string());
        let path = id.relative_path()?;
        if path.is_empty() {
            return Err(NamingError::InvalidId(s.to_string()));
        }
        Ok(id)
    }
}

impl fmt::Display for ThumbnailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Join the normal components of a relative path with `/`.
///
/// Returns `None` for paths that escape upward or are not valid UTF-8.
pub fn normalize_relative_path(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(parts.join("/"))
}
