//! Disk cache for static assets fetched from the controller.
//!
//! Entries are addressed by the MD5 of the source URL, not by content: a
//! URL is assumed to serve the same bytes for the lifetime of the cache.
//! Nothing is evicted; a temporary cache directory disappears when the
//! cache is dropped.

use std::fmt;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tempfile::TempDir;

use crate::error::{ControllerError, Result};

// Never a valid entry name: entries are `<md5 hex>.<ext>`.
const PARTIAL_PREFIX: &str = ".partial-";

/// Hex MD5 of an asset URL; used as the file stem of the cached copy.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key of `url`.
    pub fn for_url(url: &str) -> Self {
        let digest = Md5::digest(url.as_bytes());
        Self(format!("{:x}", digest))
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CacheKey").field(&self.0).finish()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Image format of a cached asset, decided by its URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// Vector image, stored as `.svg`.
    Svg,
    /// Raster image, stored as `.png`.
    Png,
}

impl AssetKind {
    /// Anything mentioning `.svg` is stored as SVG; the rest is assumed to
    /// be a raster image.
    pub fn for_url(url: &str) -> Self {
        if url.contains(".svg") {
            AssetKind::Svg
        } else {
            AssetKind::Png
        }
    }

    /// File extension used for this kind.
    pub fn extension(self) -> &'static str {
        match self {
            AssetKind::Svg => "svg",
            AssetKind::Png => "png",
        }
    }
}

#[derive(Debug)]
enum CacheRoot {
    Temporary(TempDir),
    Persistent(PathBuf),
}

/// Directory of downloaded assets named `<md5 of url>.<svg|png>`.
#[derive(Debug)]
pub struct AssetCache {
    root: CacheRoot,
}

impl AssetCache {
    /// Cache living in a fresh temporary directory, removed on drop.
    pub fn temporary() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("topolink-assets-")
            .tempdir()?;
        log::debug!("[AssetCache] Using temporary cache {}", dir.path().display());
        Ok(Self {
            root: CacheRoot::Temporary(dir),
        })
    }

    /// Cache in a caller-owned directory, created if missing and kept on
    /// drop.
    pub fn persistent(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| {
            ControllerError::CacheIo {
                path: dir.clone(),
                source,
            }
        })?;
        log::debug!("[AssetCache] Using persistent cache {}", dir.display());
        Ok(Self {
            root: CacheRoot::Persistent(dir),
        })
    }

    /// Cache directory.
    pub fn dir(&self) -> &Path {
        match &self.root {
            CacheRoot::Temporary(dir) => dir.path(),
            CacheRoot::Persistent(dir) => dir,
        }
    }

    /// Key of `url` in this cache.
    pub fn key_for(&self, url: &str) -> CacheKey {
        CacheKey::for_url(url)
    }

    /// Where the copy of `url` is (or would be) stored.
    pub fn path_for(&self, url: &str) -> PathBuf {
        let key = CacheKey::for_url(url);
        let kind = AssetKind::for_url(url);
        self.dir().join(format!("{}.{}", key, kind.extension()))
    }

    /// Path of the cached copy of `url`, if one has been stored.
    pub fn lookup(&self, url: &str) -> Option<PathBuf> {
        let path = self.path_for(url);
        path.is_file().then_some(path)
    }

    /// Write `bytes` as the cached copy of `url`, replacing any previous
    /// file at that path.
    ///
    /// The bytes land in a temporary file next to the entry and are renamed
    /// into place, so [`lookup`](Self::lookup) never sees a partial file.
    pub async fn store(&self, url: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(url);
        let cache_io = |source| ControllerError::CacheIo {
            path: path.clone(),
            source,
        };

        let partial = tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .tempfile_in(self.dir())
            .map_err(cache_io)?
            .into_temp_path();
        tokio::fs::write(&partial, bytes).await.map_err(cache_io)?;
        partial.persist(&path).map_err(|e| cache_io(e.error))?;

        log::debug!("[AssetCache] Stored {} for {}", path.display(), url);
        Ok(path)
    }
}
