//! Thumbnail mirror.
//!
//! Thumbnails live under a separate root that mirrors the doc root: the
//! thumbnail of `/a/b.png` is `<thumb dir>/a/b.png`. The engine keeps the
//! mirror consistent with its sources by calling [`ThumbnailCache::relocate`]
//! and [`ThumbnailCache::remove`] after every rename, move and delete.
//!
//! Concurrent requests may generate the same thumbnail twice; both writes
//! are atomic and produce the same bytes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::codec::{CodecError, ImageCodec};
use crate::files::resolver::RelPath;
use crate::files::transfer::{self, TransferError};

/// Errors raised while producing a thumbnail.
#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("failed to create thumbnail directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Lazily generated, mirrored thumbnail store.
pub struct ThumbnailCache {
    dir: PathBuf,
    max_width: u32,
    codec: Arc<dyn ImageCodec>,
}

impl ThumbnailCache {
    pub fn new(dir: PathBuf, max_width: u32, codec: Arc<dyn ImageCodec>) -> Self {
        Self {
            dir,
            max_width,
            codec,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Mirrored location for a source path.
    pub fn path_for(&self, rel: &RelPath) -> PathBuf {
        rel.to_fs_path(&self.dir)
    }

    /// Return the cached thumbnail of `source`, generating it on a miss when
    /// `create` is set. A miss without `create` yields `None`.
    pub fn get_or_create(
        &self,
        rel: &RelPath,
        source: &Path,
        create: bool,
    ) -> Result<Option<PathBuf>, ThumbnailError> {
        let cached = self.path_for(rel);
        if cached.is_file() {
            return Ok(Some(cached));
        }
        if !create {
            return Ok(None);
        }

        let bytes = self.render(source)?;
        if let Some(parent) = cached.parent() {
            fs::create_dir_all(parent).map_err(|source| ThumbnailError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        transfer::write_atomic(&cached, &bytes, None)?;
        debug!(source = %rel, thumbnail = %cached.display(), "Generated thumbnail");
        Ok(Some(cached))
    }

    /// Generate thumbnail bytes without storing them.
    pub fn render(&self, source: &Path) -> Result<Vec<u8>, ThumbnailError> {
        Ok(self.codec.thumbnail(source, self.max_width)?)
    }

    /// Apply a rename or move of `from` to `to` on the mirror. When the
    /// mirrored entry cannot be moved it is removed instead.
    pub fn relocate(&self, from: &RelPath, to: &RelPath) {
        let old = self.path_for(from);
        if fs::symlink_metadata(&old).is_err() {
            return;
        }
        let new = self.path_for(to);

        let moved = match new.parent() {
            Some(parent) => fs::create_dir_all(parent).map_err(|e| e.to_string()),
            None => Ok(()),
        }
        .and_then(|_| transfer::move_path(&old, &new).map_err(|e| e.to_string()));

        if let Err(e) = moved {
            warn!(from = %from, to = %to, error = %e, "Failed to relocate thumbnail, removing it");
            self.remove(from);
        }
    }

    /// Remove the mirrored entry for a file or a whole directory.
    pub fn remove(&self, rel: &RelPath) {
        let path = self.path_for(rel);
        if fs::symlink_metadata(&path).is_err() {
            return;
        }
        if let Err(e) = transfer::remove_path(&path) {
            warn!(path = %path.display(), error = %e, "Failed to remove thumbnail");
        }
    }
}
