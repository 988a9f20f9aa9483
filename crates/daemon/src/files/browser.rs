//! Metadata building and directory listing.
//!
//! [`MetadataBuilder`] turns a resolved path into a fresh [`FileRecord`]. It
//! never caches: every request stats the filesystem again.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use nix::unistd::{access, AccessFlags};
use protocol::{EntryKind, FileRecord};
use thiserror::Error;

use crate::codec::ImageCodec;
use crate::files::policy::{extension_of, ExtensionPolicy, NamePolicy};
use crate::files::resolver::{PathResolver, RelPath};

/// Errors raised while describing or listing entries.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// Stat failed for the given path.
    #[error("failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory enumeration failed.
    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Optional filter for directory listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter {
    /// Every allowed entry.
    All,
    /// Only directories and image files.
    Images,
}

impl ListFilter {
    /// Parse the `type` request parameter.
    pub fn from_param(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("images") => ListFilter::Images,
            _ => ListFilter::All,
        }
    }
}

/// Builds [`FileRecord`]s.
pub struct MetadataBuilder {
    server_root: String,
    extensions: ExtensionPolicy,
    codec: Arc<dyn ImageCodec>,
}

impl MetadataBuilder {
    pub fn new(server_root: &str, extensions: ExtensionPolicy, codec: Arc<dyn ImageCodec>) -> Self {
        Self {
            server_root: server_root.trim_end_matches('/').to_string(),
            extensions,
            codec,
        }
    }

    /// Describe the entity at `path`, addressed by `rel`.
    pub fn describe(&self, rel: &RelPath, path: &Path) -> Result<FileRecord, BrowserError> {
        let metadata = fs::metadata(path).map_err(|source| BrowserError::Stat {
            path: path.to_path_buf(),
            source,
        })?;

        let is_dir = metadata.is_dir();
        let id = rel.to_id(is_dir);
        let name = rel.file_name().unwrap_or("/").to_string();
        let modified_at = to_utc(metadata.modified().ok());
        let created_at = metadata
            .created()
            .ok()
            .map(|t| to_utc(Some(t)))
            .unwrap_or(modified_at);

        let (kind, extension, size_bytes, (pixel_width, pixel_height)) = if is_dir {
            (EntryKind::Folder, None, 0, (0, 0))
        } else {
            let extension = extension_of(&name).map(str::to_string);
            let size = metadata.len();
            let dims = if size > 0 && self.extensions.is_image_name(&name) {
                self.image_dimensions(path)
            } else {
                (0, 0)
            };
            (EntryKind::File, extension, size, dims)
        };

        Ok(FileRecord {
            display_path: format!("{}{}", self.server_root, id),
            id,
            kind,
            name,
            extension,
            readable: access(path, AccessFlags::R_OK).is_ok(),
            writable: access(path, AccessFlags::W_OK).is_ok(),
            created_at,
            modified_at,
            size_bytes,
            pixel_width,
            pixel_height,
            content: None,
        })
    }

    fn image_dimensions(&self, path: &Path) -> (u32, u32) {
        match self.codec.dimensions(path) {
            Ok(dims) => dims,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not read image dimensions");
                (0, 0)
            }
        }
    }

    /// List the immediate children of a directory.
    ///
    /// Excluded names are skipped. With [`ListFilter::Images`] only
    /// directories and image files remain. Directories come first, then
    /// files, each group sorted by name.
    pub fn list(
        &self,
        resolver: &PathResolver,
        names: &NamePolicy,
        dir: &RelPath,
        filter: ListFilter,
    ) -> Result<Vec<FileRecord>, BrowserError> {
        let dir_path = dir.to_fs_path(resolver.root());
        let entries = fs::read_dir(&dir_path).map_err(|source| BrowserError::ReadDir {
            path: dir_path.clone(),
            source,
        })?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(dir = %dir_path.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            let child = dir.join(&name);
            let path = match resolver.locate(&child) {
                Ok(p) => p,
                Err(e) => {
                    tracing::debug!(entry = %child, error = %e, "Skipping entry outside doc root");
                    continue;
                }
            };
            let is_dir = path.is_dir();

            if !names.is_allowed_name(&name, is_dir) {
                continue;
            }
            if filter == ListFilter::Images && !is_dir && !self.extensions.is_image_name(&name) {
                continue;
            }

            match self.describe(&child, &path) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(error = %e, "Skipping entry"),
            }
        }

        records.sort_by(|a, b| {
            b.is_folder()
                .cmp(&a.is_folder())
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(records)
    }
}

fn to_utc(time: Option<SystemTime>) -> DateTime<Utc> {
    time.map(DateTime::<Utc>::from).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ImageCrateCodec;
    use crate::config::Config;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathResolver, MetadataBuilder, NamePolicy) {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir(root.join("docs")).unwrap();
        fs::create_dir(root.join("_thumbs")).unwrap();
        fs::write(root.join("docs/readme.txt"), "hello").unwrap();
        fs::write(root.join("empty.png"), b"").unwrap();
        fs::write(root.join("broken.png"), b"garbage").unwrap();
        fs::write(root.join(".hidden"), b"x").unwrap();
        RgbImage::from_pixel(12, 7, Rgb([1, 2, 3]))
            .save(root.join("photo.png"))
            .unwrap();

        let config = Config::default();
        let builder = MetadataBuilder::new(
            "/userfiles/",
            ExtensionPolicy::from_config(&config),
            Arc::new(ImageCrateCodec),
        );
        let names = NamePolicy::from_config(&config.security).unwrap();
        let resolver = PathResolver::new(root).unwrap();
        (temp, resolver, builder, names)
    }

    #[test]
    fn test_describe_file() {
        let (_temp, resolver, builder, _) = setup();
        let resolved = resolver.resolve("/docs/readme.txt").unwrap();
        let record = builder.describe(&resolved.rel, &resolved.path).unwrap();

        assert_eq!(record.id, "/docs/readme.txt");
        assert_eq!(record.kind, EntryKind::File);
        assert_eq!(record.name, "readme.txt");
        assert_eq!(record.extension.as_deref(), Some("txt"));
        assert_eq!(record.display_path, "/userfiles/docs/readme.txt");
        assert_eq!(record.size_bytes, 5);
        assert!(record.readable);
        assert_eq!((record.pixel_width, record.pixel_height), (0, 0));
    }

    #[test]
    fn test_describe_folder_and_root() {
        let (_temp, resolver, builder, _) = setup();
        let resolved = resolver.resolve("docs").unwrap();
        let record = builder.describe(&resolved.rel, &resolved.path).unwrap();
        assert_eq!(record.id, "/docs/");
        assert_eq!(record.kind, EntryKind::Folder);
        assert!(record.extension.is_none());

        let root = resolver.resolve("").unwrap();
        let record = builder.describe(&root.rel, &root.path).unwrap();
        assert_eq!(record.id, "/");
        assert_eq!(record.name, "/");
    }

    #[test]
    fn test_describe_image_dimensions() {
        let (_temp, resolver, builder, _) = setup();
        let photo = resolver.resolve("/photo.png").unwrap();
        let record = builder.describe(&photo.rel, &photo.path).unwrap();
        assert_eq!((record.pixel_width, record.pixel_height), (12, 7));
    }

    #[test]
    fn test_describe_empty_and_broken_images_default_to_zero() {
        let (_temp, resolver, builder, _) = setup();
        for name in ["/empty.png", "/broken.png"] {
            let resolved = resolver.resolve(name).unwrap();
            let record = builder.describe(&resolved.rel, &resolved.path).unwrap();
            assert_eq!((record.pixel_width, record.pixel_height), (0, 0), "{name}");
        }
    }

    #[test]
    fn test_describe_missing_path_reports_path() {
        let (_temp, resolver, builder, _) = setup();
        let resolved = resolver.resolve("/missing.txt").unwrap();
        let err = builder.describe(&resolved.rel, &resolved.path).unwrap_err();
        assert!(err.to_string().contains("missing.txt"));
    }

    #[test]
    fn test_list_skips_excluded_and_orders_folders_first() {
        let (_temp, resolver, builder, names) = setup();
        let records = builder
            .list(&resolver, &names, &RelPath::root(), ListFilter::All)
            .unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();

        assert_eq!(ids, vec!["/docs/", "/broken.png", "/empty.png", "/photo.png"]);
    }

    #[test]
    fn test_list_images_filter() {
        let (temp, resolver, builder, names) = setup();
        fs::write(temp.path().join("notes.txt"), "n").unwrap();

        let records = builder
            .list(&resolver, &names, &RelPath::root(), ListFilter::Images)
            .unwrap();
        assert!(records.iter().all(|r| r.is_folder() || r.name.ends_with(".png")));
        assert!(!records.iter().any(|r| r.name == "notes.txt"));
    }

    #[test]
    fn test_list_filter_param() {
        assert_eq!(ListFilter::from_param(Some("images")), ListFilter::Images);
        assert_eq!(ListFilter::from_param(Some("IMAGES")), ListFilter::Images);
        assert_eq!(ListFilter::from_param(None), ListFilter::All);
        assert_eq!(ListFilter::from_param(Some("other")), ListFilter::All);
    }
}
