//! Resolution of client-supplied paths against the doc root.
//!
//! Client paths are always interpreted relative to the doc root. Separators
//! are normalized, `.` and `..` segments are dropped, and the result is
//! checked twice: lexically (the joined path must start with the root) and
//! physically (the nearest existing ancestor must canonicalize inside the
//! root, so a symlink cannot be used to leave it).

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while resolving a client path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    /// The path contains a NUL byte.
    #[error("path contains a NUL byte")]
    NulByte,

    /// The path tries to address an absolute location.
    #[error("absolute path override rejected: {0}")]
    AbsoluteOverride(String),

    /// The joined path does not start with the doc root.
    #[error("path escapes the doc root: {0}")]
    OutsideRoot(String),

    /// A symlink along the path points outside the doc root.
    #[error("symlink resolves outside the doc root: {0}")]
    SymlinkOutsideRoot(PathBuf),

    /// The doc root itself could not be canonicalized.
    #[error("doc root unavailable: {0}")]
    RootUnavailable(String),
}

/// A normalized path relative to the doc root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RelPath {
    segments: Vec<String>,
}

impl RelPath {
    /// The doc root itself.
    pub fn root() -> Self {
        Self::default()
    }

    /// Lexically normalize a raw path.
    ///
    /// Both `/` and `\` separate segments; empty, `.` and `..` segments are
    /// dropped.
    pub fn parse(raw: &str) -> Self {
        let segments = raw
            .split(['/', '\\'])
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .map(str::to_string)
            .collect();
        Self { segments }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Parent path, `None` for the root.
    pub fn parent(&self) -> Option<RelPath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append a child, normalizing it the same way as [`RelPath::parse`].
    pub fn join(&self, child: &str) -> RelPath {
        let mut segments = self.segments.clone();
        segments.extend(RelPath::parse(child).segments);
        Self { segments }
    }

    /// Whether `self` equals `prefix` or lies beneath it.
    pub fn starts_with(&self, prefix: &RelPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Join onto a filesystem base.
    pub fn to_fs_path(&self, base: &Path) -> PathBuf {
        let mut path = base.to_path_buf();
        for segment in &self.segments {
            path.push(segment);
        }
        path
    }

    /// The client-facing id; directories end with `/`.
    pub fn to_id(&self, is_dir: bool) -> String {
        let mut id = self.to_string();
        if is_dir && !self.is_root() {
            id.push('/');
        }
        id
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

/// A client path after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Normalized relative form.
    pub rel: RelPath,
    /// Absolute filesystem path inside the doc root.
    pub path: PathBuf,
}

/// Resolves client paths inside a fixed doc root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    allow_absolute: bool,
    follow_symlinks: bool,
}

impl PathResolver {
    /// Create a resolver for an existing doc root.
    pub fn new(root: &Path) -> Result<Self, PathError> {
        let root = fs::canonicalize(root)
            .map_err(|e| PathError::RootUnavailable(format!("{}: {}", root.display(), e)))?;
        Ok(Self {
            root,
            allow_absolute: false,
            follow_symlinks: false,
        })
    }

    /// Accept paths prefixed with the absolute doc root.
    pub fn allow_absolute(mut self, allow: bool) -> Self {
        self.allow_absolute = allow;
        self
    }

    /// Permit symlinks that point outside the doc root.
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Canonical doc root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a raw client path. An empty path resolves to the doc root.
    pub fn resolve(&self, raw: &str) -> Result<Resolved, PathError> {
        if raw.contains('\0') {
            return Err(PathError::NulByte);
        }

        let trimmed = raw.trim();
        let relative = match self.strip_root_prefix(trimmed) {
            Some(rest) => rest,
            None => {
                if is_absolute_override(trimmed) {
                    tracing::warn!(path = %trimmed, "Rejected absolute path override");
                    return Err(PathError::AbsoluteOverride(trimmed.to_string()));
                }
                trimmed
            }
        };

        let rel = RelPath::parse(relative);
        let path = self.locate(&rel)?;
        Ok(Resolved { rel, path })
    }

    /// Map an already-normalized relative path to the filesystem, checking
    /// containment.
    pub fn locate(&self, rel: &RelPath) -> Result<PathBuf, PathError> {
        let path = rel.to_fs_path(&self.root);
        if !path.starts_with(&self.root) {
            return Err(PathError::OutsideRoot(rel.to_string()));
        }

        if !self.follow_symlinks {
            self.check_existing_ancestor(rel)?;
        }

        Ok(path)
    }

    fn strip_root_prefix<'a>(&self, raw: &'a str) -> Option<&'a str> {
        if !self.allow_absolute {
            return None;
        }
        let root = self.root.to_str()?;
        let rest = raw.strip_prefix(root)?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }

    /// Canonicalize the deepest existing prefix of `rel` and require it to
    /// stay inside the root.
    fn check_existing_ancestor(&self, rel: &RelPath) -> Result<(), PathError> {
        let segments = rel.segments();
        for depth in (0..=segments.len()).rev() {
            let candidate = RelPath {
                segments: segments[..depth].to_vec(),
            }
            .to_fs_path(&self.root);

            if fs::symlink_metadata(&candidate).is_err() {
                continue;
            }

            return match fs::canonicalize(&candidate) {
                Ok(canonical) if canonical.starts_with(&self.root) => Ok(()),
                Ok(_) => {
                    tracing::warn!(path = %candidate.display(), "Symlink escapes doc root");
                    Err(PathError::SymlinkOutsideRoot(candidate))
                }
                // Dangling link: the target does not exist, nothing to escape into yet.
                Err(_) => match fs::read_link(&candidate) {
                    Ok(target) => {
                        let absolute = match candidate.parent() {
                            Some(parent) => parent.join(&target),
                            None => target,
                        };
                        if lexically_inside(&absolute, &self.root) {
                            Ok(())
                        } else {
                            Err(PathError::SymlinkOutsideRoot(candidate))
                        }
                    }
                    Err(_) => Ok(()),
                },
            };
        }
        Err(PathError::RootUnavailable(self.root.display().to_string()))
    }
}

/// Whether `path`, with `..` collapsed lexically, stays under `root`.
fn lexically_inside(path: &Path, root: &Path) -> bool {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                normalized.pop();
            }
            std::path::Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized.starts_with(root)
}

/// Home-relative, drive-letter and UNC prefixes.
fn is_absolute_override(raw: &str) -> bool {
    if raw.starts_with('~') || raw.starts_with("\\\\") {
        return true;
    }
    let bytes = raw.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
