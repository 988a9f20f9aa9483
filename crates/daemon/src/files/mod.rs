//! Filesystem components behind the action engine.
//!
//! - [`resolver`]: client path normalization and doc-root containment
//! - [`policy`]: name exclusions, upload/image/edit extension rules, name sanitizing
//! - [`permissions`]: per-action capability gate
//! - [`browser`]: file records and directory listing
//! - [`thumbnail`]: mirrored thumbnail store
//! - [`summary`]: depth-bounded tree summary
//! - [`transfer`]: atomic writes, copy, move, archive
//!
//! # Security
//!
//! Every client path goes through [`PathResolver`] before any filesystem
//! call. Lexical containment is checked on the joined path and the nearest
//! existing ancestor is canonicalized so symlinks cannot escape the doc root.

pub mod browser;
pub mod permissions;
pub mod policy;
pub mod resolver;
pub mod summary;
pub mod thumbnail;
pub mod transfer;

pub use browser::{BrowserError, ListFilter, MetadataBuilder};
pub use permissions::{Capability, Denial, PermissionGate};
pub use policy::{extension_of, sanitize_name, ExtensionPolicy, NamePolicy, UploadPolicy};
pub use resolver::{PathError, PathResolver, RelPath, Resolved};
pub use summary::DirectorySummarizer;
pub use thumbnail::{ThumbnailCache, ThumbnailError};
pub use transfer::TransferError;
