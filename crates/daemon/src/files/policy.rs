//! Name and extension policies.
//!
//! [`NamePolicy`] hides excluded directory and file names from every
//! operation. [`ExtensionPolicy`] decides which uploads are accepted, which
//! files are images, and which may be edited as text.

use std::borrow::Cow;
use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigError, SecurityConfig};
use crate::files::resolver::RelPath;

/// An exact-name set paired with an optional full-match expression.
#[derive(Debug, Clone)]
struct ExclusionList {
    names: HashSet<String>,
    pattern: Option<Regex>,
}

impl ExclusionList {
    fn new(
        names: &[String],
        pattern: &str,
        field: &'static str,
    ) -> Result<Self, ConfigError> {
        let pattern = if pattern.is_empty() {
            None
        } else {
            // Anchored so the whole name must match.
            let anchored = format!("^(?:{})$", pattern);
            Some(
                Regex::new(&anchored).map_err(|e| ConfigError::InvalidExclusionRegex {
                    field,
                    message: e.to_string(),
                })?,
            )
        };
        Ok(Self {
            names: names.iter().cloned().collect(),
            pattern,
        })
    }

    fn excludes(&self, name: &str) -> bool {
        self.names.contains(name) || self.pattern.as_ref().is_some_and(|re| re.is_match(name))
    }
}

/// Directory and file exclusion policy.
#[derive(Debug, Clone)]
pub struct NamePolicy {
    dirs: ExclusionList,
    files: ExclusionList,
}

impl NamePolicy {
    /// Build a policy from raw lists. An invalid expression fails closed.
    pub fn new(
        excluded_dirs: &[String],
        excluded_dirs_regex: &str,
        excluded_files: &[String],
        excluded_files_regex: &str,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            dirs: ExclusionList::new(excluded_dirs, excluded_dirs_regex, "excluded_dirs_regex")?,
            files: ExclusionList::new(
                excluded_files,
                excluded_files_regex,
                "excluded_files_regex",
            )?,
        })
    }

    pub fn from_config(security: &SecurityConfig) -> Result<Self, ConfigError> {
        Self::new(
            &security.excluded_dirs,
            &security.excluded_dirs_regex,
            &security.excluded_files,
            &security.excluded_files_regex,
        )
    }

    /// A name is rejected when it is in the exact set or matches the
    /// expression for its kind.
    pub fn is_allowed_name(&self, name: &str, is_dir: bool) -> bool {
        let list = if is_dir { &self.dirs } else { &self.files };
        !list.excludes(name)
    }

    /// Check every segment of `rel`: ancestors as directories, the last
    /// segment as the given kind.
    pub fn is_allowed_path(&self, rel: &RelPath, is_dir: bool) -> bool {
        let segments = rel.segments();
        let Some((last, ancestors)) = segments.split_last() else {
            return true;
        };
        ancestors.iter().all(|s| self.is_allowed_name(s, true)) && self.is_allowed_name(last, is_dir)
    }
}

/// Upload policy applied to the restriction list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UploadPolicy {
    /// Everything except the restricted extensions.
    AllowAll,
    /// Only the restricted extensions.
    DisallowAll,
    /// Unrecognized value; uploads are allowed.
    Other(String),
}

impl UploadPolicy {
    pub fn as_str(&self) -> &str {
        match self {
            UploadPolicy::AllowAll => "ALLOW_ALL",
            UploadPolicy::DisallowAll => "DISALLOW_ALL",
            UploadPolicy::Other(raw) => raw,
        }
    }
}

impl From<String> for UploadPolicy {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ALLOW_ALL" => UploadPolicy::AllowAll,
            "DISALLOW_ALL" => UploadPolicy::DisallowAll,
            _ => UploadPolicy::Other(raw),
        }
    }
}

impl From<UploadPolicy> for String {
    fn from(policy: UploadPolicy) -> Self {
        policy.as_str().to_string()
    }
}

/// Extension after the last dot. Names without a dot, or whose only dot is
/// the leading one, have none.
pub fn extension_of(name: &str) -> Option<&str> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// Upload, image and edit extension rules.
#[derive(Debug, Clone)]
pub struct ExtensionPolicy {
    upload_policy: UploadPolicy,
    restrictions: HashSet<String>,
    images: HashSet<String>,
    editable: HashSet<String>,
    allow_no_extension: bool,
    ignore_case: bool,
}

impl ExtensionPolicy {
    pub fn from_config(config: &Config) -> Self {
        let ignore_case = config.security.extensions_ignore_case;
        let collect = |list: &[String]| -> HashSet<String> {
            list.iter().map(|e| normalize(e, ignore_case).into_owned()).collect()
        };

        Self {
            upload_policy: config.upload.policy.clone(),
            restrictions: collect(&config.upload.restrictions),
            images: collect(&config.images.extensions),
            editable: collect(&config.security.edit_extensions),
            allow_no_extension: config.security.allow_no_extension,
            ignore_case,
        }
    }

    /// Whether a file with this name may be uploaded or renamed to.
    pub fn is_allowed_upload(&self, file_name: &str) -> bool {
        let Some(ext) = extension_of(file_name) else {
            return self.allow_no_extension;
        };
        let ext = normalize(ext, self.ignore_case);

        match &self.upload_policy {
            UploadPolicy::DisallowAll => self.restrictions.contains(ext.as_ref()),
            UploadPolicy::AllowAll => !self.restrictions.contains(ext.as_ref()),
            UploadPolicy::Other(raw) => {
                tracing::warn!(policy = %raw, file = %file_name, "Unknown upload policy, allowing upload");
                true
            }
        }
    }

    pub fn is_allowed_image(&self, ext: &str) -> bool {
        self.images.contains(normalize(ext, self.ignore_case).as_ref())
    }

    pub fn is_editable(&self, ext: &str) -> bool {
        self.editable.contains(normalize(ext, self.ignore_case).as_ref())
    }

    /// Image check on a full file name.
    pub fn is_image_name(&self, file_name: &str) -> bool {
        extension_of(file_name).is_some_and(|ext| self.is_allowed_image(ext))
    }

    /// Edit check on a full file name.
    pub fn is_editable_name(&self, file_name: &str) -> bool {
        extension_of(file_name).is_some_and(|ext| self.is_editable(ext))
    }
}

fn normalize(ext: &str, ignore_case: bool) -> Cow<'_, str> {
    if ignore_case {
        Cow::Owned(ext.to_lowercase())
    } else {
        Cow::Borrowed(ext)
    }
}

/// Reduce a client-supplied name to a safe single path segment.
///
/// Whitespace and quotes become `_`. Letters, digits, `_` and
/// `extra_allowed` are kept; every other character is dropped. Letters and
/// digits are any Unicode ones, or only `[A-Za-z0-9]` with `latin_only`.
/// Runs of `_` collapse to one. A result of `.` or `..` is returned as
/// empty.
pub fn sanitize_name(raw: &str, extra_allowed: &[char], latin_only: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        let mapped = match c {
            '\'' | '"' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        };
        let alphanumeric = if latin_only {
            mapped.is_ascii_alphanumeric()
        } else {
            mapped.is_alphanumeric()
        };
        if !(alphanumeric || mapped == '_' || extra_allowed.contains(&mapped)) {
            continue;
        }
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }

    if out == "." || out == ".." {
        out.clear();
    }
    out
}
