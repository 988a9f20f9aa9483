//! Configuration management for the Filedeck daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/filedeck/config.toml`.
//!
//! A [`Config`] is an immutable value once handed to the engine. Reloading
//! means loading a fresh `Config` and constructing a new engine from it.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::format::{Item, StrftimeItems};
use protocol::{ErrorKind, RenderOptions, ResponseShape, DEFAULT_DATE_FORMAT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files::permissions::Capability;
use crate::files::policy::UploadPolicy;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("doc_root must not be empty")]
    EmptyDocRoot,

    #[error("doc_root exists but is not a directory: {0}")]
    DocRootNotDirectory(String),

    #[error("upload.file_size_limit must be greater than 0, got {0}")]
    InvalidFileSizeLimit(u64),

    #[error("thumbnail bounds must be greater than 0, got {width}x{height}")]
    InvalidThumbnailSize { width: u32, height: u32 },

    #[error("summary_max_depth must be greater than 0, got {0}")]
    InvalidSummaryDepth(usize),

    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    #[error("invalid regular expression in {field}: {message}")]
    InvalidExclusionRegex { field: &'static str, message: String },

    #[error("invalid date_format: {0}")]
    InvalidDateFormat(String),

    #[error("unable to create doc_root {path}: {message}")]
    DocRootUnavailable { path: String, message: String },

    #[error("invalid messages file {path}: {message}")]
    MessagesFile { path: String, message: String },
}

impl ConfigError {
    /// Taxonomy kind: an expression or pattern that does not parse is a
    /// syntax error, anything else a configuration error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::InvalidExclusionRegex { .. } | ConfigError::InvalidDateFormat(_) => {
                ErrorKind::Syntax
            }
            _ => ErrorKind::Config,
        }
    }
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the Filedeck daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Process-level settings (logging, socket).
    pub daemon: DaemonConfig,

    /// Doc root and general behaviour.
    pub options: OptionsConfig,

    /// Exclusion lists and edit restrictions.
    pub security: SecurityConfig,

    /// Upload policy.
    pub upload: UploadConfig,

    /// Image handling.
    pub images: ImagesConfig,
}

/// Process-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Optional log file; logs go to stderr when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Unix socket path; the XDG runtime location is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,

    /// Optional TOML file overriding built-in message templates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages_file: Option<PathBuf>,
}

/// Doc root and general engine behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptionsConfig {
    /// Directory every client-visible path is resolved against.
    pub doc_root: PathBuf,

    /// Prefix prepended to ids to build client-facing display paths.
    pub server_root: String,

    /// Granted capabilities.
    pub capabilities: Vec<String>,

    /// Whether directories may be downloaded as ZIP archives.
    pub allow_folder_download: bool,

    /// Reduce sanitized names to latin letters, digits and `_`.
    pub chars_latin_only: bool,

    /// `strftime` pattern used for timestamps in responses.
    pub date_format: String,

    /// Layout of rendered records.
    pub response_shape: ResponseShape,

    /// Accept paths carrying the absolute doc root as a prefix.
    pub allow_absolute_paths: bool,

    /// Allow symlinks inside the doc root to point outside of it.
    pub follow_symlinks: bool,

    /// Maximum total size of the doc root in bytes (uploads only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_root_size_limit: Option<u64>,

    /// Maximum traversal depth of `summarize`.
    pub summary_max_depth: usize,

    /// Mode for created directories.
    pub folder_permissions: u32,

    /// Mode for created files.
    pub file_permissions: u32,
}

/// Exclusion lists and edit restrictions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Refuse every modification.
    pub read_only: bool,

    /// Directory names hidden from every operation.
    pub excluded_dirs: Vec<String>,

    /// Directory names matching this expression are hidden. Empty disables.
    pub excluded_dirs_regex: String,

    /// File names hidden from every operation.
    pub excluded_files: Vec<String>,

    /// File names matching this expression are hidden. Empty disables.
    pub excluded_files_regex: String,

    /// Extensions that may be read and saved as text.
    pub edit_extensions: Vec<String>,

    /// Whether files without an extension may be uploaded.
    pub allow_no_extension: bool,

    /// Compare extensions case-insensitively.
    pub extensions_ignore_case: bool,
}

/// Upload policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    /// `ALLOW_ALL` or `DISALLOW_ALL`.
    pub policy: UploadPolicy,

    /// Extensions excepted from the policy.
    pub restrictions: Vec<String>,

    /// Maximum size of a single uploaded item in bytes (default: 16MB).
    pub file_size_limit: u64,

    /// Overwrite existing files instead of choosing a free name.
    pub overwrite: bool,
}

/// Image handling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImagesConfig {
    /// Extensions treated as images.
    pub extensions: Vec<String>,

    /// Thumbnail generation.
    pub thumbnail: ThumbnailConfig,
}

/// Thumbnail generation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Store generated thumbnails; when off they are built per request.
    pub enabled: bool,

    /// Thumbnail mirror root. Relative paths are taken from the doc root.
    pub dir: PathBuf,

    /// Maximum thumbnail width in pixels.
    pub max_width: u32,

    /// Maximum thumbnail height in pixels.
    pub max_height: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
            socket_path: None,
            messages_file: None,
        }
    }
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            doc_root: default_doc_root(),
            server_root: String::new(),
            capabilities: Capability::ALL.iter().map(|c| c.as_str().to_string()).collect(),
            allow_folder_download: true,
            chars_latin_only: false,
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            response_shape: ResponseShape::Attributes,
            allow_absolute_paths: false,
            follow_symlinks: false,
            file_root_size_limit: None,
            summary_max_depth: 10,
            folder_permissions: 0o755,
            file_permissions: 0o644,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            excluded_dirs: vec![
                "_thumbs".to_string(),
                ".git".to_string(),
                ".svn".to_string(),
            ],
            excluded_dirs_regex: r"^\..*".to_string(),
            excluded_files: vec![
                ".htaccess".to_string(),
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
            ],
            excluded_files_regex: r"^\..*".to_string(),
            edit_extensions: ["txt", "csv", "md", "json", "xml", "html", "css", "js"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allow_no_extension: false,
            extensions_ignore_case: true,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            policy: UploadPolicy::DisallowAll,
            restrictions: [
                "jpg", "jpe", "jpeg", "gif", "png", "svg", "txt", "pdf", "odp", "ods", "odt",
                "rtf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "csv", "ogv", "avi", "mkv",
                "mp4", "webm", "m4v", "ogg", "mp3", "wav", "zip", "md",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            file_size_limit: 16 * 1024 * 1024, // 16MB
            overwrite: false,
        }
    }
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            extensions: ["jpg", "jpe", "jpeg", "gif", "png", "bmp", "webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            thumbnail: ThumbnailConfig::default(),
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("_thumbs"),
            max_width: 64,
            max_height: 64,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filedeck")
        .join("config.toml")
}

/// Returns the default doc root.
fn default_doc_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filedeck")
        .join("files")
}

impl ThumbnailConfig {
    /// Absolute location of the thumbnail mirror for a given doc root.
    pub fn resolve_dir(&self, doc_root: &Path) -> PathBuf {
        if self.dir.is_absolute() {
            self.dir.clone()
        } else {
            doc_root.join(&self.dir)
        }
    }
}

impl OptionsConfig {
    /// Rendering options derived from this section.
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            shape: self.response_shape,
            date_format: self.date_format.clone(),
        }
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - FILEDECK_DOC_ROOT: Override the doc root
    /// - FILEDECK_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("FILEDECK_DOC_ROOT") {
            if !root.is_empty() {
                tracing::info!("Overriding doc_root from environment: {}", root);
                self.options.doc_root = PathBuf::from(root);
            }
        }

        if let Ok(level) = std::env::var("FILEDECK_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range
    /// or a policy value cannot be compiled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        if self.options.doc_root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDocRoot);
        }

        if self.upload.file_size_limit == 0 {
            return Err(ConfigError::InvalidFileSizeLimit(self.upload.file_size_limit));
        }

        let thumb = &self.images.thumbnail;
        if thumb.max_width == 0 || thumb.max_height == 0 {
            return Err(ConfigError::InvalidThumbnailSize {
                width: thumb.max_width,
                height: thumb.max_height,
            });
        }

        if self.options.summary_max_depth == 0 {
            return Err(ConfigError::InvalidSummaryDepth(self.options.summary_max_depth));
        }

        for name in &self.options.capabilities {
            Capability::from_str(name)?;
        }

        validate_regex("excluded_dirs_regex", &self.security.excluded_dirs_regex)?;
        validate_regex("excluded_files_regex", &self.security.excluded_files_regex)?;

        if StrftimeItems::new(&self.options.date_format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::InvalidDateFormat(self.options.date_format.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    ///
    /// The default path is `~/.config/filedeck/config.toml`.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn validate_regex(field: &'static str, pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Ok(());
    }
    regex::Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidExclusionRegex {
            field,
            message: e.to_string(),
        })
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
