//! Human-readable error messages.
//!
//! The engine reports errors as a [`MessageKey`] plus arguments. A
//! [`MessageResolver`] turns them into text; [`MessageCatalog`] ships English
//! templates that a TOML file can override:
//!
//! ```toml
//! FILE_ALREADY_EXISTS = "Le fichier %s existe déjà."
//! ```
//!
//! Each `%s` in a template is replaced by the next argument.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use protocol::MessageKey;

/// Resolves message keys to text.
pub trait MessageResolver: Send + Sync {
    fn resolve(&self, key: MessageKey, arguments: &[String]) -> String;
}

/// Message templates keyed by [`MessageKey`].
#[derive(Debug, Clone)]
pub struct MessageCatalog {
    templates: HashMap<MessageKey, String>,
}

impl Default for MessageCatalog {
    fn default() -> Self {
        Self::english()
    }
}

impl MessageCatalog {
    /// Built-in English templates.
    pub fn english() -> Self {
        use MessageKey::*;
        let entries: [(MessageKey, &str); 31] = [
            (ModeError, "Unknown action: %s."),
            (MissingParameter, "Missing required parameter: %s."),
            (NotAllowed, "You are not allowed to perform this action."),
            (NotAllowedSystem, "The system does not permit this operation on %s."),
            (InvalidDirectoryOrFile, "Invalid directory or file name: %s."),
            (DirectoryNotExist, "Directory %s does not exist."),
            (FileDoesNotExist, "File %s does not exist."),
            (ForbiddenActionDir, "This action is not allowed on directory %s."),
            (ForbiddenName, "The name %s is not allowed."),
            (InvalidFileType, "The file type of %s is not allowed."),
            (DirectoryAlreadyExists, "A directory named %s already exists."),
            (FileAlreadyExists, "A file named %s already exists."),
            (DirectoryEmpty, "Directory %s is empty."),
            (UnableToCreateDirectory, "Unable to create directory %s."),
            (UnableToOpenDirectory, "Unable to open directory %s."),
            (ErrorRenamingDirectory, "Error renaming directory %s to %s."),
            (ErrorRenamingFile, "Error renaming file %s to %s."),
            (ErrorMovingDirectory, "Error moving directory %s to %s."),
            (ErrorMovingFile, "Error moving file %s to %s."),
            (ErrorCopyingDirectory, "Error copying directory %s to %s."),
            (ErrorCopyingFile, "Error copying file %s to %s."),
            (ErrorDeleting, "Error deleting %s."),
            (ErrorUploadingFile, "Error uploading file %s."),
            (ErrorSavingFile, "Error saving file %s."),
            (ErrorReadingFile, "Error reading file %s."),
            (ErrorExtractingFile, "Error extracting archive %s."),
            (FileEmpty, "The uploaded file %s is empty."),
            (UploadFileTooBig, "The file %s exceeds the upload size limit of %s bytes."),
            (StorageSizeExceed, "Not enough storage space left for %s."),
            (ErrorConfigFile, "Invalid configuration: %s."),
            (ErrorServer, "Server error."),
        ];

        Self {
            templates: entries
                .into_iter()
                .map(|(key, text)| (key, text.to_string()))
                .collect(),
        }
    }

    /// English templates overridden by a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read messages file: {}", path.display()))?;
        Self::english()
            .with_overrides(&contents)
            .with_context(|| format!("Failed to parse messages file: {}", path.display()))
    }

    /// Apply overrides from a TOML table of `KEY = "template"` pairs.
    /// Unknown keys are ignored with a warning.
    pub fn with_overrides(mut self, toml_str: &str) -> Result<Self> {
        let table: HashMap<String, String> =
            toml::from_str(toml_str).context("Invalid messages TOML")?;

        for (raw_key, template) in table {
            match serde_json::from_value::<MessageKey>(serde_json::Value::String(raw_key.clone())) {
                Ok(key) => {
                    self.templates.insert(key, template);
                }
                Err(_) => tracing::warn!(key = %raw_key, "Ignoring unknown message key"),
            }
        }
        Ok(self)
    }

    /// Template for a key; falls back to the key itself.
    pub fn template(&self, key: MessageKey) -> &str {
        self.templates
            .get(&key)
            .map(String::as_str)
            .unwrap_or_else(|| key.as_str())
    }
}

impl MessageResolver for MessageCatalog {
    fn resolve(&self, key: MessageKey, arguments: &[String]) -> String {
        fill(self.template(key), arguments)
    }
}

/// Replace each `%s` with the next argument; missing arguments become empty.
fn fill(template: &str, arguments: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = arguments.iter();
    let mut rest = template;
    while let Some(pos) = rest.find("%s") {
        out.push_str(&rest[..pos]);
        if let Some(arg) = args.next() {
            out.push_str(arg);
        }
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}
