//! Request and response model for Filedeck actions.
//!
//! A transport adapter decodes an inbound request into an [`ActionRequest`]
//! (an [`Action`] plus named string parameters and uploaded items), hands it
//! to the engine, and writes back either an [`ActionResult`] envelope or a
//! [`BinaryPayload`] for actions that serve raw bytes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Every action the engine exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Report the client-facing configuration.
    Initiate,
    /// List the immediate children of a directory.
    #[serde(alias = "list")]
    GetFolder,
    /// Describe a single file.
    #[serde(alias = "getentry")]
    GetFile,
    /// Rename a file or directory in place.
    Rename,
    /// Move an entry into another directory.
    Move,
    /// Copy an entry into another directory.
    Copy,
    /// Delete a file or a directory tree.
    Delete,
    /// Create a directory.
    AddFolder,
    /// Upload one or more files into a directory.
    Upload,
    /// Replace the content of an existing file with an uploaded one.
    Replace,
    /// Read an editable file as text.
    ReadFile,
    /// Alias of [`Action::ReadFile`] kept for older clients.
    EditFile,
    /// Overwrite an editable file with new text.
    SaveFile,
    /// Serve image bytes, optionally as a thumbnail.
    GetImage,
    /// Serve a file, or a directory as a ZIP archive.
    Download,
    /// Aggregate counts and sizes for the whole tree.
    Summarize,
    /// Unpack a ZIP archive into a directory.
    Extract,
}

impl Action {
    /// All actions, in dispatch table order.
    pub const ALL: [Action; 17] = [
        Action::Initiate,
        Action::GetFolder,
        Action::GetFile,
        Action::Rename,
        Action::Move,
        Action::Copy,
        Action::Delete,
        Action::AddFolder,
        Action::Upload,
        Action::Replace,
        Action::ReadFile,
        Action::EditFile,
        Action::SaveFile,
        Action::GetImage,
        Action::Download,
        Action::Summarize,
        Action::Extract,
    ];

    /// The wire name of this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Initiate => "initiate",
            Action::GetFolder => "getfolder",
            Action::GetFile => "getfile",
            Action::Rename => "rename",
            Action::Move => "move",
            Action::Copy => "copy",
            Action::Delete => "delete",
            Action::AddFolder => "addfolder",
            Action::Upload => "upload",
            Action::Replace => "replace",
            Action::ReadFile => "readfile",
            Action::EditFile => "editfile",
            Action::SaveFile => "savefile",
            Action::GetImage => "getimage",
            Action::Download => "download",
            Action::Summarize => "summarize",
            Action::Extract => "extract",
        }
    }

    /// Whether a successful run of this action changes the doc root.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Action::Rename
                | Action::Move
                | Action::Copy
                | Action::Delete
                | Action::AddFolder
                | Action::Upload
                | Action::Replace
                | Action::SaveFile
                | Action::Extract
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "list" => return Ok(Action::GetFolder),
            "getentry" => return Ok(Action::GetFile),
            _ => {}
        }
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == lowered)
            .ok_or_else(|| ProtocolError::UnknownAction(s.to_string()))
    }
}

/// A multipart item supplied with `upload` and `replace`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadItem {
    /// File name as submitted by the client (not yet sanitized).
    pub file_name: String,
    /// Declared content type; `None` for non-file form fields.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Raw item bytes.
    #[serde(with = "base64_bytes", default)]
    pub data: Vec<u8>,
}

impl UploadItem {
    /// Create an item with a declared content type.
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: Some(content_type.into()),
            data,
        }
    }

    /// Size of the item in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// An action plus the named parameters extracted by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Which action to run.
    pub action: Action,
    /// Named string parameters (`path`, `old`, `new`, `name`, ...).
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Uploaded items, in submission order.
    #[serde(default)]
    pub items: Vec<UploadItem>,
}

impl ActionRequest {
    /// Create a request without parameters.
    pub fn new(action: Action) -> Self {
        Self {
            action,
            params: BTreeMap::new(),
            items: Vec::new(),
        }
    }

    /// Add a named parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Add an uploaded item.
    pub fn with_item(mut self, item: UploadItem) -> Self {
        self.items.push(item);
        self
    }

    /// Look up a parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Interpret a parameter as a boolean flag. Absent means `false`.
    pub fn flag(&self, name: &str) -> Result<bool, ProtocolError> {
        match self.param(name).map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(false),
            Some(v) if v.is_empty() || v == "false" || v == "0" => Ok(false),
            Some(v) if v == "true" || v == "1" => Ok(true),
            Some(v) => Err(ProtocolError::InvalidParameter {
                name: name.to_string(),
                value: v,
            }),
        }
    }
}

/// Kind of entity a [`FileRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Folder,
}

impl EntryKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Folder => "folder",
        }
    }
}

/// Normalized description of a file or folder, built fresh per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Relative path used to address the entity; directories end with `/`.
    pub id: String,
    /// File or folder.
    pub kind: EntryKind,
    /// Last path segment (`/` for the doc root).
    pub name: String,
    /// Extension after the last dot (files only).
    pub extension: Option<String>,
    /// Client-facing path (server root prefix + id).
    pub display_path: String,
    /// Whether the engine process may read the entity.
    pub readable: bool,
    /// Whether the engine process may write the entity.
    pub writable: bool,
    /// Creation time, or modification time where the platform has none.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub modified_at: DateTime<Utc>,
    /// Size in bytes (0 for folders).
    pub size_bytes: u64,
    /// Image width in pixels (0 for non-images).
    pub pixel_width: u32,
    /// Image height in pixels (0 for non-images).
    pub pixel_height: u32,
    /// Text content, only present for `readfile`/`editfile`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl FileRecord {
    /// Whether this record describes a directory.
    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }
}

/// Aggregate produced by `summarize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SummaryRecord {
    /// Number of non-directory entries visited.
    pub file_count: u64,
    /// Number of directories visited, excluding the walk root.
    pub folder_count: u64,
    /// Total size of the files that could be stat'ed.
    pub total_size_bytes: u64,
    /// Configured doc-root size limit, if any.
    pub size_limit: Option<u64>,
}

/// Client-facing configuration reported by `initiate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiateRecord {
    /// Granted capability names.
    pub capabilities: Vec<String>,
    /// Whether folders may be downloaded as archives.
    pub allow_folder_download: bool,
    /// Whether names are reduced to latin characters.
    pub chars_latin_only: bool,
    /// Whether files without an extension may be uploaded.
    pub allow_no_extension: bool,
    /// Extensions that may be opened in the text editor.
    pub edit_extensions: Vec<String>,
    /// Upload policy name as configured.
    pub upload_policy: String,
    /// Upload restriction list.
    pub upload_restrictions: Vec<String>,
    /// Maximum upload size in bytes.
    pub upload_size_limit: u64,
    /// Extensions treated as images.
    pub image_extensions: Vec<String>,
    /// Thumbnail width bound in pixels.
    pub thumbnail_max_width: u32,
    /// Thumbnail height hint in pixels; thumbnails are fit to width.
    pub thumbnail_max_height: u32,
    /// Whether the engine refuses all modifications.
    pub read_only: bool,
}

/// Successful response payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// A single entity.
    Record(FileRecord),
    /// Several entities.
    Records(Vec<FileRecord>),
    /// Tree summary.
    Summary(SummaryRecord),
    /// Shared configuration.
    Initiate(InitiateRecord),
}

/// Error taxonomy with stable numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The path tried to leave the doc root.
    PathSecurity,
    /// The capability gate refused the action.
    PermissionDenied,
    /// Source or target does not exist.
    NotFound,
    /// Expected a file and got a directory, or vice versa.
    TypeMismatch,
    /// The target already exists.
    Conflict,
    /// A required parameter was missing or malformed.
    InvalidRequest,
    /// An exclusion pattern in the configuration does not compile.
    Syntax,
    /// A policy value is missing or invalid.
    Config,
    /// A filesystem call failed.
    Io,
    /// An upload exceeds a size limit.
    UploadTooLarge,
    /// An upload has a forbidden type.
    UploadRejectedType,
    /// An upload has no content.
    UploadEmpty,
}

impl ErrorKind {
    /// Numeric code sent to clients.
    pub fn code(&self) -> u16 {
        match self {
            ErrorKind::PathSecurity | ErrorKind::PermissionDenied => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::TypeMismatch | ErrorKind::InvalidRequest | ErrorKind::UploadEmpty => 400,
            ErrorKind::Conflict => 409,
            ErrorKind::Syntax | ErrorKind::Config | ErrorKind::Io => 500,
            ErrorKind::UploadTooLarge => 413,
            ErrorKind::UploadRejectedType => 415,
        }
    }

    /// Stable identifier sent as the envelope `id`.
    pub fn id(&self) -> &'static str {
        match self {
            ErrorKind::PathSecurity => "path_security",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::TypeMismatch => "type_mismatch",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Syntax => "syntax",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
            ErrorKind::UploadTooLarge => "upload_too_large",
            ErrorKind::UploadRejectedType => "upload_rejected_type",
            ErrorKind::UploadEmpty => "upload_empty",
        }
    }
}

/// Keys of human-readable messages, resolved by the caller's dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKey {
    ModeError,
    MissingParameter,
    NotAllowed,
    NotAllowedSystem,
    InvalidDirectoryOrFile,
    DirectoryNotExist,
    FileDoesNotExist,
    ForbiddenActionDir,
    ForbiddenName,
    InvalidFileType,
    DirectoryAlreadyExists,
    FileAlreadyExists,
    DirectoryEmpty,
    UnableToCreateDirectory,
    UnableToOpenDirectory,
    ErrorRenamingDirectory,
    ErrorRenamingFile,
    ErrorMovingDirectory,
    ErrorMovingFile,
    ErrorCopyingDirectory,
    ErrorCopyingFile,
    ErrorDeleting,
    ErrorUploadingFile,
    ErrorSavingFile,
    ErrorReadingFile,
    ErrorExtractingFile,
    FileEmpty,
    UploadFileTooBig,
    StorageSizeExceed,
    ErrorConfigFile,
    ErrorServer,
}

impl MessageKey {
    /// The dictionary key string.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKey::ModeError => "MODE_ERROR",
            MessageKey::MissingParameter => "MISSING_PARAMETER",
            MessageKey::NotAllowed => "NOT_ALLOWED",
            MessageKey::NotAllowedSystem => "NOT_ALLOWED_SYSTEM",
            MessageKey::InvalidDirectoryOrFile => "INVALID_DIRECTORY_OR_FILE",
            MessageKey::DirectoryNotExist => "DIRECTORY_NOT_EXIST",
            MessageKey::FileDoesNotExist => "FILE_DOES_NOT_EXIST",
            MessageKey::ForbiddenActionDir => "FORBIDDEN_ACTION_DIR",
            MessageKey::ForbiddenName => "FORBIDDEN_NAME",
            MessageKey::InvalidFileType => "INVALID_FILE_TYPE",
            MessageKey::DirectoryAlreadyExists => "DIRECTORY_ALREADY_EXISTS",
            MessageKey::FileAlreadyExists => "FILE_ALREADY_EXISTS",
            MessageKey::DirectoryEmpty => "DIRECTORY_EMPTY",
            MessageKey::UnableToCreateDirectory => "UNABLE_TO_CREATE_DIRECTORY",
            MessageKey::UnableToOpenDirectory => "UNABLE_TO_OPEN_DIRECTORY",
            MessageKey::ErrorRenamingDirectory => "ERROR_RENAMING_DIRECTORY",
            MessageKey::ErrorRenamingFile => "ERROR_RENAMING_FILE",
            MessageKey::ErrorMovingDirectory => "ERROR_MOVING_DIRECTORY",
            MessageKey::ErrorMovingFile => "ERROR_MOVING_FILE",
            MessageKey::ErrorCopyingDirectory => "ERROR_COPYING_DIRECTORY",
            MessageKey::ErrorCopyingFile => "ERROR_COPYING_FILE",
            MessageKey::ErrorDeleting => "ERROR_DELETING",
            MessageKey::ErrorUploadingFile => "ERROR_UPLOADING_FILE",
            MessageKey::ErrorSavingFile => "ERROR_SAVING_FILE",
            MessageKey::ErrorReadingFile => "ERROR_READING_FILE",
            MessageKey::ErrorExtractingFile => "ERROR_EXTRACTING_FILE",
            MessageKey::FileEmpty => "FILE_EMPTY",
            MessageKey::UploadFileTooBig => "UPLOAD_FILE_TOO_BIG",
            MessageKey::StorageSizeExceed => "STORAGE_SIZE_EXCEED",
            MessageKey::ErrorConfigFile => "ERROR_CONFIG_FILE",
            MessageKey::ErrorServer => "ERROR_SERVER",
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single error returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Stable error identifier (see [`ErrorKind::id`]).
    pub id: String,
    /// Numeric error code.
    pub code: u16,
    /// Dictionary key of the message.
    pub key: MessageKey,
    /// Values substituted into the message template.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Resolved human-readable message.
    pub message: String,
    /// Optional location the client should navigate to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

impl ErrorEnvelope {
    /// Build an envelope whose message is the bare key.
    pub fn new(kind: ErrorKind, key: MessageKey, arguments: Vec<String>) -> Self {
        Self {
            id: kind.id().to_string(),
            code: kind.code(),
            key,
            arguments,
            message: key.as_str().to_string(),
            redirect: None,
        }
    }
}

/// Either a payload or a list of errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionResult {
    /// Successful payload.
    Data(Payload),
    /// One or more errors.
    Errors(Vec<ErrorEnvelope>),
}

impl ActionResult {
    /// Wrap a single error.
    pub fn error(envelope: ErrorEnvelope) -> Self {
        ActionResult::Errors(vec![envelope])
    }

    /// Whether this is an error result.
    pub fn is_error(&self) -> bool {
        matches!(self, ActionResult::Errors(_))
    }
}

/// How served bytes should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// Displayed by the client (images, previews).
    Inline,
    /// Saved by the client (downloads).
    Attachment,
}

/// Raw bytes served by `getimage` and `download`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryPayload {
    /// File name presented to the client.
    pub file_name: String,
    /// MIME type of the bytes.
    pub content_type: String,
    /// Inline or attachment.
    pub disposition: Disposition,
    /// The bytes.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Everything the engine can hand back to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// A JSON-like envelope.
    Json(ActionResult),
    /// A byte stream.
    Binary(BinaryPayload),
}

impl ActionOutcome {
    /// The envelope, if this outcome is not binary.
    pub fn as_result(&self) -> Option<&ActionResult> {
        match self {
            ActionOutcome::Json(result) => Some(result),
            ActionOutcome::Binary(_) => None,
        }
    }
}

impl From<ActionResult> for ActionOutcome {
    fn from(result: ActionResult) -> Self {
        ActionOutcome::Json(result)
    }
}

/// Serde adapter carrying bytes as standard base64 strings.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
