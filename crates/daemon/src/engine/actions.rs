//! Per-action pipelines.
//!
//! Each handler walks the stages in [`Stage`] order and returns at the
//! first failure. Stages that do not apply to an action are skipped.

use std::fs;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;

use nix::unistd::{access, AccessFlags};
use protocol::{
    Action, ActionOutcome, ActionRequest, ActionResult, BinaryPayload, Disposition, ErrorKind,
    FileRecord, InitiateRecord, MessageKey, Payload, SummaryRecord, UploadItem,
};
use tracing::{debug, info};

use super::{ActionEngine, EngineError, Relocation, Stage};
use crate::files::browser::ListFilter;
use crate::files::permissions::Denial;
use crate::files::policy::sanitize_name;
use crate::files::resolver::{PathError, RelPath, Resolved};
use crate::files::summary::DirectorySummarizer;
use crate::files::thumbnail::ThumbnailError;
use crate::files::transfer;

type Outcome = Result<ActionOutcome, EngineError>;

/// Punctuation kept in file names when only latin characters are allowed.
const FILE_NAME_CHARS: &[char] = &['.', '-'];

/// Punctuation kept in folder names when only latin characters are allowed.
const FOLDER_NAME_CHARS: &[char] = &['-'];

fn data(payload: Payload) -> Outcome {
    Ok(ActionOutcome::Json(ActionResult::Data(payload)))
}

fn path_error(err: PathError, raw: &str) -> EngineError {
    match err {
        PathError::RootUnavailable(_) => {
            EngineError::new(ErrorKind::Io, Stage::Resolve, MessageKey::ErrorServer).with_source(err)
        }
        _ => EngineError::new(
            ErrorKind::PathSecurity,
            Stage::Resolve,
            MessageKey::InvalidDirectoryOrFile,
        )
        .arg(raw)
        .with_source(err),
    }
}

fn require_access(path: &Path, flags: AccessFlags, id: String) -> Result<(), EngineError> {
    access(path, flags).map_err(|errno| {
        EngineError::new(
            ErrorKind::PermissionDenied,
            Stage::SystemAccess,
            MessageKey::NotAllowedSystem,
        )
        .arg(id)
        .with_source(errno)
    })
}

fn forbidden_name(name: &str) -> EngineError {
    EngineError::new(ErrorKind::PermissionDenied, Stage::NamePolicy, MessageKey::ForbiddenName)
        .arg(name)
}

fn protect_root(rel: &RelPath) -> Result<(), EngineError> {
    if rel.is_root() {
        return Err(EngineError::not_allowed(Stage::RootProtection));
    }
    Ok(())
}

/// Refuse a target that already exists, naming its actual type.
fn vacant(target: &Resolved) -> Result<(), EngineError> {
    match fs::symlink_metadata(&target.path) {
        Ok(m) if m.is_dir() => Err(EngineError::new(
            ErrorKind::Conflict,
            Stage::Conflict,
            MessageKey::DirectoryAlreadyExists,
        )
        .arg(target.rel.to_id(true))),
        Ok(_) => Err(EngineError::new(
            ErrorKind::Conflict,
            Stage::Conflict,
            MessageKey::FileAlreadyExists,
        )
        .arg(target.rel.to_id(false))),
        Err(_) => Ok(()),
    }
}

/// A path given with a trailing separator names a directory.
fn names_dir(raw: &str) -> bool {
    raw.trim_end().ends_with(['/', '\\'])
}

fn current_mode(path: &Path, fallback: u32) -> u32 {
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o7777)
        .unwrap_or(fallback)
}

impl ActionEngine {
    // Pipeline stages shared by the handlers.

    fn authorize(&self, action: Action) -> Result<(), EngineError> {
        self.gate.check(action).map_err(|denial| {
            match denial {
                Denial::ReadOnly => debug!(action = %action, "Refused by read-only mode"),
                Denial::Missing(capability) => {
                    debug!(action = %action, capability = capability.as_str(), "Capability not granted")
                }
            }
            EngineError::not_allowed(Stage::Capability)
        })
    }

    fn required<'a>(&self, request: &'a ActionRequest, name: &str) -> Result<&'a str, EngineError> {
        request
            .param(name)
            .ok_or_else(|| EngineError::missing_parameter(name))
    }

    fn resolve(&self, raw: &str) -> Result<Resolved, EngineError> {
        self.resolver.resolve(raw).map_err(|e| path_error(e, raw))
    }

    fn locate(&self, rel: RelPath) -> Result<Resolved, EngineError> {
        match self.resolver.locate(&rel) {
            Ok(path) => Ok(Resolved { rel, path }),
            Err(e) => Err(path_error(e, &rel.to_string())),
        }
    }

    fn existing_dir(&self, target: &Resolved) -> Result<(), EngineError> {
        match fs::metadata(&target.path) {
            Ok(m) if m.is_dir() => Ok(()),
            Ok(_) => Err(EngineError::new(
                ErrorKind::TypeMismatch,
                Stage::Existence,
                MessageKey::InvalidDirectoryOrFile,
            )
            .arg(target.rel.to_id(false))),
            Err(_) => Err(EngineError::new(
                ErrorKind::NotFound,
                Stage::Existence,
                MessageKey::DirectoryNotExist,
            )
            .arg(target.rel.to_id(true))),
        }
    }

    fn existing_file(&self, target: &Resolved) -> Result<(), EngineError> {
        match fs::metadata(&target.path) {
            Ok(m) if !m.is_dir() => Ok(()),
            Ok(_) => Err(EngineError::new(
                ErrorKind::TypeMismatch,
                Stage::Existence,
                MessageKey::ForbiddenActionDir,
            )
            .arg(target.rel.to_id(true))),
            Err(_) => Err(EngineError::new(
                ErrorKind::NotFound,
                Stage::Existence,
                MessageKey::FileDoesNotExist,
            )
            .arg(target.rel.to_id(false))),
        }
    }

    /// Existing entry of either type. Returns whether it is a directory.
    fn existing_entry(&self, target: &Resolved, expect_dir: bool) -> Result<bool, EngineError> {
        match fs::metadata(&target.path) {
            Ok(m) => Ok(m.is_dir()),
            Err(_) => {
                let key = if expect_dir {
                    MessageKey::DirectoryNotExist
                } else {
                    MessageKey::FileDoesNotExist
                };
                Err(EngineError::new(ErrorKind::NotFound, Stage::Existence, key)
                    .arg(target.rel.to_id(expect_dir)))
            }
        }
    }

    fn writable_parent(&self, rel: &RelPath) -> Result<(), EngineError> {
        let parent = rel.parent().unwrap_or_else(RelPath::root);
        require_access(
            &parent.to_fs_path(self.resolver.root()),
            AccessFlags::W_OK,
            parent.to_id(true),
        )
    }

    fn allowed_path(&self, rel: &RelPath, is_dir: bool) -> Result<(), EngineError> {
        if self.names.is_allowed_path(rel, is_dir) {
            return Ok(());
        }
        Err(forbidden_name(rel.file_name().unwrap_or("/")))
    }

    fn editable(&self, target: &Resolved) -> Result<(), EngineError> {
        let name = target.rel.file_name().unwrap_or_default();
        if self.extensions.is_editable_name(name) {
            return Ok(());
        }
        Err(
            EngineError::new(ErrorKind::PermissionDenied, Stage::NamePolicy, MessageKey::InvalidFileType)
                .arg(name),
        )
    }

    fn describe(&self, target: &Resolved) -> Result<FileRecord, EngineError> {
        self.metadata
            .describe(&target.rel, &target.path)
            .map_err(|e| EngineError::new(ErrorKind::Io, Stage::Describe, MessageKey::ErrorServer).with_source(e))
    }

    /// Validate one upload item and return its sanitized name.
    fn check_upload(&self, item: &UploadItem) -> Result<String, EngineError> {
        if item.content_type.as_deref().map_or(true, |ct| ct.trim().is_empty()) {
            return Err(EngineError::new(
                ErrorKind::UploadRejectedType,
                Stage::Upload,
                MessageKey::InvalidFileType,
            )
            .arg(&item.file_name));
        }
        if item.data.is_empty() {
            return Err(
                EngineError::new(ErrorKind::UploadEmpty, Stage::Upload, MessageKey::FileEmpty)
                    .arg(&item.file_name),
            );
        }

        let base = item
            .file_name
            .rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or_default();
        let name = sanitize_name(base, FILE_NAME_CHARS, self.config.options.chars_latin_only);
        if name.is_empty() || !self.names.is_allowed_name(&name, false) {
            return Err(forbidden_name(&item.file_name));
        }
        if !self.extensions.is_allowed_upload(&name) {
            return Err(EngineError::new(
                ErrorKind::UploadRejectedType,
                Stage::Upload,
                MessageKey::InvalidFileType,
            )
            .arg(name));
        }

        let limit = self.config.upload.file_size_limit;
        if item.size() > limit {
            return Err(EngineError::new(
                ErrorKind::UploadTooLarge,
                Stage::Upload,
                MessageKey::UploadFileTooBig,
            )
            .arg(name)
            .arg(limit.to_string()));
        }
        Ok(name)
    }

    /// Refuse writes that would push the doc root over its size limit.
    ///
    /// Usage is measured over the whole tree; the summary depth bound does
    /// not apply here.
    fn check_storage(&self, adding: u64, releasing: u64, label: &str) -> Result<(), EngineError> {
        let Some(limit) = self.config.options.file_root_size_limit else {
            return Ok(());
        };
        let used = DirectorySummarizer::unbounded()
            .walk(self.resolver.root(), |name, is_dir| self.names.is_allowed_name(name, is_dir))
            .total_size_bytes;
        let after = used.saturating_sub(releasing).saturating_add(adding);
        if after > limit {
            debug!(used, adding, limit, "Storage limit reached");
            return Err(EngineError::new(
                ErrorKind::UploadTooLarge,
                Stage::Upload,
                MessageKey::StorageSizeExceed,
            )
            .arg(label));
        }
        Ok(())
    }

    fn walk_root(&self) -> SummaryRecord {
        self.summarizer
            .walk(self.resolver.root(), |name, is_dir| self.names.is_allowed_name(name, is_dir))
    }

    // Handlers.

    pub(super) fn initiate(&self) -> Outcome {
        self.authorize(Action::Initiate)?;
        let config = &self.config;
        data(Payload::Initiate(InitiateRecord {
            capabilities: self.gate.granted_names(),
            allow_folder_download: config.options.allow_folder_download,
            chars_latin_only: config.options.chars_latin_only,
            allow_no_extension: config.security.allow_no_extension,
            edit_extensions: config.security.edit_extensions.clone(),
            upload_policy: config.upload.policy.as_str().to_string(),
            upload_restrictions: config.upload.restrictions.clone(),
            upload_size_limit: config.upload.file_size_limit,
            image_extensions: config.images.extensions.clone(),
            thumbnail_max_width: config.images.thumbnail.max_width,
            thumbnail_max_height: config.images.thumbnail.max_height,
            read_only: config.security.read_only,
        }))
    }

    pub(super) fn get_folder(&self, request: &ActionRequest) -> Outcome {
        self.authorize(Action::GetFolder)?;
        let dir = self.resolve(self.required(request, "path")?)?;
        let filter = ListFilter::from_param(request.param("type"));

        self.existing_dir(&dir)?;
        require_access(&dir.path, AccessFlags::R_OK, dir.rel.to_id(true))?;
        self.allowed_path(&dir.rel, true)?;

        let records = self
            .metadata
            .list(&self.resolver, &self.names, &dir.rel, filter)
            .map_err(|e| {
                EngineError::io(MessageKey::UnableToOpenDirectory)
                    .arg(dir.rel.to_id(true))
                    .with_source(e)
            })?;
        debug!(path = %dir.rel, count = records.len(), "Listed directory");
        data(Payload::Records(records))
    }

    pub(super) fn get_file(&self, request: &ActionRequest) -> Outcome {
        self.authorize(Action::GetFile)?;
        let target = self.resolve(self.required(request, "path")?)?;

        self.existing_file(&target)?;
        require_access(&target.path, AccessFlags::R_OK, target.rel.to_id(false))?;
        self.allowed_path(&target.rel, false)?;

        data(Payload::Record(self.describe(&target)?))
    }

    pub(super) fn rename(&self, request: &ActionRequest) -> Outcome {
        self.authorize(Action::Rename)?;
        let old = self.required(request, "old")?;
        let new = self.required(request, "new")?;
        let source = self.resolve(old)?;

        let is_dir = self.existing_entry(&source, names_dir(old))?;
        self.writable_parent(&source.rel)?;

        self.allowed_path(&source.rel, is_dir)?;
        let name = sanitize_name(new, FILE_NAME_CHARS, self.config.options.chars_latin_only);
        if name.is_empty() || !self.names.is_allowed_name(&name, is_dir) {
            return Err(forbidden_name(new));
        }
        if !is_dir && !self.extensions.is_allowed_upload(&name) {
            return Err(EngineError::new(
                ErrorKind::UploadRejectedType,
                Stage::NamePolicy,
                MessageKey::InvalidFileType,
            )
            .arg(name));
        }

        protect_root(&source.rel)?;

        let parent = source.rel.parent().unwrap_or_else(RelPath::root);
        let target = self.locate(parent.join(&name))?;
        vacant(&target)?;

        fs::rename(&source.path, &target.path).map_err(|e| {
            let key = if is_dir {
                MessageKey::ErrorRenamingDirectory
            } else {
                MessageKey::ErrorRenamingFile
            };
            EngineError::io(key)
                .arg(source.rel.to_id(is_dir))
                .arg(&name)
                .with_source(e)
        })?;
        info!(from = %source.rel, to = %target.rel, "Renamed");

        self.thumbnails.relocate(&source.rel, &target.rel);
        data(Payload::Record(self.describe(&target)?))
    }

    pub(super) fn relocate(&self, request: &ActionRequest, mode: Relocation) -> Outcome {
        let (action, source_param, target_param) = match mode {
            Relocation::Move => (Action::Move, "old", "new"),
            Relocation::Copy => (Action::Copy, "source", "target"),
        };
        self.authorize(action)?;
        let raw_source = self.required(request, source_param)?;
        let raw_target = self.required(request, target_param)?;
        let source = self.resolve(raw_source)?;
        // The target always denotes a directory.
        let target_dir = self.resolve(raw_target)?;

        let is_dir = self.existing_entry(&source, names_dir(raw_source))?;
        self.existing_dir(&target_dir)?;

        require_access(&source.path, AccessFlags::R_OK, source.rel.to_id(is_dir))?;
        require_access(&target_dir.path, AccessFlags::W_OK, target_dir.rel.to_id(true))?;
        if mode == Relocation::Move {
            self.writable_parent(&source.rel)?;
        }

        self.allowed_path(&source.rel, is_dir)?;
        self.allowed_path(&target_dir.rel, true)?;

        protect_root(&source.rel)?;
        if is_dir && target_dir.rel.starts_with(&source.rel) {
            return Err(EngineError::not_allowed(Stage::RootProtection));
        }
        let Some(name) = source.rel.file_name() else {
            return Err(EngineError::not_allowed(Stage::RootProtection));
        };

        let destination = self.locate(target_dir.rel.join(name))?;
        vacant(&destination)?;

        let failed = |key: MessageKey| {
            EngineError::io(key)
                .arg(source.rel.to_id(is_dir))
                .arg(target_dir.rel.to_id(true))
        };
        match mode {
            Relocation::Move => {
                transfer::move_path(&source.path, &destination.path).map_err(|e| {
                    let key = if is_dir {
                        MessageKey::ErrorMovingDirectory
                    } else {
                        MessageKey::ErrorMovingFile
                    };
                    failed(key).with_source(e)
                })?;
                info!(from = %source.rel, to = %destination.rel, "Moved");
                self.thumbnails.relocate(&source.rel, &destination.rel);
            }
            Relocation::Copy => {
                let files = transfer::copy_tree(&source.path, &destination.path).map_err(|e| {
                    let key = if is_dir {
                        MessageKey::ErrorCopyingDirectory
                    } else {
                        MessageKey::ErrorCopyingFile
                    };
                    failed(key).with_source(e)
                })?;
                info!(from = %source.rel, to = %destination.rel, files, "Copied");
            }
        }

        data(Payload::Record(self.describe(&destination)?))
    }

    pub(super) fn delete(&self, request: &ActionRequest) -> Outcome {
        self.authorize(Action::Delete)?;
        let raw = self.required(request, "path")?;
        let target = self.resolve(raw)?;

        let is_dir = self.existing_entry(&target, names_dir(raw))?;
        self.writable_parent(&target.rel)?;
        self.allowed_path(&target.rel, is_dir)?;
        protect_root(&target.rel)?;

        // Clients get a description of what was removed.
        let snapshot = self.describe(&target)?;

        transfer::remove_path(&target.path).map_err(|e| {
            EngineError::io(MessageKey::ErrorDeleting)
                .arg(target.rel.to_id(is_dir))
                .with_source(e)
        })?;
        info!(path = %target.rel, is_dir, "Deleted");

        self.thumbnails.remove(&target.rel);
        data(Payload::Record(snapshot))
    }

    pub(super) fn add_folder(&self, request: &ActionRequest) -> Outcome {
        self.authorize(Action::AddFolder)?;
        let parent = self.resolve(self.required(request, "path")?)?;
        let raw_name = self.required(request, "name")?;

        self.existing_dir(&parent)?;
        require_access(&parent.path, AccessFlags::W_OK, parent.rel.to_id(true))?;
        self.allowed_path(&parent.rel, true)?;

        let unable = || {
            EngineError::new(
                ErrorKind::InvalidRequest,
                Stage::NamePolicy,
                MessageKey::UnableToCreateDirectory,
            )
            .arg(raw_name)
        };
        if raw_name.contains(['/', '\\']) || raw_name.trim() == ".." {
            return Err(unable());
        }
        let name = sanitize_name(raw_name, FOLDER_NAME_CHARS, self.config.options.chars_latin_only);
        if name.is_empty() {
            return Err(unable());
        }
        if !self.names.is_allowed_name(&name, true) {
            return Err(forbidden_name(&name));
        }

        let target = self.locate(parent.rel.join(&name))?;
        vacant(&target)?;

        let mode = self.config.options.folder_permissions;
        let create_failed = |e: std::io::Error| {
            EngineError::io(MessageKey::UnableToCreateDirectory)
                .arg(target.rel.to_id(true))
                .with_source(e)
        };
        fs::DirBuilder::new()
            .mode(mode)
            .create(&target.path)
            .map_err(create_failed)?;
        // The umask may have narrowed the requested mode.
        fs::set_permissions(&target.path, fs::Permissions::from_mode(mode)).map_err(create_failed)?;
        info!(path = %target.rel, mode = %format_args!("{:o}", mode), "Created folder");

        data(Payload::Record(self.describe(&target)?))
    }

    pub(super) fn upload(&self, request: &ActionRequest) -> Outcome {
        self.authorize(Action::Upload)?;
        let dir = self.resolve(self.required(request, "path")?)?;
        if request.items.is_empty() {
            return Err(EngineError::missing_parameter("files"));
        }

        self.existing_dir(&dir)?;
        require_access(&dir.path, AccessFlags::W_OK, dir.rel.to_id(true))?;
        self.allowed_path(&dir.rel, true)?;

        // Nothing is written unless every item is acceptable.
        let names = request
            .items
            .iter()
            .map(|item| self.check_upload(item))
            .collect::<Result<Vec<_>, _>>()?;
        let total: u64 = request.items.iter().map(UploadItem::size).sum();
        self.check_storage(total, 0, &names.join(", "))?;

        let mut records = Vec::with_capacity(names.len());
        for (item, name) in request.items.iter().zip(names) {
            let name = if self.config.upload.overwrite {
                name
            } else {
                transfer::unique_name(&dir.path, &name)
            };
            let target = self.locate(dir.rel.join(&name))?;
            if target.path.is_dir() {
                return Err(EngineError::new(
                    ErrorKind::Conflict,
                    Stage::Conflict,
                    MessageKey::DirectoryAlreadyExists,
                )
                .arg(target.rel.to_id(true)));
            }

            transfer::write_atomic(&target.path, &item.data, Some(self.config.options.file_permissions))
                .map_err(|e| {
                    EngineError::io(MessageKey::ErrorUploadingFile)
                        .arg(target.rel.to_id(false))
                        .with_source(e)
                })?;
            info!(path = %target.rel, bytes = item.size(), "Uploaded file");

            // An overwritten image must not keep its old thumbnail.
            self.thumbnails.remove(&target.rel);
            records.push(self.describe(&target)?);
        }

        data(Payload::Records(records))
    }

    pub(super) fn replace(&self, request: &ActionRequest) -> Outcome {
        self.authorize(Action::Replace)?;
        let target = self.resolve(self.required(request, "path")?)?;
        let [item] = request.items.as_slice() else {
            return Err(EngineError::missing_parameter("files"));
        };

        self.existing_file(&target)?;
        require_access(&target.path, AccessFlags::W_OK, target.rel.to_id(false))?;
        self.allowed_path(&target.rel, false)?;

        let name = self.check_upload(item)?;
        let previous = fs::metadata(&target.path).map(|m| m.len()).unwrap_or(0);
        self.check_storage(item.size(), previous, &name)?;

        let mode = current_mode(&target.path, self.config.options.file_permissions);
        transfer::write_atomic(&target.path, &item.data, Some(mode)).map_err(|e| {
            EngineError::io(MessageKey::ErrorUploadingFile)
                .arg(target.rel.to_id(false))
                .with_source(e)
        })?;
        info!(path = %target.rel, bytes = item.size(), "Replaced file");

        self.thumbnails.remove(&target.rel);
        data(Payload::Record(self.describe(&target)?))
    }

    pub(super) fn read_file(&self, request: &ActionRequest) -> Outcome {
        self.authorize(request.action)?;
        let target = self.resolve(self.required(request, "path")?)?;

        self.existing_file(&target)?;
        require_access(&target.path, AccessFlags::R_OK, target.rel.to_id(false))?;
        self.allowed_path(&target.rel, false)?;
        self.editable(&target)?;

        let content = fs::read_to_string(&target.path).map_err(|e| {
            EngineError::io(MessageKey::ErrorReadingFile)
                .arg(target.rel.to_id(false))
                .with_source(e)
        })?;

        let mut record = self.describe(&target)?;
        record.content = Some(content);
        data(Payload::Record(record))
    }

    pub(super) fn save_file(&self, request: &ActionRequest) -> Outcome {
        self.authorize(Action::SaveFile)?;
        let target = self.resolve(self.required(request, "path")?)?;
        let content = self.required(request, "content")?;

        self.existing_file(&target)?;
        require_access(&target.path, AccessFlags::W_OK, target.rel.to_id(false))?;
        self.allowed_path(&target.rel, false)?;
        self.editable(&target)?;

        let mode = current_mode(&target.path, self.config.options.file_permissions);
        transfer::write_atomic(&target.path, content.as_bytes(), Some(mode)).map_err(|e| {
            EngineError::io(MessageKey::ErrorSavingFile)
                .arg(target.rel.to_id(false))
                .with_source(e)
        })?;
        info!(path = %target.rel, bytes = content.len(), "Saved file");

        data(Payload::Record(self.describe(&target)?))
    }

    pub(super) fn get_image(&self, request: &ActionRequest) -> Outcome {
        self.authorize(Action::GetImage)?;
        let target = self.resolve(self.required(request, "path")?)?;
        let thumbnail = request.flag("thumbnail").map_err(|e| {
            EngineError::new(ErrorKind::InvalidRequest, Stage::Parameters, MessageKey::MissingParameter)
                .arg("thumbnail")
                .with_source(e)
        })?;

        self.existing_file(&target)?;
        require_access(&target.path, AccessFlags::R_OK, target.rel.to_id(false))?;
        self.allowed_path(&target.rel, false)?;
        let name = target.rel.file_name().unwrap_or_default();
        if !self.extensions.is_image_name(name) {
            return Err(EngineError::new(
                ErrorKind::PermissionDenied,
                Stage::NamePolicy,
                MessageKey::InvalidFileType,
            )
            .arg(name));
        }

        let bytes = if thumbnail {
            self.thumbnail_bytes(&target)?
        } else {
            self.read_bytes(&target)?
        };

        Ok(ActionOutcome::Binary(BinaryPayload {
            file_name: name.to_string(),
            content_type: mime_guess::from_path(&target.path)
                .first_or_octet_stream()
                .to_string(),
            disposition: Disposition::Inline,
            data: bytes,
        }))
    }

    fn read_bytes(&self, target: &Resolved) -> Result<Vec<u8>, EngineError> {
        fs::read(&target.path).map_err(|e| {
            EngineError::io(MessageKey::ErrorReadingFile)
                .arg(target.rel.to_id(false))
                .with_source(e)
        })
    }

    /// Cached thumbnail when caching is enabled, otherwise an in-memory one.
    /// A read-only engine serves existing cache entries but never stores new ones.
    fn thumbnail_bytes(&self, target: &Resolved) -> Result<Vec<u8>, EngineError> {
        let failed = |e: ThumbnailError| EngineError::io(MessageKey::ErrorServer).with_source(e);

        if self.config.images.thumbnail.enabled {
            let cached = self
                .thumbnails
                .get_or_create(&target.rel, &target.path, self.gate.allows_writes())
                .map_err(failed)?;
            if let Some(path) = cached {
                return fs::read(&path).map_err(|e| {
                    EngineError::io(MessageKey::ErrorReadingFile)
                        .arg(target.rel.to_id(false))
                        .with_source(e)
                });
            }
        }
        self.thumbnails.render(&target.path).map_err(failed)
    }

    pub(super) fn download(&self, request: &ActionRequest) -> Outcome {
        self.authorize(Action::Download)?;
        let raw = self.required(request, "path")?;
        let target = self.resolve(raw)?;

        // Decided from the request alone so a refusal says nothing about
        // what exists.
        if !self.config.options.allow_folder_download && (names_dir(raw) || target.rel.is_root()) {
            return Err(EngineError::not_allowed(Stage::Capability));
        }

        let is_dir = self.existing_entry(&target, names_dir(raw))?;
        require_access(&target.path, AccessFlags::R_OK, target.rel.to_id(is_dir))?;
        self.allowed_path(&target.rel, is_dir)?;

        if !is_dir {
            let name = target.rel.file_name().unwrap_or_default().to_string();
            let bytes = self.read_bytes(&target)?;
            info!(path = %target.rel, bytes = bytes.len(), "Serving download");
            return Ok(ActionOutcome::Binary(BinaryPayload {
                content_type: mime_guess::from_path(&target.path)
                    .first_or_octet_stream()
                    .to_string(),
                file_name: name,
                disposition: Disposition::Attachment,
                data: bytes,
            }));
        }

        if !self.config.options.allow_folder_download {
            return Err(EngineError::not_allowed(Stage::Capability));
        }
        protect_root(&target.rel)?;

        let mut entries = fs::read_dir(&target.path).map_err(|e| {
            EngineError::io(MessageKey::UnableToOpenDirectory)
                .arg(target.rel.to_id(true))
                .with_source(e)
        })?;
        if entries.next().is_none() {
            return Err(EngineError::new(
                ErrorKind::InvalidRequest,
                Stage::Existence,
                MessageKey::DirectoryEmpty,
            )
            .arg(target.rel.to_id(true)));
        }

        let archive = transfer::zip_directory(&target.path, |name, is_dir| {
            self.names.is_allowed_name(name, is_dir)
        })
        .map_err(|e| EngineError::io(MessageKey::ErrorServer).with_source(e))?;
        info!(path = %target.rel, bytes = archive.len(), "Serving folder archive");

        Ok(ActionOutcome::Binary(BinaryPayload {
            file_name: format!("{}.zip", target.rel.file_name().unwrap_or("archive")),
            content_type: "application/zip".to_string(),
            disposition: Disposition::Attachment,
            data: archive,
        }))
    }

    /// Unpack a ZIP archive into a directory.
    ///
    /// Entries are filtered like uploads: names are sanitized segment by
    /// segment, excluded names and refused extensions are skipped, and so is
    /// anything over the upload size limit. Entries that would leave the
    /// target never make it past listing. The reply lists the top-level
    /// entries written.
    pub(super) fn extract(&self, request: &ActionRequest) -> Outcome {
        self.authorize(Action::Extract)?;
        let source = self.resolve(self.required(request, "source")?)?;
        let target_dir = self.resolve(self.required(request, "target")?)?;

        self.existing_file(&source)?;
        self.existing_dir(&target_dir)?;

        require_access(&source.path, AccessFlags::R_OK, source.rel.to_id(false))?;
        require_access(&target_dir.path, AccessFlags::W_OK, target_dir.rel.to_id(true))?;

        self.allowed_path(&source.rel, false)?;
        self.allowed_path(&target_dir.rel, true)?;

        let failed = |e: transfer::TransferError| {
            EngineError::io(MessageKey::ErrorExtractingFile)
                .arg(source.rel.to_id(false))
                .with_source(e)
        };
        let mut archive = transfer::open_archive(&source.path).map_err(failed)?;
        let listed = transfer::list_archive(&mut archive, &source.path).map_err(failed)?;

        let limit = self.config.upload.file_size_limit;
        let mut accepted = Vec::with_capacity(listed.len());
        for entry in listed {
            let Some(rel) = self.archive_entry_path(&target_dir.rel, &entry.path) else {
                debug!(entry = %entry.path.display(), "Skipping archive entry with unusable name");
                continue;
            };
            let name = rel.file_name().unwrap_or_default();
            let refused = !self.names.is_allowed_path(&rel, entry.is_dir)
                || (!entry.is_dir && (!self.extensions.is_allowed_upload(name) || entry.size > limit));
            if refused {
                debug!(entry = %rel, "Skipping restricted archive entry");
                continue;
            }
            accepted.push((entry, rel));
        }

        let total: u64 = accepted.iter().filter(|(e, _)| !e.is_dir).map(|(e, _)| e.size).sum();
        self.check_storage(total, 0, &source.rel.to_id(false))?;

        let depth = target_dir.rel.segments().len();
        let dir_mode = self.config.options.folder_permissions;
        let mut top_level: Vec<RelPath> = Vec::new();
        let mut written = 0usize;
        for (entry, rel) in accepted {
            let target = match self.locate(rel) {
                Ok(target) => target,
                Err(e) => {
                    debug!(error = %e, "Skipping archive entry outside the doc root");
                    continue;
                }
            };
            let parent = if entry.is_dir {
                target.path.clone()
            } else {
                target.path.parent().map(Path::to_path_buf).unwrap_or_else(|| target.path.clone())
            };
            fs::DirBuilder::new()
                .recursive(true)
                .mode(dir_mode)
                .create(&parent)
                .map_err(|e| {
                    EngineError::io(MessageKey::UnableToCreateDirectory)
                        .arg(target.rel.to_id(true))
                        .with_source(e)
                })?;

            let mut rel = target.rel.clone();
            if !entry.is_dir {
                if target.path.is_dir() {
                    debug!(entry = %target.rel, "Skipping file entry shadowed by a directory");
                    continue;
                }
                let dir = rel.parent().unwrap_or_else(RelPath::root);
                let name = rel.file_name().unwrap_or_default().to_string();
                let name = if self.config.upload.overwrite {
                    name
                } else {
                    transfer::unique_name(&parent, &name)
                };
                rel = dir.join(&name);

                let bytes = transfer::read_entry(&mut archive, &source.path, entry.index, limit)
                    .map_err(failed)?;
                transfer::write_atomic(
                    &parent.join(&name),
                    &bytes,
                    Some(self.config.options.file_permissions),
                )
                .map_err(failed)?;
                self.thumbnails.remove(&rel);
                written += 1;
            }

            if let Some(first) = rel.segments().get(depth) {
                let top = target_dir.rel.join(first);
                if !top_level.contains(&top) {
                    top_level.push(top);
                }
            }
        }
        info!(source = %source.rel, target = %target_dir.rel, files = written, "Extracted archive");

        let records = top_level
            .into_iter()
            .map(|rel| self.locate(rel).and_then(|target| self.describe(&target)))
            .collect::<Result<Vec<_>, _>>()?;
        data(Payload::Records(records))
    }

    /// Relative path of an archive entry below `target`, each segment
    /// sanitized like an uploaded file name. `None` when a segment is
    /// unusable.
    fn archive_entry_path(&self, target: &RelPath, entry: &Path) -> Option<RelPath> {
        let raw = entry.to_str()?;
        let segments = RelPath::parse(raw);
        if segments.is_root() {
            return None;
        }
        segments.segments().iter().try_fold(target.clone(), |rel, segment| {
            let name = sanitize_name(segment, FILE_NAME_CHARS, self.config.options.chars_latin_only);
            (!name.is_empty()).then(|| rel.join(&name))
        })
    }

    pub(super) fn summarize(&self) -> Outcome {
        self.authorize(Action::Summarize)?;
        let mut summary = self.walk_root();
        summary.size_limit = self.config.options.file_root_size_limit;
        debug!(
            files = summary.file_count,
            folders = summary.folder_count,
            bytes = summary.total_size_bytes,
            "Summarized doc root"
        );
        data(Payload::Summary(summary))
    }
}
