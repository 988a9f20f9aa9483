//! Action engine.
//!
//! The engine receives an [`ActionRequest`] and dispatches it to the handler
//! for its [`Action`]. Every handler runs the same ordered pipeline of
//! checks (see [`Stage`]) before touching the filesystem, and every failure
//! is turned into an [`ErrorEnvelope`](protocol::ErrorEnvelope) at the
//! engine boundary.
//!
//! An engine is built once from a validated [`Config`] and never mutated.
//! Reloading the configuration means building a new engine.

mod actions;
mod error;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use protocol::{
    Action, ActionOutcome, ActionRequest, ActionResult, ErrorKind, MessageKey, RenderOptions,
};
use tracing::{debug, error, info_span, warn};

pub use error::{EngineError, Stage};

use crate::codec::{ImageCodec, ImageCrateCodec};
use crate::config::{Config, ConfigError};
use crate::files::{
    DirectorySummarizer, ExtensionPolicy, MetadataBuilder, NamePolicy, PathResolver,
    PermissionGate, ThumbnailCache,
};
use crate::messages::{MessageCatalog, MessageResolver};

/// Executes file-manager actions against a single doc root.
pub struct ActionEngine {
    config: Config,
    resolver: PathResolver,
    names: NamePolicy,
    extensions: ExtensionPolicy,
    gate: PermissionGate,
    metadata: MetadataBuilder,
    thumbnails: ThumbnailCache,
    summarizer: DirectorySummarizer,
    messages: Arc<dyn MessageResolver>,
    render: RenderOptions,
}

impl ActionEngine {
    /// Build an engine with the default image codec and the configured
    /// message catalog.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let messages: Arc<dyn MessageResolver> = match &config.daemon.messages_file {
            Some(path) => Arc::new(MessageCatalog::load(path).map_err(|e| {
                ConfigError::MessagesFile {
                    path: path.display().to_string(),
                    message: format!("{:#}", e),
                }
            })?),
            None => Arc::new(MessageCatalog::english()),
        };
        Self::with_collaborators(config, Arc::new(ImageCrateCodec), messages)
    }

    /// Build an engine with explicit codec and message resolver.
    pub fn with_collaborators(
        config: &Config,
        codec: Arc<dyn ImageCodec>,
        messages: Arc<dyn MessageResolver>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        prepare_doc_root(&config.options.doc_root, config.options.folder_permissions)?;

        let resolver = PathResolver::new(&config.options.doc_root)
            .map_err(|e| ConfigError::DocRootUnavailable {
                path: config.options.doc_root.display().to_string(),
                message: e.to_string(),
            })?
            .allow_absolute(config.options.allow_absolute_paths)
            .follow_symlinks(config.options.follow_symlinks);

        let names = NamePolicy::from_config(&config.security)?;
        let extensions = ExtensionPolicy::from_config(config);
        let gate = PermissionGate::from_config(config)?;
        let metadata = MetadataBuilder::new(
            &config.options.server_root,
            extensions.clone(),
            Arc::clone(&codec),
        );
        let thumbnails = ThumbnailCache::new(
            config.images.thumbnail.resolve_dir(resolver.root()),
            config.images.thumbnail.max_width,
            codec,
        );

        debug!(
            root = %resolver.root().display(),
            thumbnails = %thumbnails.dir().display(),
            read_only = config.security.read_only,
            "Action engine ready"
        );

        Ok(Self {
            summarizer: DirectorySummarizer::new(config.options.summary_max_depth),
            render: config.options.render_options(),
            config: config.clone(),
            resolver,
            names,
            extensions,
            gate,
            metadata,
            thumbnails,
            messages,
        })
    }

    /// The configuration this engine was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Canonical doc root.
    pub fn doc_root(&self) -> &Path {
        self.resolver.root()
    }

    /// Response rendering options.
    pub fn render_options(&self) -> &RenderOptions {
        &self.render
    }

    /// Run an action and convert any failure into an error envelope.
    pub fn execute(&self, request: &ActionRequest) -> ActionOutcome {
        match self.run(request) {
            Ok(outcome) => outcome,
            Err(e) => {
                match e.kind() {
                    ErrorKind::Io | ErrorKind::Config | ErrorKind::Syntax => {
                        error!(action = %request.action, error = %e, "Action failed")
                    }
                    _ => warn!(action = %request.action, error = %e, "Action rejected"),
                }
                ActionOutcome::Json(ActionResult::error(e.to_envelope(self.messages.as_ref())))
            }
        }
    }

    /// Run an action, keeping the typed error.
    pub fn run(&self, request: &ActionRequest) -> Result<ActionOutcome, EngineError> {
        let span = info_span!("action", action = %request.action);
        let _enter = span.enter();
        debug!(params = ?request.params, items = request.items.len(), "Dispatching action");

        match request.action {
            Action::Initiate => self.initiate(),
            Action::GetFolder => self.get_folder(request),
            Action::GetFile => self.get_file(request),
            Action::Rename => self.rename(request),
            Action::Move => self.relocate(request, Relocation::Move),
            Action::Copy => self.relocate(request, Relocation::Copy),
            Action::Delete => self.delete(request),
            Action::AddFolder => self.add_folder(request),
            Action::Upload => self.upload(request),
            Action::Replace => self.replace(request),
            Action::ReadFile | Action::EditFile => self.read_file(request),
            Action::SaveFile => self.save_file(request),
            Action::GetImage => self.get_image(request),
            Action::Download => self.download(request),
            Action::Summarize => self.summarize(),
            Action::Extract => self.extract(request),
        }
    }

    /// Error envelope answering a request when no engine could be built
    /// from the configuration.
    pub fn unavailable(err: ConfigError) -> ActionOutcome {
        let err = EngineError::from(err);
        error!(error = %err, "No engine for this configuration");
        ActionOutcome::Json(ActionResult::error(err.to_envelope(&MessageCatalog::english())))
    }

    /// Error envelope for a request that could not be parsed into an action.
    pub fn unknown_action(&self, raw: &str) -> ActionOutcome {
        let err = EngineError::new(ErrorKind::InvalidRequest, Stage::Parameters, MessageKey::ModeError)
            .arg(raw);
        ActionOutcome::Json(ActionResult::error(err.to_envelope(self.messages.as_ref())))
    }
}

/// Move and copy share their pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relocation {
    Move,
    Copy,
}

/// Create a missing doc root, refuse one that is not a directory.
fn prepare_doc_root(root: &Path, mode: u32) -> Result<(), ConfigError> {
    match fs::metadata(root) {
        Ok(m) if m.is_dir() => Ok(()),
        Ok(_) => Err(ConfigError::DocRootNotDirectory(root.display().to_string())),
        Err(_) => {
            let unavailable = |e: std::io::Error| ConfigError::DocRootUnavailable {
                path: root.display().to_string(),
                message: e.to_string(),
            };
            fs::create_dir_all(root).map_err(unavailable)?;
            fs::set_permissions(root, fs::Permissions::from_mode(mode)).map_err(unavailable)?;
            tracing::info!(root = %root.display(), "Created doc root");
            Ok(())
        }
    }
}
