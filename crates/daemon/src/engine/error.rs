//! Engine errors and the validation stage that produced them.

use std::fmt;

use protocol::{ErrorEnvelope, ErrorKind, MessageKey};
use thiserror::Error;

use crate::config::ConfigError;
use crate::messages::MessageResolver;

/// Validation and execution stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Building the engine from its configuration.
    Configuration,
    /// Capability gate (and the read-only switch).
    Capability,
    /// Required request parameters.
    Parameters,
    /// Path resolution against the doc root.
    Resolve,
    /// Existence and file-vs-directory checks.
    Existence,
    /// OS-level readable/writable checks.
    SystemAccess,
    /// Name exclusion and extension rules.
    NamePolicy,
    /// Refusal to touch the doc root or move a directory into itself.
    RootProtection,
    /// Upload item validation and storage limits.
    Upload,
    /// Target already exists.
    Conflict,
    /// The filesystem call itself.
    Execute,
    /// Building the response record.
    Describe,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Configuration => "configuration",
            Stage::Capability => "capability",
            Stage::Parameters => "parameters",
            Stage::Resolve => "resolve",
            Stage::Existence => "existence",
            Stage::SystemAccess => "system-access",
            Stage::NamePolicy => "name-policy",
            Stage::RootProtection => "root-protection",
            Stage::Upload => "upload",
            Stage::Conflict => "conflict",
            Stage::Execute => "execute",
            Stage::Describe => "describe",
        };
        f.write_str(name)
    }
}

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A failed action: taxonomy kind, stage, message key and arguments.
#[derive(Debug, Error)]
#[error("{key} at {stage} stage ({kind:?}){}", detail(.source))]
pub struct EngineError {
    kind: ErrorKind,
    stage: Stage,
    key: MessageKey,
    arguments: Vec<String>,
    #[source]
    source: Option<BoxedSource>,
}

fn detail(source: &Option<BoxedSource>) -> String {
    match source {
        Some(e) => format!(": {}", e),
        None => String::new(),
    }
}

impl EngineError {
    pub fn new(kind: ErrorKind, stage: Stage, key: MessageKey) -> Self {
        Self {
            kind,
            stage,
            key,
            arguments: Vec::new(),
            source: None,
        }
    }

    /// Append a message argument.
    pub fn arg(mut self, argument: impl Into<String>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn missing_parameter(name: &str) -> Self {
        Self::new(ErrorKind::InvalidRequest, Stage::Parameters, MessageKey::MissingParameter).arg(name)
    }

    pub fn not_allowed(stage: Stage) -> Self {
        Self::new(ErrorKind::PermissionDenied, stage, MessageKey::NotAllowed)
    }

    pub fn io(key: MessageKey) -> Self {
        Self::new(ErrorKind::Io, Stage::Execute, key)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn message_key(&self) -> MessageKey {
        self.key
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Client-facing envelope. Never carries internal error details.
    pub fn to_envelope(&self, resolver: &dyn MessageResolver) -> ErrorEnvelope {
        let mut envelope = ErrorEnvelope::new(self.kind, self.key, self.arguments.clone());
        envelope.message = resolver.resolve(self.key, &self.arguments);
        envelope
    }
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::new(err.kind(), Stage::Configuration, MessageKey::ErrorConfigFile)
            .arg(err.to_string())
            .with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageCatalog;

    #[test]
    fn test_builder_and_accessors() {
        let err = EngineError::new(ErrorKind::Conflict, Stage::Conflict, MessageKey::FileAlreadyExists)
            .arg("/c/b.txt");

        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.stage(), Stage::Conflict);
        assert_eq!(err.message_key(), MessageKey::FileAlreadyExists);
        assert_eq!(err.arguments(), &["/c/b.txt".to_string()]);
    }

    #[test]
    fn test_display_includes_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = EngineError::io(MessageKey::ErrorDeleting).arg("/a").with_source(io);
        let text = err.to_string();

        assert!(text.contains("ERROR_DELETING"));
        assert!(text.contains("execute"));
        assert!(text.contains("disk on fire"));
    }

    #[test]
    fn test_envelope_hides_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "secret internal detail");
        let err = EngineError::io(MessageKey::ErrorDeleting).arg("/a").with_source(io);
        let envelope = err.to_envelope(&MessageCatalog::english());

        assert_eq!(envelope.code, 500);
        assert_eq!(envelope.id, "io");
        assert_eq!(envelope.message, "Error deleting /a.");
        assert!(!envelope.message.contains("secret"));
    }

    #[test]
    fn test_missing_parameter() {
        let err = EngineError::missing_parameter("path");
        assert_eq!(err.kind().code(), 400);
        assert_eq!(err.stage(), Stage::Parameters);
        assert_eq!(err.arguments(), &["path".to_string()]);
    }

    #[test]
    fn test_stage_order() {
        assert!(Stage::Capability < Stage::Existence);
        assert!(Stage::Existence < Stage::SystemAccess);
        assert!(Stage::NamePolicy < Stage::RootProtection);
        assert!(Stage::Conflict < Stage::Execute);
    }

    #[test]
    fn test_config_errors_map_to_taxonomy() {
        let syntax = EngineError::from(ConfigError::InvalidExclusionRegex {
            field: "excluded_dirs_regex",
            message: "unclosed group".to_string(),
        });
        assert_eq!(syntax.kind(), ErrorKind::Syntax);
        assert_eq!(syntax.stage(), Stage::Configuration);
        assert_eq!(syntax.message_key(), MessageKey::ErrorConfigFile);

        let config = EngineError::from(ConfigError::EmptyDocRoot);
        assert_eq!(config.kind(), ErrorKind::Config);

        let envelope = config.to_envelope(&MessageCatalog::english());
        assert_eq!(envelope.id, "config");
        assert_eq!(envelope.code, 500);
        assert_eq!(envelope.message, "Invalid configuration: doc_root must not be empty.");
    }
}
