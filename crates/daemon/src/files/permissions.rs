//! Capability gate.
//!
//! Each action maps to the capabilities it requires. The gate is always the
//! first validation stage so that a caller without the capability learns
//! nothing about the filesystem state. A read-only engine additionally
//! refuses every mutating action, regardless of capabilities.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use protocol::Action;
use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigError};

/// A named permission gating whether an action may be attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Upload,
    Download,
    Rename,
    Copy,
    Move,
    Delete,
    Edit,
    Replace,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::Upload,
        Capability::Download,
        Capability::Rename,
        Capability::Copy,
        Capability::Move,
        Capability::Delete,
        Capability::Edit,
        Capability::Replace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Upload => "upload",
            Capability::Download => "download",
            Capability::Rename => "rename",
            Capability::Copy => "copy",
            Capability::Move => "move",
            Capability::Delete => "delete",
            Capability::Edit => "edit",
            Capability::Replace => "replace",
        }
    }

    /// Capabilities an action requires. Read-only actions require none.
    pub fn required_for(action: Action) -> &'static [Capability] {
        match action {
            Action::Rename => &[Capability::Rename],
            Action::Move => &[Capability::Move],
            Action::Copy => &[Capability::Copy],
            Action::Delete => &[Capability::Delete],
            Action::Upload | Action::Extract => &[Capability::Upload],
            Action::Replace => &[Capability::Replace, Capability::Upload],
            Action::ReadFile | Action::EditFile | Action::SaveFile => &[Capability::Edit],
            Action::Download => &[Capability::Download],
            Action::Initiate
            | Action::GetFolder
            | Action::GetFile
            | Action::AddFolder
            | Action::GetImage
            | Action::Summarize => &[],
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == lowered)
            .ok_or_else(|| ConfigError::UnknownCapability(s.to_string()))
    }
}

/// Why the gate refused an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// The engine is configured read-only.
    ReadOnly,
    /// A required capability is not granted.
    Missing(Capability),
}

/// Per-action capability allowlist.
#[derive(Debug, Clone)]
pub struct PermissionGate {
    granted: BTreeSet<Capability>,
    read_only: bool,
}

impl PermissionGate {
    pub fn new(granted: impl IntoIterator<Item = Capability>, read_only: bool) -> Self {
        Self {
            granted: granted.into_iter().collect(),
            read_only,
        }
    }

    /// Gate granting every capability.
    pub fn allow_all() -> Self {
        Self::new(Capability::ALL, false)
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let granted = config
            .options
            .capabilities
            .iter()
            .map(|name| name.parse())
            .collect::<Result<Vec<Capability>, _>>()?;
        Ok(Self::new(granted, config.security.read_only))
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.granted.contains(&capability)
    }

    /// Whether mutating actions may run at all.
    pub fn allows_writes(&self) -> bool {
        !self.read_only
    }

    /// Gate an action.
    pub fn check(&self, action: Action) -> Result<(), Denial> {
        if self.read_only && action.is_mutating() {
            return Err(Denial::ReadOnly);
        }
        for capability in Capability::required_for(action) {
            if !self.has_capability(*capability) {
                return Err(Denial::Missing(*capability));
            }
        }
        Ok(())
    }

    /// Granted capability names, sorted.
    pub fn granted_names(&self) -> Vec<String> {
        self.granted.iter().map(|c| c.as_str().to_string()).collect()
    }
}
