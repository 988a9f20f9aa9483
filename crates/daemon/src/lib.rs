//! # Filedeck Daemon Library
//!
//! Server side of a browser file manager. Every client request names one
//! action and is checked against a fixed series of policies before the
//! filesystem is touched.
//!
//! ## Overview
//!
//! - **Action Engine**: staged validation and execution of the seventeen
//!   file-manager actions
//! - **Path Resolution**: client paths are normalized and confined to the
//!   doc root
//! - **Policies**: capability gate, name exclusions, upload and image
//!   extension rules, storage limit
//! - **Thumbnails**: a cache mirroring the doc root tree
//! - **Transport**: one request in, one JSON envelope or byte payload out;
//!   served locally over a Unix socket
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 FileService (socket)                      │
//! ├──────────────────────────────────────────────────────────┤
//! │  Transport ──► ActionEngine ──► Capability ► Parameters   │
//! │                                 Resolve ► Existence ► ... │
//! │                                 Execute ► Describe        │
//! │                                                           │
//! │  ┌────────────┐ ┌────────────┐ ┌──────────────────────┐  │
//! │  │ PathResolver│ │  Policies  │ │ ThumbnailCache       │  │
//! │  └────────────┘ └────────────┘ └──────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use filedeck::{ActionEngine, Config};
//! use protocol::{Action, ActionRequest};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let engine = ActionEngine::new(&config)?;
//!
//!     let request = ActionRequest::new(Action::GetFolder).with_param("path", "/");
//!     let outcome = engine.execute(&request);
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading, defaults and validation
//! - [`engine`]: The staged action pipeline
//! - [`files`]: Path resolution, policies, listing, thumbnails, transfers
//! - [`codec`]: Image decoding and thumbnail rendering
//! - [`messages`]: Localized error messages
//! - [`transport`]: Transport adapters
//! - [`ipc`]: Unix socket protocol
//! - [`service`]: Socket service with live reload

pub mod codec;
pub mod config;
pub mod engine;
pub mod files;
pub mod ipc;
pub mod messages;
pub mod service;
pub mod transport;

// Re-export protocol for convenience
pub use protocol;

pub use config::{Config, ConfigError};
pub use engine::{ActionEngine, EngineError, Stage};
pub use service::FileService;
pub use transport::{BufferedTransport, Reply, Transport};
