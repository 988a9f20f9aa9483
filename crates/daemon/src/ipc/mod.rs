//! Unix Domain Socket transport for the action engine.
//!
//! ## Overview
//!
//! The IPC system uses a JSON newline-delimited protocol for simplicity and
//! debugging convenience. Each message is a single JSON object followed by a
//! newline. Uploaded items and served bytes are base64 strings.
//!
//! ## Socket Path
//!
//! The socket path follows the XDG Base Directory Specification:
//! - Primary: `$XDG_RUNTIME_DIR/filedeck/daemon.sock`
//! - Fallback: `/tmp/filedeck-$UID/daemon.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use filedeck::ipc::{IpcClient, IpcResponse, get_socket_path};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = IpcClient::connect(&get_socket_path()).await?;
//!
//!     let mut params = BTreeMap::new();
//!     params.insert("mode".to_string(), "getfolder".to_string());
//!     params.insert("path".to_string(), "/".to_string());
//!
//!     if let IpcResponse::Json { body } = client.execute(params, Vec::new()).await? {
//!         println!("{}", body);
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod messages;
mod server;

pub use client::IpcClient;
pub use messages::{IpcRequest, IpcResponse};
pub use server::{IpcConnection, IpcError, IpcServer};

use std::path::PathBuf;

/// Get the socket path for IPC communication.
///
/// 1. If `$XDG_RUNTIME_DIR` is set: `$XDG_RUNTIME_DIR/filedeck/daemon.sock`
/// 2. Otherwise: `/tmp/filedeck-$UID/daemon.sock`
pub fn get_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !runtime_dir.is_empty() {
            return PathBuf::from(runtime_dir)
                .join("filedeck")
                .join("daemon.sock");
        }
    }

    let uid = nix::unistd::getuid();
    PathBuf::from(format!("/tmp/filedeck-{}", uid)).join("daemon.sock")
}
