//! IPC message types for client-daemon communication.
//!
//! This module defines the request and response types exchanged over the
//! Unix Domain Socket. Binary payloads travel as base64 inside the JSON line.

use std::collections::BTreeMap;

use protocol::{BinaryPayload, UploadItem};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transport::Reply;

/// Requests that can be sent from a client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcRequest {
    /// Check if the daemon is alive.
    Ping,
    /// Run one action. `params` carries the action name under `mode`.
    Execute {
        params: BTreeMap<String, String>,
        #[serde(default)]
        items: Vec<UploadItem>,
    },
    /// Reload the configuration file and rebuild the engine.
    Reload,
}

/// Responses sent from the daemon to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcResponse {
    /// Response to a Ping request.
    Pong,
    /// A rendered JSON envelope.
    Json {
        body: Value,
    },
    /// Raw bytes from `getimage` or `download`.
    Binary(BinaryPayload),
    /// The configuration was reloaded.
    Reloaded,
    /// The request could not be served.
    Error {
        /// Human-readable error message.
        message: String,
    },
}

impl From<Reply> for IpcResponse {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Json(body) => IpcResponse::Json { body },
            Reply::Binary(payload) => IpcResponse::Binary(payload),
        }
    }
}
