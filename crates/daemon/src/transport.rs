//! Transport adapters.
//!
//! The engine does not know how requests arrive. A [`Transport`] supplies
//! parameters and uploaded items and receives either a rendered JSON body or
//! raw bytes. [`ActionEngine::handle`] drives one request through any
//! transport; [`BufferedTransport`] is the in-memory adapter used by the
//! socket server and the CLI.

use std::collections::BTreeMap;
use std::convert::Infallible;

use protocol::{Action, ActionOutcome, ActionRequest, BinaryPayload, UploadItem};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::ActionEngine;

/// Parameter carrying the action name.
pub const ACTION_PARAM: &str = "mode";

/// Parameters forwarded from the transport to the engine.
pub const REQUEST_PARAMS: &[&str] = &[
    "path",
    "old",
    "new",
    "source",
    "target",
    "name",
    "type",
    "thumbnail",
    "content",
];

/// Request source and response sink for one action.
pub trait Transport {
    type Error;

    /// A request parameter, if present.
    fn read_param(&self, name: &str) -> Option<String>;

    /// Uploaded items. Called once per request.
    fn upload_items(&mut self) -> Vec<UploadItem>;

    /// Send a rendered JSON envelope.
    fn write_json(&mut self, body: Value) -> Result<(), Self::Error>;

    /// Send raw bytes.
    fn write_bytes(&mut self, payload: BinaryPayload) -> Result<(), Self::Error>;
}

impl ActionEngine {
    /// Read a request from `transport`, run it and write the response back.
    pub fn handle<T: Transport>(&self, transport: &mut T) -> Result<(), T::Error> {
        let raw = transport.read_param(ACTION_PARAM).unwrap_or_default();
        let outcome = match raw.parse::<Action>() {
            Ok(action) => {
                let mut request = ActionRequest::new(action);
                for name in REQUEST_PARAMS {
                    if let Some(value) = transport.read_param(name) {
                        request = request.with_param(*name, value);
                    }
                }
                request.items = transport.upload_items();
                self.execute(&request)
            }
            Err(_) => self.unknown_action(&raw),
        };

        match outcome {
            ActionOutcome::Json(result) => transport.write_json(self.render_options().render(&result)),
            ActionOutcome::Binary(payload) => transport.write_bytes(payload),
        }
    }
}

/// What a transport was asked to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reply {
    Json(Value),
    Binary(BinaryPayload),
}

/// In-memory transport over a parameter map.
#[derive(Debug, Default)]
pub struct BufferedTransport {
    params: BTreeMap<String, String>,
    items: Vec<UploadItem>,
    reply: Option<Reply>,
}

impl BufferedTransport {
    pub fn new(params: BTreeMap<String, String>, items: Vec<UploadItem>) -> Self {
        Self {
            params,
            items,
            reply: None,
        }
    }

    /// Transport for an already-typed request.
    pub fn from_request(request: ActionRequest) -> Self {
        let mut params = request.params;
        params.insert(ACTION_PARAM.to_string(), request.action.as_str().to_string());
        Self::new(params, request.items)
    }

    /// The reply written by the engine, if any.
    pub fn into_reply(self) -> Option<Reply> {
        self.reply
    }
}

impl Transport for BufferedTransport {
    type Error = Infallible;

    fn read_param(&self, name: &str) -> Option<String> {
        self.params.get(name).cloned()
    }

    fn upload_items(&mut self) -> Vec<UploadItem> {
        std::mem::take(&mut self.items)
    }

    fn write_json(&mut self, body: Value) -> Result<(), Self::Error> {
        self.reply = Some(Reply::Json(body));
        Ok(())
    }

    fn write_bytes(&mut self, payload: BinaryPayload) -> Result<(), Self::Error> {
        self.reply = Some(Reply::Binary(payload));
        Ok(())
    }
}
