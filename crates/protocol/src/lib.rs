//! # Filedeck Protocol Library
//!
//! Request and response types shared by the Filedeck engine and its
//! transport adapters.
//!
//! ## Overview
//!
//! - **Requests**: [`ActionRequest`] carries an [`Action`] verb, named string
//!   parameters and uploaded items
//! - **Results**: [`ActionResult`] is either a payload of records or a list of
//!   [`ErrorEnvelope`]s; [`BinaryPayload`] carries bytes for image and download
//!   actions
//! - **Rendering**: [`RenderOptions`] turns results into client JSON in one of
//!   two [`ResponseShape`]s
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Action, ActionRequest};
//!
//! let request = ActionRequest::new(Action::GetFolder).with_param("path", "/docs/");
//! assert_eq!(request.param("path"), Some("/docs/"));
//!
//! let json = serde_json::to_string(&request).unwrap();
//! let decoded: ActionRequest = serde_json::from_str(&json).unwrap();
//! assert_eq!(decoded, request);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Request, record and error definitions
//! - [`render`]: JSON rendering of results
//! - [`error`]: Error types

pub mod error;
pub mod messages;
pub mod render;

pub use error::{ProtocolError, Result};
pub use messages::{
    Action, ActionOutcome, ActionRequest, ActionResult, BinaryPayload, Disposition, EntryKind,
    ErrorEnvelope, ErrorKind, FileRecord, InitiateRecord, MessageKey, Payload, SummaryRecord,
    UploadItem,
};
pub use render::{RenderOptions, ResponseShape, DEFAULT_DATE_FORMAT};
