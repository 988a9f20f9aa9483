//! Rendering of [`ActionResult`] envelopes into client-facing JSON.
//!
//! Two shapes are supported. `attributes` nests entity properties under an
//! `attributes` object with integer booleans, the layout rich web file
//! managers expect. `flat` puts everything at the top level with real
//! booleans.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::messages::{
    ActionResult, EntryKind, ErrorEnvelope, FileRecord, InitiateRecord, Payload, SummaryRecord,
};

/// Default `strftime` pattern for timestamps.
pub const DEFAULT_DATE_FORMAT: &str = "%d %b %Y %H:%M";

/// Layout of rendered records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseShape {
    /// `{id, type, attributes: {...}}`
    #[default]
    Attributes,
    /// `{id, type, name, ...}`
    Flat,
}

/// Options controlling rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    /// Record layout.
    pub shape: ResponseShape,
    /// `strftime` pattern for `created` and `modified`.
    pub date_format: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            shape: ResponseShape::default(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }
}

impl RenderOptions {
    fn format_time(&self, time: &DateTime<Utc>) -> String {
        let mut out = String::new();
        if write!(out, "{}", time.format(&self.date_format)).is_err() {
            return time.to_rfc3339();
        }
        out
    }

    fn boolean(&self, value: bool) -> Value {
        match self.shape {
            ResponseShape::Attributes => json!(u8::from(value)),
            ResponseShape::Flat => json!(value),
        }
    }

    /// Render any result envelope.
    pub fn render(&self, result: &ActionResult) -> Value {
        match result {
            ActionResult::Data(payload) => json!({ "data": self.render_payload(payload) }),
            ActionResult::Errors(errors) => {
                let rendered: Vec<Value> = errors.iter().map(render_error).collect();
                json!({ "errors": rendered })
            }
        }
    }

    fn render_payload(&self, payload: &Payload) -> Value {
        match payload {
            Payload::Record(record) => self.render_record(record),
            Payload::Records(records) => {
                Value::Array(records.iter().map(|r| self.render_record(r)).collect())
            }
            Payload::Summary(summary) => self.render_summary(summary),
            Payload::Initiate(initiate) => self.render_initiate(initiate),
        }
    }

    /// Render a single entity record.
    pub fn render_record(&self, record: &FileRecord) -> Value {
        let mut attrs = Map::new();
        attrs.insert("name".into(), json!(record.name));
        if record.kind == EntryKind::File {
            attrs.insert(
                "extension".into(),
                json!(record.extension.clone().unwrap_or_default()),
            );
        }
        attrs.insert("path".into(), json!(record.display_path));
        attrs.insert("readable".into(), self.boolean(record.readable));
        attrs.insert("writable".into(), self.boolean(record.writable));
        attrs.insert("created".into(), json!(self.format_time(&record.created_at)));
        attrs.insert("modified".into(), json!(self.format_time(&record.modified_at)));
        attrs.insert("timestamp".into(), json!(record.modified_at.timestamp()));
        if record.kind == EntryKind::File {
            attrs.insert("height".into(), json!(record.pixel_height));
            attrs.insert("width".into(), json!(record.pixel_width));
            attrs.insert("size".into(), json!(record.size_bytes));
        }
        if let Some(content) = &record.content {
            attrs.insert("content".into(), json!(content));
        }

        self.wrap(&record.id, record.kind.as_str(), attrs)
    }

    fn render_summary(&self, summary: &SummaryRecord) -> Value {
        let mut attrs = Map::new();
        attrs.insert("files".into(), json!(summary.file_count));
        attrs.insert("folders".into(), json!(summary.folder_count));
        attrs.insert("size".into(), json!(summary.total_size_bytes));
        attrs.insert("sizeLimit".into(), json!(summary.size_limit.unwrap_or(0)));
        self.wrap("/", "summary", attrs)
    }

    fn render_initiate(&self, initiate: &InitiateRecord) -> Value {
        let config = json!({
            "options": {
                "capabilities": initiate.capabilities,
                "allowFolderDownload": initiate.allow_folder_download,
                "charsLatinOnly": initiate.chars_latin_only,
            },
            "security": {
                "readOnly": initiate.read_only,
                "allowNoExtension": initiate.allow_no_extension,
                "editRestrictions": initiate.edit_extensions,
            },
            "upload": {
                "fileSizeLimit": initiate.upload_size_limit,
                "policy": initiate.upload_policy,
                "restrictions": initiate.upload_restrictions,
            },
            "images": {
                "imagesExt": initiate.image_extensions,
                "thumbnail": {
                    "maxWidth": initiate.thumbnail_max_width,
                    "maxHeight": initiate.thumbnail_max_height,
                },
            },
        });
        let mut attrs = Map::new();
        attrs.insert("config".into(), config);
        self.wrap("/", "initiate", attrs)
    }

    fn wrap(&self, id: &str, kind: &str, attrs: Map<String, Value>) -> Value {
        match self.shape {
            ResponseShape::Attributes => json!({
                "id": id,
                "type": kind,
                "attributes": Value::Object(attrs),
            }),
            ResponseShape::Flat => {
                let mut flat = Map::new();
                flat.insert("id".into(), json!(id));
                flat.insert("type".into(), json!(kind));
                flat.extend(attrs);
                Value::Object(flat)
            }
        }
    }
}

fn render_error(error: &ErrorEnvelope) -> Value {
    let mut meta = Map::new();
    meta.insert("arguments".into(), json!(error.arguments));
    if let Some(redirect) = &error.redirect {
        meta.insert("redirect".into(), json!(redirect));
    }
    json!({
        "id": error.id,
        "code": error.code,
        "title": error.key.as_str(),
        "message": error.message,
        "meta": Value::Object(meta),
    })
}
