//! `#cloud-config-archive` decoding.
//!
//! An archive is a YAML list. Each element is either a bare string (the
//! part's content) or a mapping with optional `content`, `filename` and
//! `type` keys; every other key becomes an extra header on the part.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::model::content_type::{self, ARCHIVE_UNDEF_TYPE};
use crate::model::headers::is_field_name;
use crate::model::message::Message;
use crate::parser::sniff::type_from_starts_with;

/// How extra (non `content`/`filename`/`type`) keys are turned into headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveHeaderMode {
    /// Each key is written with its own value.
    #[default]
    PerKey,
    /// Every key is written with the value of the entry's `header` key.
    /// Entries without a `header` key get no extra headers.
    Literal,
}

/// One decoded archive element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub content: String,
    pub filename: Option<String>,
    pub ctype: Option<String>,
    /// Remaining keys with their own values, in document order.
    pub extra: Vec<(String, String)>,
}

/// Decode an archive payload into its raw elements.
///
/// Anything that is not a YAML sequence yields an empty list.
pub fn load_entries(payload: &[u8]) -> Vec<Value> {
    match serde_yaml::from_slice::<Value>(payload) {
        Ok(Value::Sequence(entries)) => entries,
        Ok(other) => {
            tracing::warn!(kind = value_kind(&other), "Archive is not a list, ignoring");
            Vec::new()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Archive failed to decode, ignoring");
            Vec::new()
        }
    }
}

impl ArchiveEntry {
    /// Interpret one archive element. Returns `None` for elements that are
    /// neither a string nor a mapping, or whose fields are not scalars.
    ///
    /// Extra keys that cannot be written as a header (bad field name, or a
    /// value spanning several lines) are dropped from the entry.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self {
                content: s.clone(),
                ..Self::default()
            }),
            Value::Mapping(map) => {
                let mut entry = Self::default();
                for (key, val) in map {
                    let key = scalar_to_string(key)?;
                    let val = scalar_to_string(val)?;
                    match key.as_str() {
                        "content" => entry.content = val,
                        "filename" => entry.filename = Some(val),
                        "type" => entry.ctype = Some(val).filter(|t| !t.is_empty()),
                        _ if !is_field_name(&key) || val.contains(['\r', '\n']) => {
                            tracing::warn!(
                                header = %key.escape_debug(),
                                "Archive entry has a malformed extra header, dropping it"
                            );
                        }
                        _ => entry.extra.push((key, val)),
                    }
                }
                Some(entry)
            }
            _ => None,
        }
    }

    /// Resolved content type: declared, else sniffed, else `text/cloud-config`.
    pub fn content_type(&self) -> String {
        match &self.ctype {
            Some(t) => t.clone(),
            None => type_from_starts_with(self.content.as_bytes(), Some(ARCHIVE_UNDEF_TYPE))
                .unwrap_or(ARCHIVE_UNDEF_TYPE)
                .to_string(),
        }
    }

    /// Extra headers to add to the part under the given mode.
    pub fn extra_headers(&self, mode: ArchiveHeaderMode) -> Vec<(String, String)> {
        match mode {
            ArchiveHeaderMode::PerKey => self.extra.clone(),
            ArchiveHeaderMode::Literal => {
                let Some((_, literal)) = self.extra.iter().find(|(k, _)| k == "header") else {
                    return Vec::new();
                };
                self.extra
                    .iter()
                    .map(|(k, _)| (k.clone(), literal.clone()))
                    .collect()
            }
        }
    }

    /// Build the message part for this entry. Returns `None` when the type
    /// has no `/` separator.
    pub fn to_message(&self, mode: ArchiveHeaderMode) -> Option<Message> {
        let ctype = self.content_type();
        let (main, sub) = content_type::split_type(&ctype)?;

        let mut msg = if main.eq_ignore_ascii_case("text") {
            Message::text(sub, &self.content)
        } else {
            Message::leaf(&format!("{main}/{sub}"), self.content.as_bytes())
        };

        if let Some(filename) = &self.filename {
            msg.set_attachment_filename(filename);
        }
        for (name, value) in self.extra_headers(mode) {
            msg.headers.append(name, value);
        }
        Some(msg)
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged",
    }
}
