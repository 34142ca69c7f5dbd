//! Command extraction from model output.
//!
//! A command is embedded in generated text between `<command>` and `</command>` as a JSON
//! object `{"action": "...", "params": {...}}`. A reply that is nothing but such a JSON
//! object (optionally inside a code fence) is also accepted. Only the first marker counts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const COMMAND_OPEN: &str = "<command>";
pub const COMMAND_CLOSE: &str = "</command>";

/// A structured command for the actuator. Serializes to the actuator wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    #[serde(rename = "action")]
    pub name: String,
    #[serde(rename = "params")]
    pub arguments: BTreeMap<String, String>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: BTreeMap::new(),
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Build from a JSON object in the actuator wire format, with the same rules as extraction.
    pub fn from_json(value: Value) -> Result<Self, ExtractError> {
        command_from_value(value)
    }
}

/// A marker was found but its payload could not be turned into a command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("command marker is not closed")]
    Unterminated,
    #[error("command payload is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("command payload must be a JSON object")]
    NotAnObject,
    #[error("command has no action name")]
    MissingName,
    #[error("command params must be a JSON object")]
    InvalidArguments,
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    #[serde(default, alias = "name")]
    action: Option<Value>,
    #[serde(default, alias = "arguments")]
    params: Option<Value>,
}

/// Look for a command in `text`.
///
/// `Ok(None)` is the common case of plain prose. `Err` means a marker was present but
/// malformed; callers still deliver the text to the user.
pub fn extract(text: &str) -> Result<Option<Command>, ExtractError> {
    if let Some(start) = text.find(COMMAND_OPEN) {
        let rest = &text[start + COMMAND_OPEN.len()..];
        let end = rest.find(COMMAND_CLOSE).ok_or(ExtractError::Unterminated)?;
        return parse_payload(&rest[..end]).map(Some);
    }
    extract_bare_json(text)
}

/// Whole-reply JSON form: `{"action": ...}`. JSON without an action is plain chat.
fn extract_bare_json(text: &str) -> Result<Option<Command>, ExtractError> {
    let body = strip_code_fence(text.trim());
    if !(body.starts_with('{') && body.ends_with('}')) {
        return Ok(None);
    }
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return Ok(None);
    };
    match value.as_object() {
        Some(obj) if obj.contains_key("action") => command_from_value(value).map(Some),
        _ => Ok(None),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return text;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim()
}

fn parse_payload(payload: &str) -> Result<Command, ExtractError> {
    let value: Value = serde_json::from_str(payload.trim())
        .map_err(|e| ExtractError::InvalidJson(e.to_string()))?;
    command_from_value(value)
}

fn command_from_value(value: Value) -> Result<Command, ExtractError> {
    if !value.is_object() {
        return Err(ExtractError::NotAnObject);
    }
    let raw: RawCommand =
        serde_json::from_value(value).map_err(|e| ExtractError::InvalidJson(e.to_string()))?;
    let name = raw
        .action
        .as_ref()
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ExtractError::MissingName)?
        .to_string();
    let arguments = match raw.params {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(Value::Object(map)) => map
            .into_iter()
            .filter_map(|(k, v)| match v {
                Value::Null => None,
                Value::String(s) => Some((k, s)),
                other => Some((k, other.to_string())),
            })
            .collect(),
        Some(_) => return Err(ExtractError::InvalidArguments),
    };
    Ok(Command { name, arguments })
}
