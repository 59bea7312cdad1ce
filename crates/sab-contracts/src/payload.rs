//! Text-to-image request and result shapes.

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

pub const DEFAULT_DIMENSIONS: (u32, u32) = (1024, 1024);

const SESSION_ID: &str = "session_id";
const IMAGES: &str = "images";
const PROMPT: &str = "prompt";
const WIDTH: &str = "width";
const HEIGHT: &str = "height";
const MODEL: &str = "model";

/// Body of a `GenerateText2Image` call.
///
/// The reserved fields are typed; everything else supplied through overrides
/// lives in `extra`. Override values are always sent as the strings given, so
/// an override of `images`, `width` or `height` lands in `extra` and shadows
/// the typed number when the request is serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub session_id: String,
    pub images: u32,
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub model: Option<String>,
    pub extra: IndexMap<String, String>,
}

impl GenerationRequest {
    /// Applies one `key=value` override. Last write wins, reserved keys included.
    pub fn apply_override(&mut self, key: &str, value: &str) {
        match key {
            SESSION_ID => {
                self.session_id = value.to_string();
                self.extra.shift_remove(key);
            }
            PROMPT => {
                self.prompt = value.to_string();
                self.extra.shift_remove(key);
            }
            MODEL => {
                self.model = Some(value.to_string());
                self.extra.shift_remove(key);
            }
            _ => {
                self.extra.insert(key.to_string(), value.to_string());
            }
        }
    }

    /// Name of the first required field that is empty, if any.
    pub fn missing_required_field(&self) -> Option<&'static str> {
        if self.session_id.trim().is_empty() {
            return Some(SESSION_ID);
        }
        if self.prompt.trim().is_empty() {
            return Some(PROMPT);
        }
        None
    }

    /// Model name as it will be sent, if any.
    pub fn model_name(&self) -> Option<&str> {
        self.model.as_deref()
    }
}

impl Serialize for GenerationRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if !self.extra.contains_key(SESSION_ID) {
            map.serialize_entry(SESSION_ID, &self.session_id)?;
        }
        if !self.extra.contains_key(IMAGES) {
            map.serialize_entry(IMAGES, &self.images)?;
        }
        if !self.extra.contains_key(PROMPT) {
            map.serialize_entry(PROMPT, &self.prompt)?;
        }
        if !self.extra.contains_key(WIDTH) {
            map.serialize_entry(WIDTH, &self.width)?;
        }
        if !self.extra.contains_key(HEIGHT) {
            map.serialize_entry(HEIGHT, &self.height)?;
        }
        if let Some(model) = &self.model {
            if !self.extra.contains_key(MODEL) {
                map.serialize_entry(MODEL, model)?;
            }
        }
        for (key, value) in &self.extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Builds a generation request from the base parameters, then applies the
/// overrides in order as a final merge pass.
pub fn build_payload(
    session_id: &str,
    images: u32,
    prompt: &str,
    model: Option<&str>,
    dimensions: (u32, u32),
    overrides: &[(String, String)],
) -> GenerationRequest {
    let mut request = GenerationRequest {
        session_id: session_id.to_string(),
        images,
        prompt: prompt.to_string(),
        width: dimensions.0,
        height: dimensions.1,
        model: model
            .filter(|value| !value.is_empty())
            .map(str::to_string),
        extra: IndexMap::new(),
    };
    for (key, value) in overrides {
        request.apply_override(key, value);
    }
    request
}

/// Decoded `GenerateText2Image` response. `images` is kept exactly as the
/// service listed it.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub images: Vec<Value>,
    pub raw: Value,
}

impl GenerationResult {
    /// Reads the `images` list. A top-level `error` string is a failure even
    /// when the transport reported success.
    pub fn from_response(raw: Value) -> Result<Self, String> {
        let Some(object) = raw.as_object() else {
            return Err(format!("expected a JSON object, got {raw}"));
        };
        if let Some(error) = object.get("error").and_then(Value::as_str) {
            return Err(format!("service reported: {error}"));
        }
        let images = match object.get("images") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(rows)) => rows.clone(),
            Some(other) => return Err(format!("'images' is not a list: {other}")),
        };
        Ok(Self { images, raw })
    }

    /// The only reference this pipeline consumes. `None` when the first entry
    /// is missing, empty or not a string; later entries never stand in for it.
    pub fn first_image(&self) -> Option<&str> {
        self.images
            .first()
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}
