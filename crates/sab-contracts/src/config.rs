use std::env;
use std::path::{Path, PathBuf};

use anyhow::Context;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::chat::{ChatMessage, ImageDetail};
use crate::models::ModelAliases;

const DEFAULT_CONFIG_JSON: &str = include_str!("../resources/default_config.json");

pub const CONFIG_PATH_ENV: &str = "SABCLI_CONFIG";

/// Instruction templates, model aliases and display commands.
///
/// Loaded once at startup and shared by reference afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PipelineConfig {
    pub enrich: EnrichConfig,
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub model_aliases: IndexMap<String, String>,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnrichConfig {
    pub model: String,
    /// Conversation seed sent ahead of the enrichment request.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Placeholders: `{prompt}`, `{style}`.
    pub request_template: String,
    /// Substituted for `{style}` when no style hint is given.
    pub any_style: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AnalysisConfig {
    pub model: String,
    /// Placeholder: `{prompt}`.
    pub instruction: String,
    pub max_tokens: u32,
    pub detail: ImageDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DisplayConfig {
    /// Command line for in-terminal rendering; the image path is appended.
    pub terminal_command: String,
    /// Replaces the platform's default viewer when set.
    #[serde(default)]
    pub viewer_command: Option<String>,
}

impl PipelineConfig {
    /// Built-in defaults merged with the JSON file at `path`, if any.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let raw = match path {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("failed reading config {}", path.display()))?,
            ),
            None => None,
        };
        Self::from_override_json(raw.as_deref())
    }

    /// Built-in defaults, with `raw` merged over them key by key.
    pub fn from_override_json(raw: Option<&str>) -> anyhow::Result<Self> {
        let mut merged: Value = serde_json::from_str(DEFAULT_CONFIG_JSON)
            .context("built-in config is not valid JSON")?;
        if let Some(raw) = raw {
            let overlay: Value =
                serde_json::from_str(raw).context("config override is not valid JSON")?;
            if !overlay.is_object() {
                anyhow::bail!("config override must be a JSON object");
            }
            merge_json(&mut merged, overlay);
        }
        serde_json::from_value(merged).context("config does not match the expected shape")
    }

    pub fn aliases(&self) -> ModelAliases {
        ModelAliases::new(self.model_aliases.clone())
    }

    pub fn enrich_request(&self, prompt: &str, style: Option<&str>) -> String {
        let style = style
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(&self.enrich.any_style);
        self.enrich
            .request_template
            .replace("{prompt}", prompt)
            .replace("{style}", style)
    }

    pub fn analysis_instruction(&self, prompt: &str) -> String {
        self.analysis.instruction.replace("{prompt}", prompt)
    }
}

/// Explicit path first, then `SABCLI_CONFIG`.
pub fn config_override_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        env::var(CONFIG_PATH_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    })
}

fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_json(existing, value)
                    }
                    _ => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
