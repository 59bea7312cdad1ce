use std::env;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;

mod critic;
mod display;
mod enrich;
mod generation;
mod pipeline;
mod session;
mod transport;

#[cfg(test)]
mod test_support;

pub use critic::{VisionCritic, MAX_ANALYSIS_IMAGE_BYTES};
pub use display::{DisplayOptions, ImageDisplay, SystemDisplay};
pub use enrich::PromptEnricher;
pub use generation::GenerationClient;
pub use pipeline::{AnalysisRound, GenerateParams, Pipeline, PipelineOutcome, PipelineStage};
pub use session::{Session, SessionManager};
pub use transport::{
    first_choice_text, join_image_url, ChatCompletion, HttpSettings, ImageService,
    OpenAiChatClient, SwarmHttpClient,
};

fn response_json_or_error(label: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{label} response body read failed"))?;
    if !status.is_success() {
        bail!("{label} request failed ({code}): {}", truncate_text(&body, 512));
    }
    let parsed: Value =
        serde_json::from_str(&body).with_context(|| format!("{label} returned invalid JSON"))?;
    Ok(parsed)
}

/// Flattens an anyhow chain into one line for error messages and events.
fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn first_non_empty_env(keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Ok(value) = env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}
