use sab_contracts::chat::{ChatMessage, ChatRequest};
use sab_contracts::config::PipelineConfig;
use sab_contracts::error::{PipelineError, Result};
use tracing::info;

use crate::error_chain_text;
use crate::transport::ChatCompletion;

/// Rewrites a prompt through the language model, seeded with the configured
/// instruction conversation.
pub struct PromptEnricher<'a> {
    chat: &'a dyn ChatCompletion,
    config: &'a PipelineConfig,
}

impl<'a> PromptEnricher<'a> {
    pub fn new(chat: &'a dyn ChatCompletion, config: &'a PipelineConfig) -> Self {
        Self { chat, config }
    }

    pub fn request(&self, prompt: &str, style: Option<&str>) -> ChatRequest {
        let mut messages = self.config.enrich.messages.clone();
        messages.push(ChatMessage::user(self.config.enrich_request(prompt, style)));
        ChatRequest {
            model: self.config.enrich.model.clone(),
            messages,
            max_tokens: None,
        }
    }

    /// Any failure is returned as-is; there is no fallback to `prompt`.
    pub fn enrich(&self, prompt: &str, style: Option<&str>) -> Result<String> {
        let request = self.request(prompt, style);
        let enriched = self
            .chat
            .complete(&request)
            .map_err(|err| PipelineError::Enrichment(error_chain_text(&err, 1024)))?;
        info!(model = %request.model, chars = enriched.len(), "prompt enriched");
        Ok(enriched)
    }
}
