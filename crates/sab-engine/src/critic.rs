use std::fs;
use std::io;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;
use sab_contracts::chat::{ChatMessage, ChatRequest, ContentPart, ImageUrl};
use sab_contracts::config::PipelineConfig;
use sab_contracts::error::{PipelineError, Result};
use sab_contracts::outputs::OutputLookup;
use tracing::info;

use crate::error_chain_text;
use crate::transport::ChatCompletion;

/// Largest file the vision model accepts inline (20 MB).
pub const MAX_ANALYSIS_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

/// Asks a vision model to critique the latest image and propose a better prompt.
pub struct VisionCritic<'a> {
    chat: &'a dyn ChatCompletion,
    config: &'a PipelineConfig,
    lookup: &'a dyn OutputLookup,
}

impl<'a> VisionCritic<'a> {
    pub fn new(
        chat: &'a dyn ChatCompletion,
        config: &'a PipelineConfig,
        lookup: &'a dyn OutputLookup,
    ) -> Self {
        Self {
            chat,
            config,
            lookup,
        }
    }

    /// Critiques the entry the lookup reports as latest (for the filename
    /// lookup, the last one listed) against `prompt`. Returns the revised
    /// prompt.
    pub fn critique(&self, output_dir: &Path, prompt: &str) -> Result<String> {
        let path = self.lookup.latest(output_dir)?.ok_or_else(|| {
            PipelineError::io(
                output_dir,
                io::Error::new(io::ErrorKind::NotFound, "no image to analyze"),
            )
        })?;

        let size = fs::metadata(&path)
            .map_err(|err| PipelineError::io(&path, err))?
            .len();
        if size > MAX_ANALYSIS_IMAGE_BYTES {
            return Err(PipelineError::SizeLimit {
                path,
                size,
                limit: MAX_ANALYSIS_IMAGE_BYTES,
            });
        }
        let format = supported_format(&path)?;

        let bytes = fs::read(&path).map_err(|err| PipelineError::io(&path, err))?;
        let data_url = format!("data:{};base64,{}", format.to_mime_type(), BASE64.encode(bytes));
        let request = ChatRequest {
            model: self.config.analysis.model.clone(),
            messages: vec![ChatMessage::user_parts(vec![
                ContentPart::Text {
                    text: self.config.analysis_instruction(prompt),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: data_url,
                        detail: Some(self.config.analysis.detail),
                    },
                },
            ])],
            max_tokens: Some(self.config.analysis.max_tokens),
        };

        let revised = self
            .chat
            .complete(&request)
            .map_err(|err| PipelineError::Analysis(error_chain_text(&err, 1024)))?;
        info!(image = %path.display(), bytes = size, "image critiqued");
        Ok(revised)
    }
}

fn supported_format(path: &Path) -> Result<ImageFormat> {
    match ImageFormat::from_path(path) {
        Ok(format @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif | ImageFormat::WebP)) => {
            Ok(format)
        }
        _ => Err(PipelineError::Format {
            path: path.to_path_buf(),
            extension: path
                .extension()
                .map(|value| value.to_string_lossy().to_string())
                .unwrap_or_default(),
        }),
    }
}
