use std::fs;
use std::path::Path;

use sab_contracts::error::{PipelineError, Result};
use sab_contracts::outputs::{file_name_for_reference, SavedImage};
use sab_contracts::payload::{GenerationRequest, GenerationResult};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::display::{DisplayOptions, ImageDisplay};
use crate::error_chain_text;
use crate::transport::ImageService;

pub struct GenerationClient<'a> {
    service: &'a dyn ImageService,
    display: &'a dyn ImageDisplay,
}

impl<'a> GenerationClient<'a> {
    pub fn new(service: &'a dyn ImageService, display: &'a dyn ImageDisplay) -> Self {
        Self { service, display }
    }

    pub fn request_generation(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        if let Some(field) = request.missing_required_field() {
            return Err(PipelineError::Generation(format!(
                "request has an empty {field}"
            )));
        }
        let raw = self
            .service
            .generate(request)
            .map_err(|err| PipelineError::Generation(error_chain_text(&err, 1024)))?;
        let result = GenerationResult::from_response(raw).map_err(PipelineError::Generation)?;
        debug!(images = result.images.len(), "generation returned");
        Ok(result)
    }

    /// Downloads the first returned image into `output_dir` under the final
    /// segment of its reference, then runs the requested display effects.
    pub fn persist(
        &self,
        result: &GenerationResult,
        request: &GenerationRequest,
        output_dir: &Path,
        options: DisplayOptions,
    ) -> Result<SavedImage> {
        let image_ref = result.first_image().ok_or(PipelineError::NoImage)?;
        let file_name = file_name_for_reference(image_ref).ok_or_else(|| {
            PipelineError::Fetch(format!("image reference '{image_ref}' has no file name"))
        })?;
        let bytes = self
            .service
            .fetch_image(image_ref)
            .map_err(|err| PipelineError::Fetch(error_chain_text(&err, 1024)))?;

        fs::create_dir_all(output_dir).map_err(|err| PipelineError::io(output_dir, err))?;
        let path = output_dir.join(file_name);
        fs::write(&path, &bytes).map_err(|err| PipelineError::io(&path, err))?;
        let sha256 = hex::encode(Sha256::digest(&bytes));
        info!(path = %path.display(), bytes = bytes.len(), "image saved");

        options.apply(self.display, &path);

        Ok(SavedImage {
            path,
            prompt: request.prompt.clone(),
            model: request.model.clone(),
            size_bytes: bytes.len() as u64,
            sha256,
        })
    }
}
