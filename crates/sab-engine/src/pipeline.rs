//! End-to-end generation run: session, optional enrichment, payload, dedup,
//! generation, and the bounded critique/regenerate loop.
//!
//! Every step is attempted at most once. The first failed step aborts the run;
//! anything already done (a created session, a saved image) is left as is.

use std::path::PathBuf;

use sab_contracts::config::PipelineConfig;
use sab_contracts::error::{PipelineError, Result};
use sab_contracts::events::EventWriter;
use sab_contracts::outputs::{OutputLookup, SavedImage};
use sab_contracts::payload::{build_payload, GenerationRequest, GenerationResult, DEFAULT_DIMENSIONS};
use serde_json::{json, Map, Value};
use similar::TextDiff;
use tracing::{info, warn};

use crate::critic::VisionCritic;
use crate::display::{DisplayOptions, ImageDisplay};
use crate::enrich::PromptEnricher;
use crate::generation::GenerationClient;
use crate::session::{Session, SessionManager};
use crate::transport::{ChatCompletion, ImageService};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateParams {
    pub prompt: String,
    /// Reused as-is when non-empty.
    pub session_id: Option<String>,
    /// Short names are resolved through the configured alias table.
    pub model: Option<String>,
    pub images: u32,
    /// Applied in order after the base fields; last write wins.
    pub overrides: Vec<(String, String)>,
    pub output_dir: PathBuf,
    pub enrich: bool,
    pub style: Option<String>,
    pub display: DisplayOptions,
    /// Critique rounds after the first image; 0 disables analysis.
    pub analysis_rounds: u32,
}

/// Step of a run, reported with failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Session,
    Enrich,
    Dedup,
    Generate,
    Persist,
    Critique,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Enrich => "enrich",
            Self::Dedup => "dedup",
            Self::Generate => "generate",
            Self::Persist => "persist",
            Self::Critique => "critique",
        }
    }
}

/// One critique round: the revised prompt and what it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRound {
    pub revised_prompt: String,
    pub result: GenerationResult,
    pub saved: SavedImage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// A matching image was already on disk; nothing was generated.
    Existing { session: Session, path: PathBuf },
    Generated {
        session: Session,
        result: GenerationResult,
        saved: SavedImage,
        rounds: Vec<AnalysisRound>,
    },
    /// The service answered without an image. `saved` lists the images
    /// written by earlier steps of the run.
    NoImage { saved: Vec<SavedImage> },
}

pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    images: &'a dyn ImageService,
    chat: &'a dyn ChatCompletion,
    lookup: &'a dyn OutputLookup,
    display: &'a dyn ImageDisplay,
    events: EventWriter,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        images: &'a dyn ImageService,
        chat: &'a dyn ChatCompletion,
        lookup: &'a dyn OutputLookup,
        display: &'a dyn ImageDisplay,
        events: EventWriter,
    ) -> Self {
        Self {
            config,
            images,
            chat,
            lookup,
            display,
            events,
        }
    }

    /// Runs one invocation. A service answer without an image ends the run
    /// early as [`PipelineOutcome::NoImage`]; any other failed step is
    /// returned. Event-log write failures are logged and never fail the run.
    pub fn run(&self, params: &GenerateParams) -> Result<PipelineOutcome> {
        let mut saved = Vec::new();
        match self.run_steps(params, &mut saved) {
            Err(PipelineError::NoImage) => {
                info!(saved = saved.len(), "service returned no image, stopping");
                self.events.record(
                    "invocation_finished",
                    map_object(json!({
                        "outcome": "no_image",
                        "saved": saved_paths(&saved),
                    })),
                );
                Ok(PipelineOutcome::NoImage { saved })
            }
            other => other,
        }
    }

    fn run_steps(&self, params: &GenerateParams, saved: &mut Vec<SavedImage>) -> Result<PipelineOutcome> {
        let model = params
            .model
            .as_deref()
            .map(|name| self.config.aliases().resolve(name));
        self.events.record(
            "invocation_started",
            map_object(json!({
                "prompt": params.prompt,
                "model": model,
                "images": params.images,
                "output_dir": params.output_dir.to_string_lossy(),
                "enrich": params.enrich,
                "analysis_rounds": params.analysis_rounds,
            })),
        );
        info!(
            invocation_id = self.events.invocation_id(),
            model = model.as_deref().unwrap_or(""),
            "starting generation"
        );

        let session = self.stage(
            PipelineStage::Session,
            SessionManager::new(self.images).acquire(params.session_id.as_deref()),
        )?;
        self.events.record(
            "session_acquired",
            map_object(json!({
                "session_id": session.id(),
                "reused": session.reused(),
            })),
        );

        let prompt = if params.enrich {
            let enriched = self.stage(
                PipelineStage::Enrich,
                PromptEnricher::new(self.chat, self.config)
                    .enrich(&params.prompt, params.style.as_deref()),
            )?;
            self.events.record(
                "prompt_enriched",
                map_object(json!({
                    "original": params.prompt,
                    "enriched": enriched,
                    "style": params.style,
                })),
            );
            enriched
        } else {
            params.prompt.clone()
        };

        let request = self.build_request(&session, params, &prompt, model.as_deref(), 0);
        let existing = self.stage(
            PipelineStage::Dedup,
            self.lookup.find_existing(
                &params.output_dir,
                &request.prompt,
                request.model_name().unwrap_or_default(),
            ),
        )?;
        if let Some(path) = existing {
            info!(path = %path.display(), "matching image already exists");
            self.events.record(
                "dedup_hit",
                map_object(json!({ "path": path.to_string_lossy() })),
            );
            self.events.record(
                "invocation_finished",
                map_object(json!({ "outcome": "existing" })),
            );
            return Ok(PipelineOutcome::Existing { session, path });
        }

        let generation = GenerationClient::new(self.images, self.display);
        let (result, first) = self.generate_and_persist(&generation, &request, params, 0)?;
        saved.push(first.clone());

        let critic = VisionCritic::new(self.chat, self.config, self.lookup);
        let original_prompt = request.prompt.clone();
        let mut previous_prompt = original_prompt.clone();
        let mut rounds = Vec::new();
        for round in 1..=params.analysis_rounds {
            let revised = self.stage(
                PipelineStage::Critique,
                critic.critique(&params.output_dir, &original_prompt),
            )?;
            let similarity = TextDiff::from_words(previous_prompt.as_str(), revised.as_str()).ratio();
            info!(round, similarity, "critique received");
            self.events.record(
                "analysis_round",
                map_object(json!({
                    "round": round,
                    "previous_prompt": previous_prompt,
                    "revised_prompt": revised,
                    "similarity": similarity,
                })),
            );

            let request = self.build_request(&session, params, &revised, model.as_deref(), round);
            let (result, image) = self.generate_and_persist(&generation, &request, params, round)?;
            saved.push(image.clone());
            previous_prompt = revised.clone();
            rounds.push(AnalysisRound {
                revised_prompt: revised,
                result,
                saved: image,
            });
        }

        self.events.record(
            "invocation_finished",
            map_object(json!({
                "outcome": "generated",
                "saved": saved_paths(saved),
            })),
        );
        Ok(PipelineOutcome::Generated {
            session,
            result,
            saved: first,
            rounds,
        })
    }

    fn build_request(
        &self,
        session: &Session,
        params: &GenerateParams,
        prompt: &str,
        model: Option<&str>,
        round: u32,
    ) -> GenerationRequest {
        let request = build_payload(
            session.id(),
            params.images,
            prompt,
            model,
            DEFAULT_DIMENSIONS,
            &params.overrides,
        );
        self.events.record(
            "payload_built",
            map_object(json!({
                "round": round,
                "request": request,
            })),
        );
        request
    }

    fn generate_and_persist(
        &self,
        generation: &GenerationClient<'_>,
        request: &GenerationRequest,
        params: &GenerateParams,
        round: u32,
    ) -> Result<(GenerationResult, SavedImage)> {
        let result = self.stage(PipelineStage::Generate, generation.request_generation(request))?;
        self.events.record(
            "generation_completed",
            map_object(json!({
                "round": round,
                "images": result.images,
            })),
        );
        let saved = self.stage(
            PipelineStage::Persist,
            generation.persist(&result, request, &params.output_dir, params.display),
        )?;
        self.events.record(
            "image_saved",
            map_object(json!({
                "round": round,
                "path": saved.path.to_string_lossy(),
                "prompt": saved.prompt,
                "model": saved.model,
                "size_bytes": saved.size_bytes,
                "sha256": saved.sha256,
            })),
        );
        Ok((result, saved))
    }

    /// Logs and records a failed step, then hands the error back unchanged.
    fn stage<T>(&self, stage: PipelineStage, result: Result<T>) -> Result<T> {
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        warn!(stage = stage.as_str(), kind = err.kind(), error = %err, "pipeline step failed");
        self.events.record(
            "invocation_failed",
            map_object(json!({
                "stage": stage.as_str(),
                "kind": err.kind(),
                "error": err.to_string(),
                "fatal": err.is_fatal(),
            })),
        );
        Err(err)
    }
}

fn saved_paths(saved: &[SavedImage]) -> Vec<String> {
    saved
        .iter()
        .map(|image| image.path.to_string_lossy().to_string())
        .collect()
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
