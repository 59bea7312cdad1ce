//! Failure taxonomy shared by every pipeline step.

use std::path::PathBuf;

/// A failed pipeline step. None of these are retried; the first one aborts
/// the rest of the invocation.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The remote service did not hand out a session.
    #[error("session acquisition failed: {0}")]
    Session(String),

    /// The language model could not rewrite the prompt.
    #[error("prompt enrichment failed: {0}")]
    Enrichment(String),

    /// The generation endpoint rejected the request or could not be reached.
    #[error("image generation failed: {0}")]
    Generation(String),

    /// The vision model could not critique the latest image.
    #[error("image analysis failed: {0}")]
    Analysis(String),

    /// The service answered without any image reference.
    #[error("the service returned no image")]
    NoImage,

    /// Downloading the generated image failed.
    #[error("image fetch failed: {0}")]
    Fetch(String),

    /// Reading or writing the output directory failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The image handed to the vision model is too large.
    #[error("{} is {size} bytes, above the {limit} byte limit", path.display())]
    SizeLimit { path: PathBuf, size: u64, limit: u64 },

    /// The image handed to the vision model is not a supported format.
    #[error("{} has unsupported image format '{extension}'", path.display())]
    Format { path: PathBuf, extension: String },
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable taxonomy name, used in logs and run events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Session(_) => "SessionError",
            Self::Enrichment(_) => "EnrichmentError",
            Self::Generation(_) => "GenerationError",
            Self::Analysis(_) => "AnalysisError",
            Self::NoImage => "NoImageError",
            Self::Fetch(_) => "FetchError",
            Self::Io { .. } => "IOError",
            Self::SizeLimit { .. } => "SizeLimitError",
            Self::Format { .. } => "FormatError",
        }
    }

    /// `NoImage` is reported but does not fail the process.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::NoImage)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
