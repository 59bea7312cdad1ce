//! Network-free contracts for the sabcli generation pipeline.

pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod outputs;
pub mod payload;

pub use error::{PipelineError, Result};
