//! Errors of the detection pipeline.
//!
use common::detection::InvalidDetection;
use thiserror::Error;

/// Failures of a detection, from model initialization to the rendered overlay.
///
/// `Clone` because a failed model initialization is handed to every caller
/// awaiting the shared handle.
#[derive(Debug, Clone, Error)]
pub enum DetectError {
    #[error("model initialization failed: {0}")]
    ModelInit(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("inference returned an invalid detection: {0}")]
    InvalidDetection(#[from] InvalidDetection),
    #[error("rendering failed: {0}")]
    Render(String),
}
