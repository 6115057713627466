use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the mask pipeline
#[derive(Debug, Error)]
pub enum SegmentationError {
    /// Model missing or unreadable, engine construction failed, or buffers
    /// could not be allocated. No partial session is left behind.
    #[error("failed to load model {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    /// An internal invariant was violated (tensor rank, batch size, element
    /// type, buffer sizes, frame dimensions).
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// The forward pass reported failure; the frame is dropped.
    #[error("inference failed: {0}")]
    Inference(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("pipeline is not initialized")]
    NotInitialized,
}

impl SegmentationError {
    pub(crate) fn load(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Load {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn inference(reason: impl std::fmt::Display) -> Self {
        Self::Inference(reason.to_string())
    }
}

pub type Result<T, E = SegmentationError> = std::result::Result<T, E>;
