use preprocess::PreprocessError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Coarse error category, stable across error message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    Load,
    BackendUnavailable,
    Inference,
    IllegalState,
    Timeout,
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Failed to load model from {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("Backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Pipeline stage aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl InferenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InferenceError::NotFound(_) => ErrorKind::NotFound,
            InferenceError::Validation(_) => ErrorKind::Validation,
            InferenceError::Load { .. } => ErrorKind::Load,
            InferenceError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            InferenceError::IllegalState(_) => ErrorKind::IllegalState,
            InferenceError::Timeout(_) => ErrorKind::Timeout,
            InferenceError::Preprocess(e) if e.is_invalid_input() => ErrorKind::Validation,
            InferenceError::Preprocess(_)
            | InferenceError::Inference(_)
            | InferenceError::Io(_)
            | InferenceError::Shape(_)
            | InferenceError::Serialization(_)
            | InferenceError::Join(_) => ErrorKind::Inference,
        }
    }

    pub(crate) fn load(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        InferenceError::Load {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn backend(reason: impl std::fmt::Display) -> Self {
        InferenceError::Inference(reason.to_string())
    }
}

pub type Result<T> = std::result::Result<T, InferenceError>;
