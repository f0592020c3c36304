use crate::error::{InferenceError, Result};
use crate::tensor::{InferenceOutput, ModelInput};
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};

#[cfg(feature = "ort-backend")]
pub mod ort;

#[cfg(feature = "tract-backend")]
pub mod tract;

/// Capabilities and identity reported by an execution context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextMetadata {
    pub backend_type: String,
    pub version: String,
    pub device: String,
    pub accelerator_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_limit: Option<usize>,
}

/// A model loaded by an execution context.
///
/// The handle owns the backend session; contexts keep no per-model state.
pub struct ModelHandle {
    backend: &'static str,
    path: PathBuf,
    inner: Box<dyn Any + Send + Sync>,
}

impl ModelHandle {
    pub fn new<T: Any + Send + Sync>(backend: &'static str, path: &Path, inner: T) -> Self {
        Self {
            backend,
            path: path.to_path_buf(),
            inner: Box::new(inner),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Borrow the backend session, failing if the handle belongs to another backend.
    pub fn session<T: Any>(&self) -> Result<&T> {
        self.inner.downcast_ref::<T>().ok_or_else(|| {
            InferenceError::IllegalState(format!(
                "model {} was loaded by the '{}' backend and cannot run elsewhere",
                self.path.display(),
                self.backend
            ))
        })
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("backend", &self.backend)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Adapter over a numeric backend. Knows nothing about tasks.
///
/// Implementations are constructed once at startup and shared by every model
/// on that backend.
pub trait ExecutionContext: Send + Sync {
    fn load(&self, path: &Path) -> Result<ModelHandle>;

    fn run(&self, handle: &ModelHandle, input: &ModelInput) -> Result<InferenceOutput>;

    fn metadata(&self) -> ContextMetadata;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_downcast() {
        let handle = ModelHandle::new("fake", Path::new("/models/m.onnx"), 42u32);
        assert_eq!(*handle.session::<u32>().unwrap(), 42);
        assert_eq!(handle.backend(), "fake");
    }

    #[test]
    fn test_handle_downcast_wrong_backend() {
        let handle = ModelHandle::new("fake", Path::new("/models/m.onnx"), 42u32);
        let err = handle.session::<String>().unwrap_err();
        assert!(matches!(err, InferenceError::IllegalState(_)));
        assert!(err.to_string().contains("'fake'"));
    }

    #[test]
    fn test_metadata_skips_missing_capacity() {
        let metadata = ContextMetadata {
            backend_type: "onnx".into(),
            version: "1".into(),
            device: "cpu".into(),
            accelerator_enabled: false,
            capacity_limit: None,
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert!(json.get("capacity_limit").is_none());
        assert_eq!(json["device"], "cpu");
    }
}
