use crate::config::AnalysisConfig;
use crate::error::{InferenceError, Result};
use crate::model::{Model, ModelSpec};
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// JSON list of model declarations.
///
/// ```json
/// {"models": [{"id": "generic_classifier", "version": "1.0.0",
///              "model_path": "classifier/model.onnx",
///              "task": {"task_type": "classification", "top_k": 5}}]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub models: Vec<ModelSpec>,
}

impl ModelCatalog {
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            InferenceError::NotFound(format!("model catalog {}: {}", path.display(), e))
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data)
            .map_err(|e| InferenceError::Validation(format!("invalid model catalog: {}", e)))
    }

    /// Register every model, resolving relative artifact paths against `models_dir`.
    ///
    /// Stops at the first invalid declaration.
    pub fn register_all(&self, registry: &Registry, models_dir: &Path) -> Result<usize> {
        for spec in &self.models {
            let mut spec = spec.clone();
            if spec.model_path.is_relative() {
                spec.model_path = models_dir.join(&spec.model_path);
            }
            let key = format!("{}@{}", spec.id, spec.version);
            let model = Model::new(spec).map_err(|e| {
                InferenceError::Validation(format!("model {}: {}", key, e))
            })?;
            registry.register_model(model);
        }
        Ok(self.models.len())
    }
}

/// Register every execution context this build supports.
///
/// A backend that fails to initialize is skipped with a warning.
pub fn bootstrap_contexts(registry: &Registry, config: &AnalysisConfig) -> usize {
    let mut registered = 0;

    #[cfg(feature = "ort-backend")]
    {
        use crate::backend::ort::OrtContext;
        use std::sync::Arc;

        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(config.ort_cpu_threads);
        match OrtContext::accelerated(threads) {
            Ok(context) => {
                registry.register_context("onnx", Arc::new(context));
                registered += 1;
            }
            Err(e) => tracing::warn!(context = "onnx", error = %e, "Skipping unavailable backend"),
        }
        match OrtContext::cpu_only(config.ort_cpu_threads) {
            Ok(context) => {
                registry.register_context("onnx-cpu", Arc::new(context));
                registered += 1;
            }
            Err(e) => tracing::warn!(context = "onnx-cpu", error = %e, "Skipping unavailable backend"),
        }
    }

    #[cfg(feature = "tract-backend")]
    {
        use crate::backend::tract::TractContext;
        use std::sync::Arc;

        registry.register_context("tract", Arc::new(TractContext::new()));
        registered += 1;
    }

    if registered == 0 {
        tracing::warn!(default_context = %config.default_context, "No execution context available");
    }
    registered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskType;
    use crate::registry::LATEST;

    const CATALOG: &str = r#"{
        "models": [
            {
                "id": "generic_classifier",
                "version": "1.0.0",
                "model_path": "classifier/model.onnx",
                "task": {"task_type": "classification", "top_k": 3},
                "input_shape": [null, 224, 224, 3],
                "preprocessing": {"mean": [0.485, 0.456, 0.406], "std": [0.229, 0.224, 0.225]},
                "metadata": {"class_labels": ["cat", "dog"], "description": "Demo classifier"}
            },
            {
                "id": "generic_detector",
                "version": "2.1.0",
                "model_path": "/opt/models/detector.onnx",
                "task": {"task_type": "detection", "output_format": "ssd"},
                "preprocessing": {"target_size": [320, 320], "layout": "nchw"}
            }
        ]
    }"#;

    #[test]
    fn test_register_catalog() {
        let registry = Registry::new();
        let catalog = ModelCatalog::from_json(CATALOG).unwrap();

        let count = catalog
            .register_all(&registry, Path::new("/srv/models"))
            .unwrap();

        assert_eq!(count, 2);
        let classifier = registry.get_model("generic_classifier", LATEST).unwrap();
        assert_eq!(
            classifier.spec().model_path,
            Path::new("/srv/models/classifier/model.onnx")
        );
        let detector = registry.get_model("generic_detector", "2.1.0").unwrap();
        assert_eq!(detector.spec().model_path, Path::new("/opt/models/detector.onnx"));
        assert_eq!(detector.task_type(), TaskType::Detection);
    }

    #[test]
    fn test_invalid_declaration_names_model() {
        let catalog = ModelCatalog::from_json(
            r#"{"models": [{"id": "bad", "version": "1", "model_path": "m.onnx",
                "task": {"task_type": "classification"}}]}"#,
        )
        .unwrap();
        let err = catalog
            .register_all(&Registry::new(), Path::new("."))
            .unwrap_err();
        assert!(err.to_string().contains("bad@1"), "got: {}", err);
    }

    #[test]
    fn test_malformed_catalog() {
        let err = ModelCatalog::from_json(r#"{"models": [{"id": 3}]}"#).unwrap_err();
        assert!(matches!(err, InferenceError::Validation(_)));
    }

    #[test]
    fn test_missing_catalog_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelCatalog::from_path(&dir.path().join("catalog.json")).unwrap_err();
        assert!(matches!(err, InferenceError::NotFound(_)));
    }
}
