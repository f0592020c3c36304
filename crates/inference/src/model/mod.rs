//! Declared models and the `preprocess -> predict -> postprocess` contract.

pub mod config;

pub use config::{
    ClassificationConfig, DetectionConfig, DetectionFormat, PreprocessingConfig,
    SegmentationConfig, TaskSpec, TaskType,
};
pub(crate) use config::validate_unit;

use crate::backend::{ExecutionContext, ModelHandle};
use crate::error::{InferenceError, Result};
use crate::processing::{AnalysisInput, PostProcessor, PreProcessor, Prepared, SequenceInfo, TaskOutput};
use crate::tensor::{InferenceOutput, ModelInput};
use preprocess::{FrameSampling, StandardizeConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Free-form model description carried alongside the task settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub class_labels: Vec<String>,
    /// Run a frame sequence as one batched backend call.
    pub batch_prediction: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Everything needed to construct a [`Model`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub version: String,
    pub model_path: PathBuf,
    pub task: TaskSpec,
    /// Declared input shape; `None` marks a dynamic dimension.
    #[serde(default)]
    pub input_shape: Vec<Option<usize>>,
    #[serde(default)]
    pub preprocessing: PreprocessingConfig,
    #[serde(default)]
    pub metadata: ModelMetadata,
}

/// Identity and metadata of a model, as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub version: String,
    pub task_type: TaskType,
    pub input_shape: Vec<Option<usize>>,
    #[serde(flatten)]
    pub metadata: ModelMetadata,
}

/// Per-request settings that never touch the shared model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeOptions {
    /// Replaces the detection confidence threshold for this call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f32>,
}

/// Output of the predict stage, mirroring [`Prepared`].
#[derive(Debug, Clone, PartialEq)]
pub enum Predictions {
    Single(InferenceOutput),
    Frames {
        outputs: Vec<InferenceOutput>,
        info: SequenceInfo,
    },
}

struct Binding {
    context_name: String,
    context: Arc<dyn ExecutionContext>,
    handle: ModelHandle,
}

pub struct Model {
    spec: ModelSpec,
    standardize: StandardizeConfig,
    sampling: FrameSampling,
    binding: OnceLock<Binding>,
    load_lock: Mutex<()>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("key", &self.key())
            .field("task_type", &self.task_type())
            .field("context", &self.bound_context())
            .finish_non_exhaustive()
    }
}

impl Model {
    pub fn new(spec: ModelSpec) -> Result<Self> {
        if spec.id.trim().is_empty() || spec.version.trim().is_empty() {
            return Err(InferenceError::Validation(
                "model id and version must not be empty".to_string(),
            ));
        }
        spec.task.validate()?;
        let standardize = spec.preprocessing.standardize_config(&spec.input_shape)?;
        let sampling = spec.preprocessing.sampling();
        sampling
            .validate()
            .map_err(|e| InferenceError::Validation(e.to_string()))?;

        Ok(Self {
            spec,
            standardize,
            sampling,
            binding: OnceLock::new(),
            load_lock: Mutex::new(()),
        })
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn version(&self) -> &str {
        &self.spec.version
    }

    /// `"<id>@<version>"`
    pub fn key(&self) -> String {
        format!("{}@{}", self.spec.id, self.spec.version)
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn task_type(&self) -> TaskType {
        self.spec.task.task_type()
    }

    pub fn labels(&self) -> &[String] {
        &self.spec.metadata.class_labels
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            id: self.spec.id.clone(),
            version: self.spec.version.clone(),
            task_type: self.task_type(),
            input_shape: self.spec.input_shape.clone(),
            metadata: self.spec.metadata.clone(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.binding.get().is_some()
    }

    /// Name of the context this model is bound to, once loaded.
    pub fn bound_context(&self) -> Option<&str> {
        self.binding.get().map(|b| b.context_name.as_str())
    }

    /// Load the artifact into `context` and bind the model to it.
    ///
    /// Loading again into the same context is a no-op. A model stays bound to
    /// the first context it was loaded into.
    #[tracing::instrument(skip(self, context), fields(model = %self.key()))]
    pub fn load(&self, context_name: &str, context: Arc<dyn ExecutionContext>) -> Result<()> {
        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(bound) = self.binding.get() {
            if bound.context_name == context_name {
                return Ok(());
            }
            return Err(InferenceError::IllegalState(format!(
                "model {} is already loaded into context '{}'",
                self.key(),
                bound.context_name
            )));
        }

        let handle = context.load(&self.spec.model_path)?;
        tracing::info!(
            path = %self.spec.model_path.display(),
            backend = handle.backend(),
            "Model loaded"
        );

        let _ = self.binding.set(Binding {
            context_name: context_name.to_string(),
            context,
            handle,
        });
        Ok(())
    }

    pub fn preprocess(&self, input: &AnalysisInput) -> Result<Prepared> {
        PreProcessor::new(self.standardize.clone(), self.sampling)?.prepare(input)
    }

    pub fn predict(&self, prepared: &Prepared) -> Result<Predictions> {
        let binding = self.binding.get().ok_or_else(|| {
            InferenceError::IllegalState(format!(
                "model {} must be loaded before predict",
                self.key()
            ))
        })?;
        let run = |input: &ModelInput| binding.context.run(&binding.handle, input);

        match prepared {
            Prepared::Single(input) => Ok(Predictions::Single(run(input)?)),
            Prepared::Frames { frames, info } => {
                let outputs = if self.spec.metadata.batch_prediction && frames.len() > 1 {
                    let batched = ModelInput::stack(frames, self.standardize.add_batch_dim)?;
                    run(&batched)?.split_batch(frames.len())?
                } else {
                    frames.iter().map(run).collect::<Result<Vec<_>>>()?
                };
                Ok(Predictions::Frames {
                    outputs,
                    info: info.clone(),
                })
            }
        }
    }

    pub fn postprocess(&self, predictions: &Predictions, options: &AnalyzeOptions) -> Result<TaskOutput> {
        let processor = PostProcessor::new(&self.spec.task, self.labels(), options)?;
        match predictions {
            Predictions::Single(output) => Ok(TaskOutput::Single(processor.process_single(output)?)),
            Predictions::Frames { outputs, info } => Ok(TaskOutput::Video(
                processor.process_frames(outputs, info.clone())?,
            )),
        }
    }
}
