use super::{ContextMetadata, ExecutionContext, ModelHandle};
use crate::error::{InferenceError, Result};
use crate::tensor::{InferenceOutput, ModelInput};
use ndarray::ArrayD;
use ort::{
    execution_providers::{CUDAExecutionProvider, ExecutionProvider as _},
    session::{Session, SessionInputValue, SessionInputs, builder::GraphOptimizationLevel},
    value::TensorRef,
};
use std::borrow::Cow;
use std::path::Path;
use std::sync::Mutex;

const BACKEND: &str = "onnx";
const ORT_VERSION: &str = "2.0.0-rc.11";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Cpu,
    Cuda,
}

/// ONNX Runtime execution context.
///
/// `Cuda` registers the CUDA provider when the runtime reports it available and
/// runs on CPU otherwise. `Cpu` is the restricted variant: CPU provider only,
/// intra-op threads capped, positional inputs only.
#[derive(Debug)]
pub struct OrtContext {
    provider: ExecutionProvider,
    intra_threads: usize,
    cuda_available: bool,
}

struct OrtSession {
    session: Mutex<Session>,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl OrtContext {
    pub fn new(provider: ExecutionProvider, intra_threads: usize) -> Result<Self> {
        if intra_threads == 0 {
            return Err(InferenceError::BackendUnavailable {
                backend: BACKEND.to_string(),
                reason: "intra-op thread count must be at least 1".to_string(),
            });
        }

        let committed = ort::init().with_name("inference").commit();
        tracing::debug!(?committed, "ONNX Runtime environment committed");

        // Fails when the runtime library cannot be loaded.
        Session::builder().map_err(|e| InferenceError::BackendUnavailable {
            backend: BACKEND.to_string(),
            reason: format!("ONNX Runtime failed to initialize: {}", e),
        })?;

        let cuda_available = provider == ExecutionProvider::Cuda && cuda_is_available();
        if provider == ExecutionProvider::Cuda && !cuda_available {
            tracing::warn!("CUDA execution provider unavailable, running on CPU");
        }

        tracing::info!(?provider, intra_threads, cuda_available, "ONNX Runtime context ready");
        Ok(Self {
            provider,
            intra_threads,
            cuda_available,
        })
    }

    /// The default context: CUDA when available, CPU otherwise.
    pub fn accelerated(intra_threads: usize) -> Result<Self> {
        Self::new(ExecutionProvider::Cuda, intra_threads)
    }

    /// The restricted CPU-only context.
    pub fn cpu_only(max_threads: usize) -> Result<Self> {
        Self::new(ExecutionProvider::Cpu, max_threads)
    }

    pub fn provider(&self) -> ExecutionProvider {
        self.provider
    }

    fn build_session(&self, path: &Path) -> anyhow::Result<Session> {
        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.intra_threads)?;

        if self.cuda_available {
            builder = builder.with_execution_providers([CUDAExecutionProvider::default()
                .with_device_id(0)
                .build()])?;
        }

        Ok(builder.commit_from_file(path)?)
    }

    /// Bind the request tensors to the session's input names.
    fn bind<'a>(
        &self,
        session: &OrtSession,
        input: &'a ModelInput,
    ) -> Result<Vec<(String, &'a ArrayD<f32>)>> {
        match input {
            ModelInput::Positional(tensor) => {
                let name = session.input_names.first().ok_or_else(|| {
                    InferenceError::Validation("model declares no inputs".to_string())
                })?;
                Ok(vec![(name.clone(), tensor)])
            }
            ModelInput::Named(_) if self.provider == ExecutionProvider::Cpu => {
                Err(InferenceError::Validation(
                    "the CPU-only ONNX context accepts a single positional tensor".to_string(),
                ))
            }
            ModelInput::Named(named) => named
                .iter()
                .map(|(name, tensor)| {
                    if session.input_names.iter().any(|n| n == name) {
                        Ok((name.clone(), tensor))
                    } else {
                        Err(InferenceError::Validation(format!(
                            "unknown input tensor '{}'; model expects {:?}",
                            name, session.input_names
                        )))
                    }
                })
                .collect(),
        }
    }
}

impl ExecutionContext for OrtContext {
    fn load(&self, path: &Path) -> Result<ModelHandle> {
        let _s = common::span!("ort_load");

        let session = self
            .build_session(path)
            .map_err(|e| InferenceError::load(path, e))?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|i| i.name().to_string())
            .collect();
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %path.display(),
            provider = ?self.provider,
            inputs = ?input_names,
            outputs = ?output_names,
            "Model loaded"
        );

        Ok(ModelHandle::new(
            BACKEND,
            path,
            OrtSession {
                session: Mutex::new(session),
                input_names,
                output_names,
            },
        ))
    }

    fn run(&self, handle: &ModelHandle, input: &ModelInput) -> Result<InferenceOutput> {
        let _s = common::span!("ort_run");
        let ort_session = handle.session::<OrtSession>()?;
        let bound = self.bind(ort_session, input)?;

        let values = bound
            .into_iter()
            .map(|(name, tensor)| {
                let value =
                    TensorRef::from_array_view(tensor.view()).map_err(InferenceError::backend)?;
                Ok((Cow::Owned(name), SessionInputValue::from(value)))
            })
            .collect::<Result<Vec<(Cow<'_, str>, SessionInputValue<'_>)>>>()?;

        let mut session = ort_session
            .session
            .lock()
            .map_err(|_| InferenceError::IllegalState("ONNX session mutex poisoned".to_string()))?;

        let outputs = session
            .run(SessionInputs::from(values))
            .map_err(InferenceError::backend)?;

        let mut result = InferenceOutput::new();
        for name in &ort_session.output_names {
            let value = &outputs[name.as_str()];
            let tensor = if let Ok(array) = value.try_extract_array::<f32>() {
                array.into_owned()
            } else if let Ok(array) = value.try_extract_array::<i64>() {
                array.mapv(|v| v as f32)
            } else {
                return Err(InferenceError::Inference(format!(
                    "output '{}' is neither f32 nor i64",
                    name
                )));
            };
            result.push(name.clone(), tensor);
        }

        Ok(result)
    }

    fn metadata(&self) -> ContextMetadata {
        let (device, accelerator_enabled, capacity_limit) = match self.provider {
            ExecutionProvider::Cuda if self.cuda_available => ("cuda:0", true, None),
            ExecutionProvider::Cuda => ("cpu", false, None),
            ExecutionProvider::Cpu => ("cpu", false, Some(self.intra_threads)),
        };
        ContextMetadata {
            backend_type: BACKEND.to_string(),
            version: ORT_VERSION.to_string(),
            device: device.to_string(),
            accelerator_enabled,
            capacity_limit,
        }
    }
}

fn cuda_is_available() -> bool {
    match CUDAExecutionProvider::default().is_available() {
        Ok(available) => available,
        Err(e) => {
            tracing::warn!(error = %e, "Could not query the CUDA execution provider");
            false
        }
    }
}
