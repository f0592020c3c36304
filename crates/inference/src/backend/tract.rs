use super::{ContextMetadata, ExecutionContext, ModelHandle};
use crate::error::{InferenceError, Result};
use crate::tensor::{InferenceOutput, ModelInput};
use ndarray::{ArrayD, IxDyn};
use std::path::Path;
use tract_onnx::prelude::*;

const BACKEND: &str = "tract";
const TRACT_VERSION: &str = "0.21";

type Plan = TypedRunnableModel<TypedModel>;

struct TractModel {
    plan: Plan,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

/// Pure-Rust ONNX interpreter. Runs on the calling thread, no accelerator.
#[derive(Debug, Default)]
pub struct TractContext;

impl TractContext {
    pub fn new() -> Self {
        Self
    }

    /// Order request tensors by the graph's declared inputs.
    fn bind<'a>(model: &TractModel, input: &'a ModelInput) -> Result<Vec<&'a ArrayD<f32>>> {
        match input {
            ModelInput::Positional(tensor) => {
                if model.input_names.len() != 1 {
                    return Err(InferenceError::Validation(format!(
                        "model expects {} inputs {:?}; pass named tensors",
                        model.input_names.len(),
                        model.input_names
                    )));
                }
                Ok(vec![tensor])
            }
            ModelInput::Named(named) => {
                if let Some((unknown, _)) = named
                    .iter()
                    .find(|(n, _)| !model.input_names.iter().any(|m| m == n))
                {
                    return Err(InferenceError::Validation(format!(
                        "unknown input tensor '{}'; model expects {:?}",
                        unknown, model.input_names
                    )));
                }
                model
                    .input_names
                    .iter()
                    .map(|expected| {
                        named
                            .iter()
                            .find(|(n, _)| n == expected)
                            .map(|(_, t)| t)
                            .ok_or_else(|| {
                                InferenceError::Validation(format!(
                                    "missing input tensor '{}'",
                                    expected
                                ))
                            })
                    })
                    .collect()
            }
        }
    }
}

fn to_tract(tensor: &ArrayD<f32>) -> Result<Tensor> {
    let data: Vec<f32> = tensor.iter().copied().collect();
    Tensor::from_shape(tensor.shape(), &data).map_err(InferenceError::backend)
}

fn from_tract(value: &Tensor) -> Result<ArrayD<f32>> {
    let cast = value.cast_to::<f32>().map_err(InferenceError::backend)?;
    let data = cast.as_slice::<f32>().map_err(InferenceError::backend)?.to_vec();
    Ok(ArrayD::from_shape_vec(IxDyn(cast.shape()), data)?)
}

impl ExecutionContext for TractContext {
    fn load(&self, path: &Path) -> Result<ModelHandle> {
        let _s = common::span!("tract_load");

        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|m| m.into_optimized())
            .and_then(|m| m.into_runnable())
            .map_err(|e| InferenceError::load(path, e))?;

        let graph = plan.model();
        let input_names = graph
            .input_outlets()
            .map_err(|e| InferenceError::load(path, e))?
            .iter()
            .map(|o| graph.node(o.node).name.clone())
            .collect();
        let output_names = graph
            .output_outlets()
            .map_err(|e| InferenceError::load(path, e))?
            .iter()
            .map(|o| graph.node(o.node).name.clone())
            .collect();

        tracing::info!(path = %path.display(), ?input_names, ?output_names, "Model loaded");

        Ok(ModelHandle::new(
            BACKEND,
            path,
            TractModel {
                plan,
                input_names,
                output_names,
            },
        ))
    }

    fn run(&self, handle: &ModelHandle, input: &ModelInput) -> Result<InferenceOutput> {
        let _s = common::span!("tract_run");
        let model = handle.session::<TractModel>()?;

        let inputs = Self::bind(model, input)?
            .into_iter()
            .map(|t| to_tract(t).map(TValue::from))
            .collect::<Result<TVec<TValue>>>()?;

        let outputs = model.plan.run(inputs).map_err(InferenceError::backend)?;

        let mut result = InferenceOutput::new();
        for (i, value) in outputs.iter().enumerate() {
            let name = model
                .output_names
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("output_{}", i));
            result.push(name, from_tract(value)?);
        }
        Ok(result)
    }

    fn metadata(&self) -> ContextMetadata {
        ContextMetadata {
            backend_type: BACKEND.to_string(),
            version: TRACT_VERSION.to_string(),
            device: "cpu".to_string(),
            accelerator_enabled: false,
            capacity_limit: Some(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_conversion_keeps_shape_and_order() {
        let array = ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![0., 1., 2., 3., 4., 5.]).unwrap();
        let tensor = to_tract(&array).unwrap();
        assert_eq!(tensor.shape(), &[2, 3]);
        let back = from_tract(&tensor).unwrap();
        assert_eq!(back, array);
    }

    #[test]
    fn test_from_tract_casts_integers() {
        let tensor = Tensor::from_shape(&[2], &[3i64, 7]).unwrap();
        let array = from_tract(&tensor).unwrap();
        assert_eq!(array.as_slice().unwrap(), &[3.0, 7.0]);
    }

    #[test]
    fn test_load_missing_file_is_load_error() {
        let err = TractContext::new()
            .load(Path::new("/nonexistent/model.onnx"))
            .unwrap_err();
        assert!(matches!(err, InferenceError::Load { .. }));
    }
}
