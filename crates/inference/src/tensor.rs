use crate::error::{InferenceError, Result};
use ndarray::{ArrayD, Axis};

/// Tensor(s) handed to an execution context.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelInput {
    /// Bound to the model's first input.
    Positional(ArrayD<f32>),
    /// Bound by input name, in the given order.
    Named(Vec<(String, ArrayD<f32>)>),
}

impl ModelInput {
    pub fn tensors(&self) -> Vec<&ArrayD<f32>> {
        match self {
            ModelInput::Positional(t) => vec![t],
            ModelInput::Named(named) => named.iter().map(|(_, t)| t).collect(),
        }
    }

    /// Combine per-frame inputs into one batched input.
    ///
    /// Frames that already carry a batch dimension are concatenated along axis 0,
    /// frames without one are stacked along a new axis 0.
    pub fn stack(frames: &[ModelInput], has_batch_dim: bool) -> Result<ModelInput> {
        let first = frames
            .first()
            .ok_or_else(|| InferenceError::Validation("cannot batch zero frames".to_string()))?;

        let join = |tensors: Vec<&ArrayD<f32>>| -> Result<ArrayD<f32>> {
            let views: Vec<_> = tensors.iter().map(|t| t.view()).collect();
            let joined = if has_batch_dim {
                ndarray::concatenate(Axis(0), &views)?
            } else {
                ndarray::stack(Axis(0), &views)?
            };
            Ok(joined)
        };

        match first {
            ModelInput::Positional(_) => {
                let tensors = frames
                    .iter()
                    .map(|f| match f {
                        ModelInput::Positional(t) => Ok(t),
                        ModelInput::Named(_) => Err(mixed_inputs()),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(ModelInput::Positional(join(tensors)?))
            }
            ModelInput::Named(names) => {
                let mut stacked = Vec::with_capacity(names.len());
                for (name, _) in names {
                    let tensors = frames
                        .iter()
                        .map(|f| match f {
                            ModelInput::Named(named) => named
                                .iter()
                                .find(|(n, _)| n == name)
                                .map(|(_, t)| t)
                                .ok_or_else(|| {
                                    InferenceError::Validation(format!(
                                        "frame is missing input tensor '{}'",
                                        name
                                    ))
                                }),
                            ModelInput::Positional(_) => Err(mixed_inputs()),
                        })
                        .collect::<Result<Vec<_>>>()?;
                    stacked.push((name.clone(), join(tensors)?));
                }
                Ok(ModelInput::Named(stacked))
            }
        }
    }
}

fn mixed_inputs() -> InferenceError {
    InferenceError::Validation("cannot batch positional and named inputs together".to_string())
}

/// Raw backend output: named tensors in the order the model declares them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceOutput {
    tensors: Vec<(String, ArrayD<f32>)>,
}

impl InferenceOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, tensor: ArrayD<f32>) -> Self {
        self.push(name, tensor);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, tensor: ArrayD<f32>) {
        self.tensors.push((name.into(), tensor));
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.tensors
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    pub fn at(&self, index: usize) -> Option<&ArrayD<f32>> {
        self.tensors.get(index).map(|(_, t)| t)
    }

    pub fn first(&self) -> Result<&ArrayD<f32>> {
        self.at(0)
            .ok_or_else(|| InferenceError::Inference("backend returned no output tensors".to_string()))
    }

    pub fn require(&self, name: &str) -> Result<&ArrayD<f32>> {
        self.get(name).ok_or_else(|| {
            InferenceError::Inference(format!(
                "missing output tensor '{}' (available: {:?})",
                name,
                self.names().collect::<Vec<_>>()
            ))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Split a batched output back into `n` per-frame outputs, each keeping a
    /// leading batch dimension of 1.
    pub fn split_batch(&self, n: usize) -> Result<Vec<InferenceOutput>> {
        let mut outputs = vec![InferenceOutput::new(); n];
        for (name, tensor) in &self.tensors {
            if tensor.ndim() == 0 || tensor.shape()[0] != n {
                return Err(InferenceError::Inference(format!(
                    "cannot split output '{}' with shape {:?} into {} frames",
                    name,
                    tensor.shape(),
                    n
                )));
            }
            for (i, output) in outputs.iter_mut().enumerate() {
                let frame = tensor.index_axis(Axis(0), i).insert_axis(Axis(0)).to_owned();
                output.push(name.clone(), frame);
            }
        }
        Ok(outputs)
    }
}
