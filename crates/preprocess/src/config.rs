use crate::error::PreprocessError;
use serde::{Deserialize, Serialize};

/// Default `(width, height)` when a model does not declare one.
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (224, 224);

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Memory layout of a standardized tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[H, W, C]`, the TensorFlow convention.
    #[default]
    Nhwc,
    /// `[C, H, W]`, the PyTorch/ONNX export convention.
    Nchw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StandardizeConfig {
    /// `(width, height)` of the output tensor.
    pub target_size: (u32, u32),
    /// Scale pixel values to `[0, 1]`; mean/std are applied on top when both are set.
    pub normalize: bool,
    pub mean: Option<[f32; 3]>,
    pub std: Option<[f32; 3]>,
    pub add_batch_dim: bool,
    pub layout: TensorLayout,
}

impl Default for StandardizeConfig {
    fn default() -> Self {
        Self {
            target_size: DEFAULT_INPUT_SIZE,
            normalize: true,
            mean: None,
            std: None,
            add_batch_dim: true,
            layout: TensorLayout::Nhwc,
        }
    }
}

impl StandardizeConfig {
    pub fn validate(&self) -> Result<(), PreprocessError> {
        let (width, height) = self.target_size;
        if width == 0 || height == 0 {
            return Err(PreprocessError::InvalidConfig(format!(
                "target size must be non-zero, got {}x{}",
                width, height
            )));
        }
        if self.mean.is_some() != self.std.is_some() {
            return Err(PreprocessError::InvalidConfig(
                "mean and std must be provided together".to_string(),
            ));
        }
        if let Some(std) = self.std
            && std.iter().any(|s| *s <= 0.0 || !s.is_finite())
        {
            return Err(PreprocessError::InvalidConfig(format!(
                "std values must be positive, got {:?}",
                std
            )));
        }
        Ok(())
    }

    /// Shape of one standardized frame, including the batch dimension if enabled.
    pub fn output_shape(&self) -> Vec<usize> {
        let (width, height) = (self.target_size.0 as usize, self.target_size.1 as usize);
        let mut shape = match self.layout {
            TensorLayout::Nhwc => vec![height, width, 3],
            TensorLayout::Nchw => vec![3, height, width],
        };
        if self.add_batch_dim {
            shape.insert(0, 1);
        }
        shape
    }
}
