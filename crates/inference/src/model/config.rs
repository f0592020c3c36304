use crate::error::{InferenceError, Result};
use preprocess::{FrameSampling, StandardizeConfig, TensorLayout};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Classification,
    Detection,
    Segmentation,
    VideoClassification,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Classification => "classification",
            TaskType::Detection => "detection",
            TaskType::Segmentation => "segmentation",
            TaskType::VideoClassification => "video_classification",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task declaration with its post-processing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_type", rename_all = "snake_case")]
pub enum TaskSpec {
    Classification(ClassificationConfig),
    Detection(DetectionConfig),
    Segmentation(SegmentationConfig),
    VideoClassification(ClassificationConfig),
}

impl TaskSpec {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskSpec::Classification(_) => TaskType::Classification,
            TaskSpec::Detection(_) => TaskType::Detection,
            TaskSpec::Segmentation(_) => TaskType::Segmentation,
            TaskSpec::VideoClassification(_) => TaskType::VideoClassification,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            TaskSpec::Classification(c) | TaskSpec::VideoClassification(c) => c.validate(),
            TaskSpec::Detection(d) => d.validate(),
            TaskSpec::Segmentation(_) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub top_k: usize,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

impl ClassificationConfig {
    fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(InferenceError::Validation(
                "top_k must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Raw output layout of a detection model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionFormat {
    /// One `[1, N, 4 + C]` tensor of corner boxes followed by per-class scores.
    #[default]
    #[serde(alias = "default")]
    Unified,
    /// Positional boxes, scores, classes and count tensors.
    Ssd,
    /// Named `detection_*` tensors.
    FasterRcnn,
    /// One `[1, 4 + C, N]` tensor of center boxes followed by per-class scores.
    Yolo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub output_format: DetectionFormat,
    pub confidence_threshold: f32,
    pub apply_nms: bool,
    pub iou_threshold: f32,
    pub max_detections: usize,
    /// Suppress overlapping boxes regardless of class.
    pub class_agnostic_nms: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            output_format: DetectionFormat::Unified,
            confidence_threshold: 0.5,
            apply_nms: true,
            iou_threshold: 0.5,
            max_detections: 100,
            class_agnostic_nms: true,
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        validate_unit("confidence_threshold", self.confidence_threshold)?;
        validate_unit("iou_threshold", self.iou_threshold)?;
        if self.max_detections == 0 {
            return Err(InferenceError::Validation(
                "max_detections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(InferenceError::Validation(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Class scores on the last axis (`[1, H, W, C]`) rather than axis 1 (`[1, C, H, W]`).
    pub channels_last: bool,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            channels_last: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    /// `[height, width]`; derived from the input shape when absent.
    pub target_size: Option<[u32; 2]>,
    pub normalize: bool,
    pub mean: Option<[f32; 3]>,
    pub std: Option<[f32; 3]>,
    pub add_batch_dim: bool,
    pub layout: TensorLayout,
    pub max_frames: usize,
    pub frame_interval: usize,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            target_size: None,
            normalize: true,
            mean: None,
            std: None,
            add_batch_dim: true,
            layout: TensorLayout::Nhwc,
            max_frames: 30,
            frame_interval: 1,
        }
    }
}

impl PreprocessingConfig {
    /// Resolve the standardization settings, taking spatial dims from
    /// `input_shape` when no explicit target size is configured.
    pub fn standardize_config(&self, input_shape: &[Option<usize>]) -> Result<StandardizeConfig> {
        let [height, width] = match self.target_size {
            Some(size) => size,
            None => spatial_dims(input_shape, self.layout)?,
        };
        let config = StandardizeConfig {
            target_size: (width, height),
            normalize: self.normalize,
            mean: self.mean,
            std: self.std,
            add_batch_dim: self.add_batch_dim,
            layout: self.layout,
        };
        config
            .validate()
            .map_err(|e| InferenceError::Validation(e.to_string()))?;
        Ok(config)
    }

    pub fn sampling(&self) -> FrameSampling {
        FrameSampling {
            max_frames: self.max_frames,
            frame_interval: self.frame_interval,
        }
    }
}

fn spatial_dims(input_shape: &[Option<usize>], layout: TensorLayout) -> Result<[u32; 2]> {
    let (h_idx, w_idx) = match layout {
        TensorLayout::Nhwc => (1, 2),
        TensorLayout::Nchw => (2, 3),
    };
    let dim = |i: usize| -> Result<u32> {
        input_shape
            .get(i)
            .copied()
            .flatten()
            .and_then(|d| u32::try_from(d).ok())
            .ok_or_else(|| {
                InferenceError::Validation(format!(
                    "cannot derive target size from input shape {:?}; set preprocessing.target_size",
                    input_shape
                ))
            })
    };
    Ok([dim(h_idx)?, dim(w_idx)?])
}
