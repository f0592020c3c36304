//! Image and video standardization: decoding, resizing, normalization and
//! frame sampling into the `f32` tensors fed to execution contexts.

pub mod config;
pub mod cpu;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod frame;
pub mod video;

use ndarray::ArrayD;

pub use config::{DEFAULT_INPUT_SIZE, IMAGENET_MEAN, IMAGENET_STD, StandardizeConfig, TensorLayout};
pub use cpu::CpuStandardizer;
pub use error::PreprocessError;
pub use frame::RgbFrame;
pub use video::{FrameSampler, FrameSampling, SampledVideo, VideoInfo, decode_video, is_video_path};

/// Turns a decoded RGB frame into a model-ready tensor.
pub trait Standardizer {
    /// Resize and normalize one frame.
    ///
    /// The returned tensor follows the configured [`TensorLayout`] and carries a
    /// leading batch dimension of 1 when `add_batch_dim` is set.
    fn standardize(&mut self, frame: &RgbFrame) -> Result<ArrayD<f32>, PreprocessError>;

    /// Target `(width, height)` of the produced tensor.
    fn target_size(&self) -> (u32, u32);
}
