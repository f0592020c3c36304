use super::post::SequenceInfo;
use crate::error::{InferenceError, Result};
use crate::tensor::ModelInput;
use ndarray::ArrayD;
use preprocess::{
    CpuStandardizer, FrameSampling, RgbFrame, SampledVideo, StandardizeConfig, Standardizer,
    decode_video, is_video_path,
};
use std::path::PathBuf;

/// What a caller hands to `analyze`.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisInput {
    /// Image or video on disk; videos are recognized by extension.
    Path(PathBuf),
    /// Encoded image bytes.
    Bytes(Vec<u8>),
    /// Decoded `[H, W]` or `[H, W, C]` pixels.
    Array(ArrayD<u8>),
    /// Several images processed as one frame sequence.
    Batch(Vec<AnalysisInput>),
}

impl AnalysisInput {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisInput::Path(p) if is_video_path(p) => "video",
            AnalysisInput::Path(_) => "path",
            AnalysisInput::Bytes(_) => "bytes",
            AnalysisInput::Array(_) => "array",
            AnalysisInput::Batch(_) => "batch",
        }
    }
}

impl From<PathBuf> for AnalysisInput {
    fn from(path: PathBuf) -> Self {
        AnalysisInput::Path(path)
    }
}

impl From<Vec<u8>> for AnalysisInput {
    fn from(bytes: Vec<u8>) -> Self {
        AnalysisInput::Bytes(bytes)
    }
}

impl From<ArrayD<u8>> for AnalysisInput {
    fn from(array: ArrayD<u8>) -> Self {
        AnalysisInput::Array(array)
    }
}

/// Output of the preprocess stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Prepared {
    Single(ModelInput),
    /// Frames in input order.
    Frames {
        frames: Vec<ModelInput>,
        info: SequenceInfo,
    },
}

pub struct PreProcessor {
    standardizer: CpuStandardizer,
    sampling: FrameSampling,
}

impl PreProcessor {
    pub fn new(config: StandardizeConfig, sampling: FrameSampling) -> Result<Self> {
        sampling.validate()?;
        Ok(Self {
            standardizer: CpuStandardizer::new(config)?,
            sampling,
        })
    }

    #[tracing::instrument(name = "preprocess", skip_all, fields(input = input.kind()))]
    pub fn prepare(&mut self, input: &AnalysisInput) -> Result<Prepared> {
        match input {
            AnalysisInput::Path(path) if is_video_path(path) => {
                let video = decode_video(path, self.sampling)?;
                self.prepare_video(video)
            }
            AnalysisInput::Batch(items) => self.prepare_batch(items),
            single => Ok(Prepared::Single(self.prepare_image(single)?)),
        }
    }

    fn prepare_image(&mut self, input: &AnalysisInput) -> Result<ModelInput> {
        let frame = match input {
            AnalysisInput::Path(path) => RgbFrame::open(path)?,
            AnalysisInput::Bytes(bytes) => RgbFrame::decode(bytes)?,
            AnalysisInput::Array(array) => RgbFrame::from_array(array.view())?,
            other => {
                return Err(InferenceError::Validation(format!(
                    "unsupported input type: {} inside a batch",
                    other.kind()
                )));
            }
        };
        self.standardize(&frame)
    }

    fn prepare_batch(&mut self, items: &[AnalysisInput]) -> Result<Prepared> {
        if items.is_empty() {
            return Err(InferenceError::Validation("batch input is empty".to_string()));
        }
        let frames = items
            .iter()
            .map(|item| match item {
                AnalysisInput::Path(p) if is_video_path(p) => Err(InferenceError::Validation(
                    format!("unsupported input type: video inside a batch ({})", p.display()),
                )),
                AnalysisInput::Batch(_) => Err(InferenceError::Validation(
                    "unsupported input type: nested batch".to_string(),
                )),
                item => self.prepare_image(item),
            })
            .collect::<Result<Vec<_>>>()?;

        let info = SequenceInfo {
            total_frames: frames.len(),
            processed_frames: frames.len(),
            frame_interval: 1,
            fps: None,
        };
        Ok(Prepared::Frames { frames, info })
    }

    fn prepare_video(&mut self, video: SampledVideo) -> Result<Prepared> {
        tracing::debug!(
            frames_read = video.info.frames_read,
            frames_sampled = video.info.frames_sampled,
            width = video.info.width,
            height = video.info.height,
            "Video decoded"
        );
        let frames = video
            .frames
            .iter()
            .map(|frame| self.standardize(frame))
            .collect::<Result<Vec<_>>>()?;

        Ok(Prepared::Frames {
            info: SequenceInfo {
                total_frames: video.info.frames_read,
                processed_frames: frames.len(),
                frame_interval: video.info.frame_interval,
                fps: video.info.fps,
            },
            frames,
        })
    }

    fn standardize(&mut self, frame: &RgbFrame) -> Result<ModelInput> {
        Ok(ModelInput::Positional(self.standardizer.standardize(frame)?))
    }
}
