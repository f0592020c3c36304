use crate::error::PreprocessError;
use crate::frame::RgbFrame;
use common::span;
use image::AnimationDecoder;
use image::codecs::gif::GifDecoder;
use std::fs::File;
use std::io::BufReader;
use std::ops::ControlFlow;
use std::path::Path;

/// Extensions routed to the video decoders instead of the image decoder.
pub const VIDEO_EXTENSIONS: &[&str] = &["gif", "mp4", "avi", "mov", "mkv", "webm"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSampling {
    /// Upper bound on frames kept.
    pub max_frames: usize,
    /// Keep every n-th decoded frame.
    pub frame_interval: usize,
}

impl Default for FrameSampling {
    fn default() -> Self {
        Self {
            max_frames: 30,
            frame_interval: 1,
        }
    }
}

impl FrameSampling {
    pub fn validate(&self) -> Result<(), PreprocessError> {
        if self.max_frames == 0 {
            return Err(PreprocessError::InvalidConfig(
                "max_frames must be at least 1".to_string(),
            ));
        }
        if self.frame_interval == 0 {
            return Err(PreprocessError::InvalidConfig(
                "frame_interval must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Frames decoded before sampling stopped.
    pub frames_read: usize,
    pub frames_sampled: usize,
    pub frame_interval: usize,
    pub fps: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SampledVideo {
    pub frames: Vec<RgbFrame>,
    pub info: VideoInfo,
}

/// Keeps every `frame_interval`-th frame until `max_frames` are held.
///
/// Decoders feed frames through [`FrameSampler::offer_with`] and stop as soon as it
/// returns [`ControlFlow::Break`]. Conversion of skipped frames is never run.
pub struct FrameSampler {
    sampling: FrameSampling,
    frames_read: usize,
    kept: Vec<RgbFrame>,
}

impl FrameSampler {
    pub fn new(sampling: FrameSampling) -> Self {
        Self {
            sampling,
            frames_read: 0,
            kept: Vec::with_capacity(sampling.max_frames.min(64)),
        }
    }

    pub fn is_full(&self) -> bool {
        self.kept.len() >= self.sampling.max_frames
    }

    pub fn offer_with<F>(&mut self, convert: F) -> Result<ControlFlow<()>, PreprocessError>
    where
        F: FnOnce() -> Result<RgbFrame, PreprocessError>,
    {
        if self.is_full() {
            return Ok(ControlFlow::Break(()));
        }
        if self.frames_read % self.sampling.frame_interval == 0 {
            self.kept.push(convert()?);
        }
        self.frames_read += 1;

        Ok(if self.is_full() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        })
    }

    pub fn finish(self, fps: Option<f64>) -> Result<SampledVideo, PreprocessError> {
        let (width, height) = self
            .kept
            .first()
            .map(|f| (f.width(), f.height()))
            .ok_or_else(|| PreprocessError::VideoDecode("no frames could be decoded".to_string()))?;

        Ok(SampledVideo {
            info: VideoInfo {
                width,
                height,
                frames_read: self.frames_read,
                frames_sampled: self.kept.len(),
                frame_interval: self.sampling.frame_interval,
                fps,
            },
            frames: self.kept,
        })
    }
}

pub fn is_video_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Decode and sample frames from a video file.
///
/// Animated GIFs are always supported. Other containers need the `ffmpeg` feature.
pub fn decode_video(path: &Path, sampling: FrameSampling) -> Result<SampledVideo, PreprocessError> {
    let _s = span!("decode_video");
    sampling.validate()?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let video = match extension.as_str() {
        "gif" => decode_gif(path, sampling)?,
        #[cfg(feature = "ffmpeg")]
        _ => crate::ffmpeg::decode(path, sampling)?,
        #[cfg(not(feature = "ffmpeg"))]
        _ => {
            return Err(PreprocessError::UnsupportedVideo(format!(
                "{} (rebuild with the `ffmpeg` feature to decode this container)",
                path.display()
            )));
        }
    };

    tracing::debug!(
        path = %path.display(),
        frames_read = video.info.frames_read,
        frames_sampled = video.info.frames_sampled,
        "Video sampled"
    );

    Ok(video)
}

fn decode_gif(path: &Path, sampling: FrameSampling) -> Result<SampledVideo, PreprocessError> {
    let decoder = GifDecoder::new(BufReader::new(File::open(path)?))?;
    let mut sampler = FrameSampler::new(sampling);
    let mut fps = None;

    for frame in decoder.into_frames() {
        let frame = frame?;
        if fps.is_none() {
            let (numer, denom) = frame.delay().numer_denom_ms();
            if numer > 0 {
                fps = Some(1000.0 * denom as f64 / numer as f64);
            }
        }
        let flow = sampler.offer_with(|| {
            let rgb = image::DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8();
            let (width, height) = rgb.dimensions();
            RgbFrame::new(width, height, rgb.into_raw())
        })?;
        if flow.is_break() {
            break;
        }
    }

    sampler.finish(fps)
}
