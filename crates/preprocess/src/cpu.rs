use crate::config::{StandardizeConfig, TensorLayout};
use crate::error::PreprocessError;
use crate::frame::RgbFrame;
use crate::Standardizer;
use common::{span, span_debug};
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use ndarray::{ArrayD, IxDyn};

pub struct CpuStandardizer {
    config: StandardizeConfig,
    resizer: Resizer,
    resized: Vec<u8>,
}

impl CpuStandardizer {
    pub fn new(config: StandardizeConfig) -> Result<Self, PreprocessError> {
        config.validate()?;
        let (width, height) = config.target_size;
        Ok(Self {
            config,
            resizer: Resizer::new(),
            resized: vec![0u8; width as usize * height as usize * 3],
        })
    }

    pub fn config(&self) -> &StandardizeConfig {
        &self.config
    }

    fn resize(&mut self, frame: &RgbFrame) -> Result<(), PreprocessError> {
        let _s = span_debug!("resize");
        let (width, height) = self.config.target_size;

        if frame.width() == width && frame.height() == height {
            self.resized.copy_from_slice(frame.pixels());
            return Ok(());
        }

        let src = ImageRef::new(frame.width(), frame.height(), frame.pixels(), PixelType::U8x3)
            .map_err(|e| PreprocessError::Resize(e.to_string()))?;
        let mut dst = Image::from_slice_u8(width, height, &mut self.resized, PixelType::U8x3)
            .map_err(|e| PreprocessError::Resize(e.to_string()))?;

        self.resizer
            .resize(
                &src,
                &mut dst,
                &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
            )
            .map_err(|e| PreprocessError::Resize(e.to_string()))?;

        Ok(())
    }

    fn normalize(&self) -> Result<ArrayD<f32>, PreprocessError> {
        let _s = span_debug!("normalize");
        let (width, height) = self.config.target_size;
        let spatial = width as usize * height as usize;

        let scale = if self.config.normalize { 1.0 / 255.0 } else { 1.0 };
        let (mean, std) = match (self.config.normalize, self.config.mean, self.config.std) {
            (true, Some(mean), Some(std)) => (mean, std),
            _ => ([0.0; 3], [1.0; 3]),
        };

        let mut output = vec![0.0f32; 3 * spatial];
        for (i, px) in self.resized.chunks_exact(3).enumerate() {
            for c in 0..3 {
                let value = (px[c] as f32 * scale - mean[c]) / std[c];
                let idx = match self.config.layout {
                    TensorLayout::Nhwc => i * 3 + c,
                    TensorLayout::Nchw => c * spatial + i,
                };
                output[idx] = value;
            }
        }

        Ok(ArrayD::from_shape_vec(
            IxDyn(&self.config.output_shape()),
            output,
        )?)
    }
}

impl Standardizer for CpuStandardizer {
    fn standardize(&mut self, frame: &RgbFrame) -> Result<ArrayD<f32>, PreprocessError> {
        let _s = span!("standardize");
        tracing::trace!(
            width = frame.width(),
            height = frame.height(),
            "Standardizing frame"
        );
        self.resize(frame)?;
        self.normalize()
    }

    fn target_size(&self) -> (u32, u32) {
        self.config.target_size
    }
}
