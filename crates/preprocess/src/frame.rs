use crate::error::PreprocessError;
use common::span;
use ndarray::ArrayViewD;
use std::path::Path;

/// Interleaved 8-bit RGB pixels in row-major HWC order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RgbFrame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, PreprocessError> {
        if width == 0 || height == 0 {
            return Err(PreprocessError::InvalidFrame(format!(
                "frame dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(PreprocessError::InvalidFrame(format!(
                "buffer size mismatch: expected {} bytes for {}x{} RGB, got {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Decode an encoded image (JPEG, PNG, GIF first frame) into RGB.
    pub fn decode(bytes: &[u8]) -> Result<Self, PreprocessError> {
        let _s = span!("decode_image");
        let rgb = image::load_from_memory(bytes)?.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::new(width, height, rgb.into_raw())
    }

    pub fn open(path: &Path) -> Result<Self, PreprocessError> {
        let bytes = std::fs::read(path)?;
        Self::decode(&bytes)
    }

    /// Build a frame from an already-decoded `[H, W]`, `[H, W, 3]` or `[H, W, 4]` array.
    ///
    /// Grayscale is replicated across channels; alpha is dropped.
    pub fn from_array(array: ArrayViewD<'_, u8>) -> Result<Self, PreprocessError> {
        let shape = array.shape();
        let (height, width, channels) = match *shape {
            [h, w] => (h, w, 1),
            [h, w, c] if c == 1 || c == 3 || c == 4 => (h, w, c),
            _ => {
                return Err(PreprocessError::InvalidFrame(format!(
                    "expected an [H, W], [H, W, 3] or [H, W, 4] array, got shape {:?}",
                    shape
                )));
            }
        };

        let mut pixels = Vec::with_capacity(height * width * 3);
        match channels {
            1 => array.iter().for_each(|v| pixels.extend_from_slice(&[*v, *v, *v])),
            3 => pixels.extend(array.iter().copied()),
            _ => pixels.extend(
                array
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| i % 4 != 3)
                    .map(|(_, v)| *v),
            ),
        }

        Self::new(to_u32(width)?, to_u32(height)?, pixels)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

fn to_u32(dim: usize) -> Result<u32, PreprocessError> {
    u32::try_from(dim)
        .map_err(|_| PreprocessError::InvalidFrame(format!("dimension {} is too large", dim)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use ndarray::{Array2, Array3};
    use std::io::Cursor;

    #[test]
    fn test_new_rejects_size_mismatch() {
        let result = RgbFrame::new(10, 10, vec![0u8; 200]);
        assert!(result.is_err(), "Size mismatch should return error");
        assert!(
            result.unwrap_err().to_string().contains("mismatch"),
            "Error should mention mismatch"
        );
    }

    #[test]
    fn test_new_rejects_empty_frame() {
        assert!(RgbFrame::new(0, 4, vec![]).is_err());
    }

    #[test]
    fn test_decode_png() {
        let mut img = RgbImage::new(3, 2);
        img.put_pixel(2, 1, Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        let frame = RgbFrame::decode(&bytes).unwrap();
        assert_eq!((frame.width(), frame.height()), (3, 2));
        assert_eq!(&frame.pixels()[15..18], &[10, 20, 30]);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = RgbFrame::decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, PreprocessError::Decode(_)));
    }

    #[test]
    fn test_from_array_grayscale_replicates() {
        let array = Array2::from_shape_vec((1, 2), vec![7u8, 200]).unwrap();
        let frame = RgbFrame::from_array(array.view().into_dyn()).unwrap();
        assert_eq!(frame.pixels(), &[7, 7, 7, 200, 200, 200]);
    }

    #[test]
    fn test_from_array_drops_alpha() {
        let array = Array3::from_shape_vec((1, 1, 4), vec![1u8, 2, 3, 255]).unwrap();
        let frame = RgbFrame::from_array(array.view().into_dyn()).unwrap();
        assert_eq!(frame.pixels(), &[1, 2, 3]);
    }

    #[test]
    fn test_from_array_rejects_bad_shape() {
        let array = Array3::<u8>::zeros((4, 4, 5));
        let err = RgbFrame::from_array(array.view().into_dyn()).unwrap_err();
        assert!(
            err.to_string().contains("[4, 4, 5]"),
            "Error should name the received shape: {}",
            err
        );
    }
}
