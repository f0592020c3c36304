use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid preprocessing configuration: {0}")]
    InvalidConfig(String),

    #[error("Resize failed: {0}")]
    Resize(String),

    #[error("Unsupported video container: {0}")]
    UnsupportedVideo(String),

    #[error("Video decode failed: {0}")]
    VideoDecode(String),

    #[error("Tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl PreprocessError {
    /// True when the error is caused by the caller's input or configuration
    /// rather than a failure while processing valid input.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            PreprocessError::Decode(_)
                | PreprocessError::InvalidFrame(_)
                | PreprocessError::InvalidConfig(_)
                | PreprocessError::UnsupportedVideo(_)
        )
    }
}
