use image::RgbImage;
use thiserror::Error;

/// Probability matte: 0.0 = background, 1.0 = foreground
/// Dimensions match the frame passed to `segment`, flattened in row-major order
pub type Matte = Vec<f32>;

#[derive(Debug, Error)]
pub enum SegmentationError {
    /// The underlying inference session failed and may need to be recreated
    #[error("segmentation session failed: {0}")]
    SessionFailure(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Trait for segmentation models
/// Allows swapping the ONNX backend for a different model (or a fake in tests)
pub trait SegmentationModel: Send {
    /// Process a frame and return a person probability matte
    ///
    /// # Arguments
    /// * `frame` - Input RGB frame, already downscaled for inference
    ///
    /// # Returns
    /// * Matte with values 0.0-1.0 at the frame's dimensions
    fn segment(&mut self, frame: &RgbImage) -> Result<Matte, SegmentationError>;

    /// Get the model's preferred input dimensions
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);
}
