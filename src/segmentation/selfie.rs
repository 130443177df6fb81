use super::preprocess::Preprocessor;
use super::types::{Matte, SegmentationError, SegmentationModel};
use super::ModelConfig;
use anyhow::{bail, Context, Result};
use image::RgbImage;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

/// Single-output person segmentation model loaded from ONNX
///
/// Targets the MediaPipe selfie segmentation family: one RGB input in [0, 1]
/// and one sigmoid probability map as output. The model is stateless, so
/// frames can be processed in any order.
pub struct SelfieSegmentation {
    session: Session,
    preprocessor: Preprocessor,
    width: u32,
    height: u32,
}

impl SelfieSegmentation {
    /// Create a new model from an ONNX file
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let path = config.path.as_path();

        tracing::info!("Loading segmentation model from {}", path.display());

        let session = Session::builder()
            .context("Failed to create session builder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("Failed to set optimization level")?
            .with_intra_threads(config.intra_threads)
            .context("Failed to set intra threads")?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!(
            "Segmentation model loaded: input {}x{} ({:?})",
            config.input_width,
            config.input_height,
            config.layout
        );

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(config.input_width, config.input_height, config.layout),
            width: config.input_width,
            height: config.input_height,
        })
    }
}

/// Spatial dimensions of a single-channel probability output
///
/// Accepts [1, 1, H, W], [1, H, W, 1], [1, H, W] and [H, W].
/// Returns (width, height)
fn matte_dimensions(shape: &[usize]) -> Result<(u32, u32)> {
    let (h, w) = match shape {
        [1, 1, h, w] => (*h, *w),
        [1, h, w, 1] => (*h, *w),
        [1, h, w] => (*h, *w),
        [h, w] => (*h, *w),
        other => bail!("unexpected segmentation output shape {:?}", other),
    };
    Ok((w as u32, h as u32))
}

impl SegmentationModel for SelfieSegmentation {
    fn segment(&mut self, frame: &RgbImage) -> Result<Matte, SegmentationError> {
        let _span = tracing::debug_span!("selfie_segment").entered();

        let input = Tensor::from_array(self.preprocessor.preprocess(frame))
            .context("Failed to create input tensor")?;

        let infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| SegmentationError::SessionFailure(e.to_string()))?;
        drop(infer_span);

        let mask = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract segmentation output")?;

        let (matte_width, matte_height) = matte_dimensions(mask.shape())?;
        let matte_flat: Vec<f32> = mask.iter().copied().collect();

        let (frame_width, frame_height) = frame.dimensions();
        let matte = Preprocessor::postprocess_matte(
            &matte_flat,
            matte_width,
            matte_height,
            frame_width,
            frame_height,
        )?;

        Ok(matte)
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
