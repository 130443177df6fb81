mod handle;
mod preprocess;
mod selfie;
pub mod types;

pub use handle::{ModelHandle, ModelLoader};
pub use preprocess::{Preprocessor, TensorLayout};
pub use selfie::SelfieSegmentation;
pub use types::{Matte, SegmentationError, SegmentationModel};

use std::path::PathBuf;

/// Settings for loading the ONNX segmentation model
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub layout: TensorLayout,
    pub intra_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        // Landscape MediaPipe selfie segmentation
        Self {
            path: PathBuf::from("models/selfie_segmentation_landscape.onnx"),
            input_width: 256,
            input_height: 144,
            layout: TensorLayout::Nhwc,
            intra_threads: 4,
        }
    }
}

/// Loader that creates the default segmentation model from `config`
pub fn default_loader(config: ModelConfig) -> ModelLoader {
    Box::new(move || {
        let model = SelfieSegmentation::new(&config)?;
        Ok(Box::new(model) as Box<dyn SegmentationModel>)
    })
}
