use crate::processor::ProcessingOptions;
use crate::segmentation::{ModelConfig, TensorLayout};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "BACKDROP_LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,

    /// Path to segmentation model (ONNX file)
    /// If not provided, frames are returned without segmentation
    #[arg(long, env = "BACKDROP_MODEL")]
    pub model: Option<PathBuf>,

    /// Model input width
    #[arg(long, env = "BACKDROP_MODEL_WIDTH", default_value_t = 256)]
    pub model_width: u32,

    /// Model input height
    #[arg(long, env = "BACKDROP_MODEL_HEIGHT", default_value_t = 144)]
    pub model_height: u32,

    /// Model input tensor layout
    #[arg(long, env = "BACKDROP_MODEL_LAYOUT", value_enum, default_value_t = TensorLayout::Nhwc)]
    pub model_layout: TensorLayout,

    /// Threads used by the inference session
    #[arg(long, env = "BACKDROP_MODEL_THREADS", default_value_t = 4)]
    pub model_threads: usize,

    /// Directory holding background1.jpg, background2.jpg and background3.jpg
    #[arg(long, env = "BACKDROP_BACKGROUNDS", default_value = "assets")]
    pub backgrounds: PathBuf,

    /// Width frames are resized to before inference
    #[arg(long, env = "BACKDROP_PROCESSING_WIDTH", default_value_t = 640)]
    pub processing_width: u32,

    /// Consecutive model failures before the model is reinitialized
    #[arg(long, env = "BACKDROP_MAX_MODEL_FAILURES", default_value_t = 3)]
    pub max_model_failures: u32,

    /// Largest inbound WebSocket message, in bytes
    #[arg(long, env = "BACKDROP_MAX_MESSAGE_SIZE", default_value_t = 1024 * 1024)]
    pub max_message_size: usize,

    /// JPEG quality of returned frames
    #[arg(
        long,
        env = "BACKDROP_JPEG_QUALITY",
        default_value_t = 85,
        value_parser = clap::value_parser!(u8).range(1..=100)
    )]
    pub jpeg_quality: u8,

    /// Log connection stats every N frames
    #[arg(long, env = "BACKDROP_STATS_INTERVAL", default_value_t = 30)]
    pub stats_interval: u64,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub max_message_size: usize,
    pub stats_interval: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8000)),
            max_message_size: 1024 * 1024,
            stats_interval: 30,
        }
    }
}

impl Args {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            listen: self.listen,
            max_message_size: self.max_message_size,
            stats_interval: self.stats_interval.max(1),
        }
    }

    pub fn processing_options(&self) -> ProcessingOptions {
        ProcessingOptions {
            processing_width: self.processing_width,
            jpeg_quality: self.jpeg_quality,
        }
    }

    /// Model settings, or `None` to run in passthrough mode
    pub fn model_config(&self) -> Option<ModelConfig> {
        self.model.as_ref().map(|path| ModelConfig {
            path: path.clone(),
            input_width: self.model_width,
            input_height: self.model_height,
            layout: self.model_layout,
            intra_threads: self.model_threads,
        })
    }
}
