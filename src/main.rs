use anyhow::Result;
use backdrop::compositing::BackgroundLibrary;
use backdrop::config::Args;
use backdrop::processor::FrameProcessor;
use backdrop::segmentation::{self, ModelHandle};
use backdrop::server::{self, AppState};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("Backdrop starting");
    tracing::info!("Listen: {}", args.listen);
    tracing::info!("Processing width: {}", args.processing_width);

    let backgrounds = BackgroundLibrary::load(&args.backgrounds);
    tracing::info!("{} background images available", backgrounds.len());

    let model = match args.model_config() {
        Some(config) => {
            tracing::info!("Loading segmentation model from {}", config.path.display());
            let handle = ModelHandle::new(
                segmentation::default_loader(config),
                args.max_model_failures,
            );
            if !handle.is_available() {
                tracing::warn!("Segmentation model not loaded yet, will retry on first frame");
            }
            handle
        }
        None => {
            tracing::info!("Running in passthrough mode (no segmentation)");
            ModelHandle::passthrough()
        }
    };

    let processor = FrameProcessor::new(model, backgrounds, args.processing_options());
    let state = AppState::new(processor, args.server_config());

    server::serve(state).await
}
