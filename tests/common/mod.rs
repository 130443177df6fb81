#![allow(dead_code)]

use backdrop::compositing::{BackgroundLibrary, Scene};
use backdrop::config::ServerConfig;
use backdrop::processor::{FrameProcessor, ProcessingOptions};
use backdrop::segmentation::{Matte, ModelHandle, ModelLoader, SegmentationError, SegmentationModel};
use backdrop::server::{self, AppState};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{Rgb, RgbImage};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Marks the left half of every frame as the person
pub struct LeftHalfModel;

impl SegmentationModel for LeftHalfModel {
    fn segment(&mut self, frame: &RgbImage) -> Result<Matte, SegmentationError> {
        let (w, h) = frame.dimensions();
        Ok((0..h)
            .flat_map(|_| (0..w).map(move |x| if x < w / 2 { 1.0 } else { 0.0 }))
            .collect())
    }

    fn input_size(&self) -> (u32, u32) {
        (256, 144)
    }
}

pub fn left_half_loader() -> ModelLoader {
    Box::new(|| Ok(Box::new(LeftHalfModel) as Box<dyn SegmentationModel>))
}

pub fn test_processor(model: ModelHandle) -> FrameProcessor {
    let mut backgrounds = BackgroundLibrary::default();
    backgrounds.insert(Scene::Office, RgbImage::from_pixel(16, 9, Rgb([0, 0, 255])));
    FrameProcessor::new(
        model,
        backgrounds,
        ProcessingOptions {
            processing_width: 32,
            jpeg_quality: 85,
        },
    )
}

pub const TEST_MESSAGE_LIMIT: usize = 1024 * 1024;

pub fn test_state(model: ModelHandle, max_message_size: usize) -> AppState {
    AppState::new(
        test_processor(model),
        ServerConfig {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            max_message_size,
            stats_interval: 2,
        },
    )
}

/// PNG data URL of a solid red frame
pub fn red_frame_data_url(width: u32, height: u32) -> String {
    let mut png = Vec::new();
    RgbImage::from_pixel(width, height, Rgb([255, 0, 0]))
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();
    format!("data:image/png;base64,{}", STANDARD.encode(&png))
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start(model: ModelHandle) -> Self {
        Self::start_with_limit(model, TEST_MESSAGE_LIMIT).await
    }

    pub async fn start_with_limit(model: ModelHandle, max_message_size: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = test_state(model, max_message_size);
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server::run(listener, state.clone(), async {
            let _ = rx.await;
        }));
        Self {
            addr,
            state,
            shutdown: Some(tx),
            task,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub async fn stop(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.await?
    }
}
