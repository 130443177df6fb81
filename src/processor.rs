use crate::compositing::{composite, refine_mask, BackgroundLibrary, Coverage, Mode};
use crate::protocol::{decode_data_url, encode_frame_packet, FrameMetadata, ProtocolError};
use crate::segmentation::ModelHandle;
use anyhow::{anyhow, bail, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, RgbImage};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ProcessingOptions {
    /// Frames are resized to this width (keeping aspect) before inference
    pub processing_width: u32,
    pub jpeg_quality: u8,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            processing_width: 640,
            jpeg_quality: 85,
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
}

/// Result of compositing a single frame
#[derive(Debug, Clone)]
pub struct Processed {
    pub image: RgbImage,
    pub coverage: Coverage,
}

impl Processed {
    fn unmodified(frame: &RgbImage) -> Self {
        Self {
            image: frame.clone(),
            coverage: Coverage::none(),
        }
    }
}

/// Time spent in each stage of `handle_frame`
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameTimings {
    pub decode: Duration,
    pub process: Duration,
    pub encode: Duration,
}

/// A frame ready to send back to the client
#[derive(Debug, Clone)]
pub struct FrameOutput {
    pub packet: Vec<u8>,
    pub metadata: FrameMetadata,
    pub timings: FrameTimings,
}

/// Segments and composites frames; cheap to clone and share across connections
#[derive(Clone)]
pub struct FrameProcessor {
    model: Arc<Mutex<ModelHandle>>,
    backgrounds: Arc<BackgroundLibrary>,
    options: ProcessingOptions,
}

impl FrameProcessor {
    pub fn new(model: ModelHandle, backgrounds: BackgroundLibrary, options: ProcessingOptions) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
            backgrounds: Arc::new(backgrounds),
            options,
        }
    }

    /// Run `f` with exclusive access to the model handle
    pub fn with_model<T>(&self, f: impl FnOnce(&mut ModelHandle) -> T) -> Result<T> {
        let mut handle = self
            .model
            .lock()
            .map_err(|_| anyhow!("segmentation model lock poisoned"))?;
        Ok(f(&mut handle))
    }

    /// Segment and composite one frame
    ///
    /// Never fails: on any error the original frame comes back with no detection.
    pub fn process(&self, frame: &RgbImage, mode: Mode) -> Processed {
        match self.try_process(frame, mode) {
            Ok(processed) => processed,
            Err(e) => {
                tracing::error!("Error processing frame: {:#}", e);
                Processed::unmodified(frame)
            }
        }
    }

    fn try_process(&self, frame: &RgbImage, mode: Mode) -> Result<Processed> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            bail!("empty frame");
        }

        let small = downscale(frame, self.options.processing_width)?;
        let (small_width, small_height) = small.dimensions();

        let matte = self.with_model(|handle| handle.segment(&small))??;
        let Some(matte) = matte else {
            return Ok(Processed::unmodified(frame));
        };

        let mask = refine_mask(&matte, small_width, small_height, width, height)?;
        let coverage = Coverage::of(&mask);
        tracing::debug!(
            "Detection: {:.2}% ({} px), person={}",
            coverage.percentage,
            coverage.foreground_pixels,
            coverage.is_person_detected
        );

        Ok(Processed {
            image: composite(frame, &mask, mode, &self.backgrounds),
            coverage,
        })
    }

    /// Decode a data URL frame, process it and build the reply packet
    pub fn handle_frame(&self, data_url: &str, mode: Mode) -> Result<FrameOutput, FrameError> {
        let mut timings = FrameTimings::default();

        let start = Instant::now();
        let bytes = decode_data_url(data_url)?;
        let frame = image::load_from_memory(&bytes)
            .map_err(FrameError::Decode)?
            .to_rgb8();
        timings.decode = start.elapsed();

        let start = Instant::now();
        let processed = self.process(&frame, mode);
        timings.process = start.elapsed();

        let start = Instant::now();
        let jpeg = encode_jpeg(&processed.image, self.options.jpeg_quality)?;
        let metadata = FrameMetadata {
            is_person_detected: processed.coverage.is_person_detected,
            mode: mode.as_str().to_string(),
            percentage: processed.coverage.percentage,
        };
        let packet = encode_frame_packet(&metadata, &jpeg)?;
        timings.encode = start.elapsed();

        Ok(FrameOutput {
            packet,
            metadata,
            timings,
        })
    }
}

/// Largest frame (in pixels) handed to the model after resizing
pub const MAX_PROCESSING_PIXELS: u64 = 4096 * 4096;

/// Resize to `target_width`, keeping the aspect ratio
///
/// Fails instead of allocating when the resized frame would exceed
/// `MAX_PROCESSING_PIXELS`, as happens for very tall, thin frames.
pub fn downscale(frame: &RgbImage, target_width: u32) -> Result<RgbImage> {
    let (width, height) = frame.dimensions();
    if width == target_width || target_width == 0 {
        return Ok(frame.clone());
    }

    let target_height = ((height as u64 * target_width as u64) / width as u64).max(1);
    if target_width as u64 * target_height > MAX_PROCESSING_PIXELS {
        bail!(
            "frame {}x{} would resize to {}x{}, over the {} pixel budget",
            width,
            height,
            target_width,
            target_height,
            MAX_PROCESSING_PIXELS
        );
    }

    Ok(imageops::resize(
        frame,
        target_width,
        target_height as u32,
        imageops::FilterType::Triangle,
    ))
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, FrameError> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode_image(image)
        .map_err(FrameError::Encode)?;
    Ok(jpeg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositing::Scene;
    use crate::protocol::decode_frame_packet;
    use crate::segmentation::{Matte, ModelLoader, SegmentationError, SegmentationModel};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use image::Rgb;

    /// Marks the left half of every frame as the person
    struct LeftHalf;

    impl SegmentationModel for LeftHalf {
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

    struct Broken;

    impl SegmentationModel for Broken {
        fn segment(&mut self, _frame: &RgbImage) -> Result<Matte, SegmentationError> {
            Err(anyhow!("output tensor missing").into())
        }

        fn input_size(&self) -> (u32, u32) {
            (256, 144)
        }
    }

    fn processor_with(model: impl Fn() -> Box<dyn SegmentationModel> + Send + Sync + 'static) -> FrameProcessor {
        let loader: ModelLoader = Box::new(move || Ok(model()));
        let mut backgrounds = BackgroundLibrary::default();
        backgrounds.insert(Scene::Beach, RgbImage::from_pixel(10, 10, Rgb([0, 0, 255])));
        FrameProcessor::new(
            ModelHandle::new(loader, 3),
            backgrounds,
            ProcessingOptions {
                processing_width: 32,
                jpeg_quality: 85,
            },
        )
    }

    fn red_frame() -> RgbImage {
        RgbImage::from_pixel(64, 48, Rgb([255, 0, 0]))
    }

    #[test]
    fn downscale_keeps_aspect_ratio() {
        let small = downscale(&RgbImage::new(1280, 720), 640).unwrap();
        assert_eq!(small.dimensions(), (640, 360));
        let same = downscale(&RgbImage::new(640, 480), 640).unwrap();
        assert_eq!(same.dimensions(), (640, 480));
    }

    #[test]
    fn downscale_rejects_extreme_aspect_ratio() {
        assert!(downscale(&RgbImage::new(1, 20000), 640).is_err());
    }

    #[test]
    fn tall_thin_frame_comes_back_unmodified() {
        let processor = processor_with(|| Box::new(LeftHalf));
        let frame = RgbImage::from_pixel(1, 20000, Rgb([255, 0, 0]));
        let processed = processor.process(&frame, Mode::Replace(Scene::Beach));

        assert_eq!(processed.image, frame);
        assert_eq!(processed.coverage, Coverage::none());
    }

    #[test]
    fn replaces_background_behind_person() {
        let processor = processor_with(|| Box::new(LeftHalf));
        let processed = processor.process(&red_frame(), Mode::Replace(Scene::Beach));

        assert_eq!(processed.image.dimensions(), (64, 48));
        assert_eq!(processed.image.get_pixel(5, 24), &Rgb([255, 0, 0]));
        assert_eq!(processed.image.get_pixel(60, 24), &Rgb([0, 0, 255]));
        assert!(processed.coverage.is_person_detected);
        assert!((processed.coverage.percentage - 50.0).abs() < 5.0);
    }

    #[test]
    fn passthrough_without_model() {
        let processor = FrameProcessor::new(
            ModelHandle::passthrough(),
            BackgroundLibrary::default(),
            ProcessingOptions::default(),
        );
        let processed = processor.process(&red_frame(), Mode::Blur);
        assert_eq!(processed.image, red_frame());
        assert_eq!(processed.coverage, Coverage::none());
    }

    #[test]
    fn model_errors_return_original_frame() {
        let processor = processor_with(|| Box::new(Broken));
        let processed = processor.process(&red_frame(), Mode::Replace(Scene::Beach));
        assert_eq!(processed.image, red_frame());
        assert!(!processed.coverage.is_person_detected);
        assert_eq!(processed.coverage.percentage, 0.0);
    }

    #[test]
    fn handle_frame_builds_packet() {
        let mut png = Vec::new();
        red_frame()
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let url = format!("data:image/png;base64,{}", STANDARD.encode(&png));

        let processor = processor_with(|| Box::new(LeftHalf));
        let output = processor.handle_frame(&url, Mode::Blur).unwrap();

        let (metadata, jpeg) = decode_frame_packet(&output.packet).unwrap();
        assert_eq!(metadata, output.metadata);
        assert_eq!(metadata.mode, "difuminado");
        assert!(metadata.is_person_detected);

        let decoded = image::load_from_memory(jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn handle_frame_rejects_garbage() {
        let processor = processor_with(|| Box::new(LeftHalf));
        assert!(matches!(
            processor.handle_frame("hello", Mode::None),
            Err(FrameError::Protocol(ProtocolError::NotAnImageDataUrl))
        ));
        assert!(matches!(
            processor.handle_frame("data:image/png;base64,aGVsbG8=", Mode::None),
            Err(FrameError::Decode(_))
        ));
    }
}
