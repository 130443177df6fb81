use anyhow::{ensure, Result};
use image::{imageops, GrayImage, Luma};

/// Mask values strictly above this become foreground
pub const THRESHOLD: u8 = 128;

/// Side of the square structuring element used to clean the mask
pub const KERNEL_SIZE: u32 = 5;

/// Share of the frame (in percent) above which a person counts as present
pub const DETECTION_PERCENTAGE: f32 = 0.1;

/// Foreground pixel count that forces a positive detection on large frames
pub const DETECTION_MIN_PIXELS: u64 = 100;

/// Turn a probability matte into a clean binary mask at frame resolution
///
/// Steps:
/// 1. Scale to 0-255 at matte resolution
/// 2. Resize to the frame dimensions
/// 3. Binary threshold at `THRESHOLD`
/// 4. Morphological close, then open, with a `KERNEL_SIZE` square
pub fn refine_mask(
    matte: &[f32],
    matte_width: u32,
    matte_height: u32,
    frame_width: u32,
    frame_height: u32,
) -> Result<GrayImage> {
    let _span = tracing::debug_span!("refine_mask").entered();

    ensure!(
        matte.len() == (matte_width * matte_height) as usize,
        "matte has {} values, expected {}x{}",
        matte.len(),
        matte_width,
        matte_height
    );

    let gray = GrayImage::from_fn(matte_width, matte_height, |x, y| {
        let idx = (y * matte_width + x) as usize;
        Luma([(matte[idx] * 255.0).clamp(0.0, 255.0) as u8])
    });

    let mut mask = if (matte_width, matte_height) != (frame_width, frame_height) {
        imageops::resize(
            &gray,
            frame_width,
            frame_height,
            imageops::FilterType::Triangle,
        )
    } else {
        gray
    };

    threshold(&mut mask, THRESHOLD);

    let radius = KERNEL_SIZE / 2;
    let closed = erode(&dilate(&mask, radius), radius);
    let opened = dilate(&erode(&closed, radius), radius);

    Ok(opened)
}

pub fn threshold(mask: &mut GrayImage, level: u8) {
    for pixel in mask.pixels_mut() {
        pixel[0] = if pixel[0] > level { 255 } else { 0 };
    }
}

pub fn dilate(mask: &GrayImage, radius: u32) -> GrayImage {
    morph(mask, radius, u8::max)
}

pub fn erode(mask: &GrayImage, radius: u32) -> GrayImage {
    morph(mask, radius, u8::min)
}

/// Square-kernel rank filter, applied as a horizontal then a vertical pass
///
/// Pixels outside the image are ignored rather than padded.
fn morph(mask: &GrayImage, radius: u32, pick: fn(u8, u8) -> u8) -> GrayImage {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 || radius == 0 {
        return mask.clone();
    }

    let rows = GrayImage::from_fn(width, height, |x, y| {
        let lo = x.saturating_sub(radius);
        let hi = (x + radius).min(width - 1);
        let value = (lo..=hi)
            .map(|xi| mask.get_pixel(xi, y)[0])
            .fold(mask.get_pixel(x, y)[0], pick);
        Luma([value])
    });

    GrayImage::from_fn(width, height, |x, y| {
        let lo = y.saturating_sub(radius);
        let hi = (y + radius).min(height - 1);
        let value = (lo..=hi)
            .map(|yi| rows.get_pixel(x, yi)[0])
            .fold(rows.get_pixel(x, y)[0], pick);
        Luma([value])
    })
}

/// How much of the frame the person mask covers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coverage {
    pub foreground_pixels: u64,
    pub percentage: f32,
    pub is_person_detected: bool,
}

impl Coverage {
    pub fn none() -> Self {
        Self {
            foreground_pixels: 0,
            percentage: 0.0,
            is_person_detected: false,
        }
    }

    pub fn of(mask: &GrayImage) -> Self {
        let total = mask.width() as u64 * mask.height() as u64;
        if total == 0 {
            return Self::none();
        }

        let foreground_pixels = mask.pixels().filter(|p| p[0] > 0).count() as u64;
        let percentage = (foreground_pixels as f64 / total as f64 * 100.0) as f32;

        Self {
            foreground_pixels,
            percentage,
            is_person_detected: percentage > DETECTION_PERCENTAGE
                || foreground_pixels > DETECTION_MIN_PIXELS,
        }
    }
}
