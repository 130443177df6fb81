mod backgrounds;
pub mod mask;

pub use backgrounds::BackgroundLibrary;
pub use mask::{refine_mask, Coverage};

use image::{imageops, DynamicImage, GrayImage, RgbImage};
use std::fmt;

/// Gaussian sigma matching a 35x35 kernel with automatic sigma
pub const BLUR_SIGMA: f32 = 5.6;

/// Static replacement backgrounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scene {
    Office,
    Beach,
    Mountain,
}

impl Scene {
    pub const ALL: [Scene; 3] = [Scene::Office, Scene::Beach, Scene::Mountain];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scene::Office => "office",
            Scene::Beach => "beach",
            Scene::Mountain => "mountain",
        }
    }

    /// Image file name inside the backgrounds directory
    pub fn file_name(&self) -> &'static str {
        match self {
            Scene::Office => "background1.jpg",
            Scene::Beach => "background2.jpg",
            Scene::Mountain => "background3.jpg",
        }
    }
}

/// What to put behind the person
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Return the frame as captured
    #[default]
    None,
    /// Blur everything but the person
    Blur,
    /// Replace the background with a static image
    Replace(Scene),
    /// Show the refined mask as a grayscale image
    Matte,
}

impl Mode {
    /// Parse a client mode name; unknown names fall back to `Mode::None`
    pub fn parse(name: &str) -> Self {
        Self::parse_known(name).unwrap_or_default()
    }

    /// Parse a client mode name, `None` when the name is not recognized
    pub fn parse_known(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "none" | "" => Some(Mode::None),
            "difuminado" | "blur" => Some(Mode::Blur),
            "office" | "oficina" => Some(Mode::Replace(Scene::Office)),
            "beach" | "playa" => Some(Mode::Replace(Scene::Beach)),
            "mountain" | "montaña" => Some(Mode::Replace(Scene::Mountain)),
            "matte" => Some(Mode::Matte),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::None => "none",
            Mode::Blur => "difuminado",
            Mode::Replace(scene) => scene.as_str(),
            Mode::Matte => "matte",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-pixel `frame * m + background * (1 - m)` with `m = mask / 255`
pub fn blend(frame: &RgbImage, background: &RgbImage, mask: &GrayImage) -> RgbImage {
    debug_assert_eq!(frame.dimensions(), background.dimensions());
    debug_assert_eq!(frame.dimensions(), mask.dimensions());

    let mut out = frame.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let m = mask.get_pixel(x, y)[0] as u32;
        let bg = background.get_pixel(x, y);
        for c in 0..3 {
            let value = pixel[c] as u32 * m + bg[c] as u32 * (255 - m);
            pixel[c] = ((value + 127) / 255) as u8;
        }
    }
    out
}

/// Composite the frame over the background selected by `mode`
///
/// Falls back to the untouched frame when a replacement image is missing.
pub fn composite(
    frame: &RgbImage,
    mask: &GrayImage,
    mode: Mode,
    backgrounds: &BackgroundLibrary,
) -> RgbImage {
    let _span = tracing::debug_span!("composite", mode = mode.as_str()).entered();
    let (width, height) = frame.dimensions();

    match mode {
        Mode::None => frame.clone(),
        Mode::Blur => {
            let blurred = imageops::blur(frame, BLUR_SIGMA);
            blend(frame, &blurred, mask)
        }
        Mode::Replace(scene) => match backgrounds.get(scene) {
            Some(image) => {
                let background = if image.dimensions() != (width, height) {
                    imageops::resize(image, width, height, imageops::FilterType::Triangle)
                } else {
                    image.clone()
                };
                blend(frame, &background, mask)
            }
            None => {
                tracing::warn!("Background not found for mode: {}", scene.as_str());
                frame.clone()
            }
        },
        Mode::Matte => DynamicImage::ImageLuma8(mask.clone()).to_rgb8(),
    }
}
