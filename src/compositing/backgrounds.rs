use super::Scene;
use image::RgbImage;
use std::collections::HashMap;
use std::path::Path;

/// Replacement background images, keyed by scene
#[derive(Debug, Default, Clone)]
pub struct BackgroundLibrary {
    images: HashMap<Scene, RgbImage>,
}

impl BackgroundLibrary {
    /// Load every scene image found in `dir`
    ///
    /// Missing or unreadable files are logged and skipped; the matching modes
    /// then fall back to the original frame.
    pub fn load<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        tracing::info!("Loading background images from {}", dir.display());

        let mut library = Self::default();
        for scene in Scene::ALL {
            let path = dir.join(scene.file_name());
            match image::open(&path) {
                Ok(img) => {
                    let img = img.to_rgb8();
                    tracing::info!(
                        "Loaded {} background {}x{}",
                        scene.as_str(),
                        img.width(),
                        img.height()
                    );
                    library.insert(scene, img);
                }
                Err(e) => {
                    tracing::warn!(
                        "Could not load {} background from {}: {}",
                        scene.as_str(),
                        path.display(),
                        e
                    );
                }
            }
        }

        library
    }

    pub fn insert(&mut self, scene: Scene, image: RgbImage) {
        self.images.insert(scene, image);
    }

    pub fn get(&self, scene: Scene) -> Option<&RgbImage> {
        self.images.get(&scene)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn missing_directory_yields_empty_library() {
        let library = BackgroundLibrary::load("/nonexistent/backgrounds");
        assert!(library.is_empty());
        assert!(library.get(Scene::Office).is_none());
    }

    #[test]
    fn loads_scene_files_by_name() {
        let dir = std::env::temp_dir().join(format!("backdrop-bg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        RgbImage::from_pixel(8, 6, Rgb([10, 200, 30]))
            .save(dir.join(Scene::Beach.file_name()))
            .unwrap();
        std::fs::write(dir.join(Scene::Office.file_name()), b"not a jpeg").unwrap();

        let library = BackgroundLibrary::load(&dir);
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(library.len(), 1);
        assert_eq!(library.get(Scene::Beach).unwrap().dimensions(), (8, 6));
        assert!(library.get(Scene::Office).is_none());
    }
}
