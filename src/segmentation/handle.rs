use super::types::{Matte, SegmentationError, SegmentationModel};
use anyhow::Result;
use image::RgbImage;

/// Creates a fresh model instance, used for the first load and every reinit
pub type ModelLoader = Box<dyn Fn() -> Result<Box<dyn SegmentationModel>> + Send + Sync>;

/// Owns the segmentation model and recovers it when inference keeps failing
///
/// `segment` returns `Ok(None)` whenever the frame should be passed through
/// untouched: no model is loaded, the session just failed, or the handle
/// was released at shutdown.
pub struct ModelHandle {
    loader: Option<ModelLoader>,
    model: Option<Box<dyn SegmentationModel>>,
    released: bool,
    consecutive_failures: u32,
    max_failures: u32,
    reinit_count: u64,
}

impl ModelHandle {
    /// Build a handle and attempt the first load
    ///
    /// A failed load leaves the handle empty; it retries lazily on the next frame.
    pub fn new(loader: ModelLoader, max_failures: u32) -> Self {
        let mut handle = Self {
            loader: Some(loader),
            model: None,
            released: false,
            consecutive_failures: 0,
            max_failures: max_failures.max(1),
            reinit_count: 0,
        };
        handle.initialize();
        handle
    }

    /// Handle with no model at all; every frame passes through
    pub fn passthrough() -> Self {
        Self {
            loader: None,
            model: None,
            released: false,
            consecutive_failures: 0,
            max_failures: 1,
            reinit_count: 0,
        }
    }

    /// Drop the current model (if any) and load a new one
    pub fn initialize(&mut self) -> bool {
        let Some(loader) = &self.loader else {
            return false;
        };

        if self.model.take().is_some() {
            tracing::info!("Closing previous segmentation model");
        }

        match loader() {
            Ok(model) => {
                let (width, height) = model.input_size();
                tracing::info!("Segmentation model ready ({}x{})", width, height);
                self.model = Some(model);
                self.consecutive_failures = 0;
                true
            }
            Err(e) => {
                tracing::error!("Failed to initialize segmentation model: {:#}", e);
                false
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.model.is_some()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Number of times the model was recreated after repeated failures
    pub fn reinit_count(&self) -> u64 {
        self.reinit_count
    }

    pub fn segment(&mut self, frame: &RgbImage) -> Result<Option<Matte>, SegmentationError> {
        if self.released {
            return Ok(None);
        }

        if self.model.is_none() {
            if self.loader.is_none() {
                return Ok(None);
            }
            tracing::warn!("Segmentation model unavailable, reinitializing");
            if !self.initialize() {
                tracing::warn!("Model still unavailable, returning original frame");
                return Ok(None);
            }
        }

        let Some(model) = self.model.as_mut() else {
            return Ok(None);
        };

        match model.segment(frame) {
            Ok(matte) => {
                self.consecutive_failures = 0;
                Ok(Some(matte))
            }
            Err(SegmentationError::SessionFailure(message)) => {
                self.consecutive_failures += 1;
                tracing::warn!(
                    "Segmentation session failure #{}: {}",
                    self.consecutive_failures,
                    message
                );

                if self.consecutive_failures >= self.max_failures {
                    tracing::warn!(
                        "Too many failures ({}), reinitializing segmentation model",
                        self.consecutive_failures
                    );
                    self.reinit_count += 1;
                    self.initialize();
                    self.consecutive_failures = 0;
                }

                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Drop the model, releasing the inference session
    ///
    /// Sockets that outlive the server keep getting passthrough frames; the
    /// model is never reloaded after this.
    pub fn release(&mut self) {
        self.released = true;
        if self.model.take().is_some() {
            tracing::info!("Segmentation model released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Replays a scripted sequence of results, then succeeds forever
    struct Scripted {
        script: Arc<Mutex<VecDeque<Result<(), &'static str>>>>,
    }

    impl SegmentationModel for Scripted {
        fn segment(&mut self, frame: &RgbImage) -> Result<Matte, SegmentationError> {
            match self.script.lock().unwrap().pop_front() {
                Some(Err("session")) => Err(SegmentationError::SessionFailure("graph lost".into())),
                Some(Err(other)) => Err(anyhow::anyhow!(other).into()),
                _ => Ok(vec![1.0; (frame.width() * frame.height()) as usize]),
            }
        }

        fn input_size(&self) -> (u32, u32) {
            (2, 2)
        }
    }

    fn scripted_handle(
        script: Vec<Result<(), &'static str>>,
        max_failures: u32,
    ) -> (ModelHandle, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let script = Arc::new(Mutex::new(VecDeque::from(script)));
        let counter = loads.clone();
        let loader: ModelLoader = Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Scripted {
                script: script.clone(),
            }) as Box<dyn SegmentationModel>)
        });
        (ModelHandle::new(loader, max_failures), loads)
    }

    fn frame() -> RgbImage {
        RgbImage::new(2, 2)
    }

    #[test]
    fn successful_segment_returns_matte() {
        let (mut handle, loads) = scripted_handle(vec![], 3);
        let matte = handle.segment(&frame()).unwrap().unwrap();
        assert_eq!(matte.len(), 4);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reinitializes_after_repeated_session_failures() {
        let (mut handle, loads) =
            scripted_handle(vec![Err("session"), Err("session"), Err("session")], 3);

        assert!(handle.segment(&frame()).unwrap().is_none());
        assert!(handle.segment(&frame()).unwrap().is_none());
        assert_eq!(handle.consecutive_failures(), 2);
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        assert!(handle.segment(&frame()).unwrap().is_none());
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(handle.reinit_count(), 1);
        assert_eq!(handle.consecutive_failures(), 0);

        assert!(handle.segment(&frame()).unwrap().is_some());
    }

    #[test]
    fn success_resets_failure_count() {
        let (mut handle, loads) =
            scripted_handle(vec![Err("session"), Err("session"), Ok(()), Err("session")], 3);

        for _ in 0..4 {
            handle.segment(&frame()).unwrap();
        }
        assert_eq!(handle.consecutive_failures(), 1);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn other_errors_propagate_without_counting() {
        let (mut handle, _) = scripted_handle(vec![Err("bad shape")], 3);
        let err = handle.segment(&frame()).unwrap_err();
        assert!(matches!(err, SegmentationError::Other(_)));
        assert_eq!(handle.consecutive_failures(), 0);
    }

    #[test]
    fn failed_load_retries_lazily() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let loader: ModelLoader = Box::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("model file busy");
            }
            Ok(Box::new(Scripted {
                script: Arc::new(Mutex::new(VecDeque::new())),
            }) as Box<dyn SegmentationModel>)
        });

        let mut handle = ModelHandle::new(loader, 3);
        assert!(!handle.is_available());

        assert!(handle.segment(&frame()).unwrap().is_some());
        assert!(handle.is_available());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn passthrough_handle_never_segments() {
        let mut handle = ModelHandle::passthrough();
        assert!(!handle.is_available());
        assert!(handle.segment(&frame()).unwrap().is_none());
    }

    #[test]
    fn release_drops_model() {
        let (mut handle, _) = scripted_handle(vec![], 3);
        assert!(handle.is_available());
        handle.release();
        assert!(!handle.is_available());
    }

    #[test]
    fn released_handle_does_not_reload() {
        let (mut handle, loads) = scripted_handle(vec![], 3);
        handle.release();

        assert!(handle.segment(&frame()).unwrap().is_none());
        assert!(!handle.is_available());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }
}
