//! Frame composition.
//!
//! A `FrameComposer` sits between one capture stream and its `FrameStore`.
//! For every ingested frame it:
//! 1. publishes the frame as the store's raw frame,
//! 2. runs its detector (optionally sharing the result through the
//!    `DetectionsCache`), or else reuses fresh cached detections rescaled to
//!    this stream's shape,
//! 3. draws overlays onto a copy and publishes that as the composed frame.
//!
//! Every failure fails open, including a panic inside a detector or the
//! overlay renderer: the unmodified frame is published as composed and the
//! failure is recorded in `ComposerStats`.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::detect::{rescale, Detection, DetectionSet, DetectionsCache, Detector};
use crate::frame::{Frame, FrameStore};
use crate::overlay::{draw_overlays, OverlayStyle};

/// Tuning for a composer.
#[derive(Clone, Debug)]
pub struct ComposerConfig {
    /// Publish detections computed here into the cache.
    pub publish_detections: bool,
    /// Cached detections older than this are never drawn.
    pub cache_max_age: Duration,
    pub score_threshold: f32,
    pub style: OverlayStyle,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            publish_detections: false,
            cache_max_age: Duration::from_secs(1),
            score_threshold: 0.0,
            style: OverlayStyle::default(),
        }
    }
}

/// What happened to one ingested frame.
#[derive(Clone, Debug, PartialEq)]
pub enum ComposeOutcome {
    /// Detector ran here; `count` detections were drawn or skipped by threshold.
    Detected { count: usize },
    /// Cached detections from another stream were rescaled and drawn.
    Reused { count: usize, age: Duration },
    /// Cached detections were too old; the frame passed through.
    Stale { age: Duration },
    /// Cache configured but nothing published yet.
    CacheEmpty,
    /// No detector and no cache.
    PassThrough,
    /// Detection failed; the frame passed through.
    Failed(String),
}

/// Counters for health logging.
#[derive(Clone, Debug, Default)]
pub struct ComposerStats {
    pub frames_ingested: u64,
    pub detector_runs: u64,
    pub detector_failures: u64,
    pub cache_reuses: u64,
    pub stale_skips: u64,
    pub last_error: Option<String>,
}

pub struct FrameComposer {
    name: String,
    store: Arc<FrameStore>,
    detector: Option<Box<dyn Detector>>,
    cache: Option<Arc<DetectionsCache>>,
    config: ComposerConfig,
    stats: ComposerStats,
}

impl FrameComposer {
    pub fn new(name: impl Into<String>, store: Arc<FrameStore>) -> Self {
        Self {
            name: name.into(),
            store,
            detector: None,
            cache: None,
            config: ComposerConfig::default(),
            stats: ComposerStats::default(),
        }
    }

    pub fn with_detector(mut self, detector: Box<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_cache(mut self, cache: Arc<DetectionsCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_config(mut self, config: ComposerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<FrameStore> {
        &self.store
    }

    pub fn stats(&self) -> ComposerStats {
        self.stats.clone()
    }

    /// Ingest one captured frame and publish raw + composed results.
    pub fn ingest(&mut self, frame: Frame) -> ComposeOutcome {
        self.stats.frames_ingested += 1;
        self.store.update_raw(frame.clone());

        let composed = catch_unwind(AssertUnwindSafe(|| {
            if self.detector.is_some() {
                self.compose_with_detector(frame.clone())
            } else if self.cache.is_some() {
                self.compose_from_cache(frame.clone())
            } else {
                (frame.clone(), ComposeOutcome::PassThrough)
            }
        }));

        let (composed, outcome) = match composed {
            Ok(result) => result,
            Err(payload) => {
                let message = format!("panicked: {}", panic_message(payload.as_ref()));
                log::error!(
                    "composer[{}]: composition {}, passing frame through",
                    self.name,
                    message
                );
                self.stats.detector_failures += 1;
                self.stats.last_error = Some(message.clone());
                (frame, ComposeOutcome::Failed(message))
            }
        };

        self.store.update_composed(composed);
        outcome
    }

    fn compose_with_detector(&mut self, frame: Frame) -> (Frame, ComposeOutcome) {
        let Some(detector) = self.detector.as_mut() else {
            return (frame, ComposeOutcome::PassThrough);
        };
        self.stats.detector_runs += 1;
        let detections = match detector.detect(&frame) {
            Ok(detections) => detections,
            Err(err) => {
                let message = format!("{:#}", err);
                log::warn!(
                    "composer[{}]: detector '{}' failed, passing frame through: {}",
                    self.name,
                    detector.name(),
                    message
                );
                self.stats.detector_failures += 1;
                self.stats.last_error = Some(message.clone());
                return (frame, ComposeOutcome::Failed(message));
            }
        };

        if self.config.publish_detections {
            if let Some(cache) = &self.cache {
                cache.publish(detections.clone(), frame.shape());
            }
        }

        let count = detections.len();
        let composed = self.draw(&frame, &detections.detections);
        (composed, ComposeOutcome::Detected { count })
    }

    fn compose_from_cache(&mut self, frame: Frame) -> (Frame, ComposeOutcome) {
        let Some(entry) = self.cache.as_ref().and_then(|cache| cache.latest()) else {
            return (frame, ComposeOutcome::CacheEmpty);
        };

        let age = entry.age();
        if age > self.config.cache_max_age {
            self.stats.stale_skips += 1;
            log::debug!(
                "composer[{}]: skipped stale detections (age={:.3}s)",
                self.name,
                age.as_secs_f64()
            );
            return (frame, ComposeOutcome::Stale { age });
        }

        let scaled = rescale_set(&entry.value, &frame);
        self.stats.cache_reuses += 1;
        let count = scaled.len();
        let composed = self.draw(&frame, &scaled);
        (composed, ComposeOutcome::Reused { count, age })
    }

    fn draw(&self, frame: &Frame, detections: &[Detection]) -> Frame {
        if detections.is_empty() {
            return frame.clone();
        }
        draw_overlays(
            frame,
            detections,
            self.config.score_threshold,
            &self.config.style,
        )
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Detections from `set` mapped into `frame`'s pixel space.
fn rescale_set(set: &DetectionSet, frame: &Frame) -> Vec<Detection> {
    let boxes = rescale(&set.boxes(), set.source_shape, frame.shape());
    // rescale returns nothing for zero-area shapes, so zip drops every detection
    set.detections
        .iter()
        .zip(boxes)
        .map(|(det, bbox)| Detection::new(bbox, det.label.clone(), det.score))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, StubDetector};
    use crate::frame::FrameShape;
    use anyhow::{anyhow, Result};

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<DetectionSet> {
            Err(anyhow!("model offline"))
        }
    }

    struct PanickingDetector;

    impl Detector for PanickingDetector {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn detect(&mut self, frame: &Frame) -> Result<DetectionSet> {
            panic!("tensor shape mismatch for {:?}", frame.shape());
        }
    }

    fn gray(w: u32, h: u32) -> Frame {
        Frame::filled(FrameShape::new(h, w), [90, 90, 90])
    }

    fn stub_box() -> Box<dyn Detector> {
        Box::new(StubDetector::new(vec![Detection::new(
            BoundingBox::new(10, 10, 50, 50),
            "marker",
            0.8,
        )]))
    }

    fn thin_style() -> ComposerConfig {
        ComposerConfig {
            publish_detections: true,
            style: OverlayStyle {
                thickness: 1,
                ..OverlayStyle::default()
            },
            ..ComposerConfig::default()
        }
    }

    #[test]
    fn pass_through_without_detector_or_cache() {
        let store = Arc::new(FrameStore::new());
        let mut composer = FrameComposer::new("video", store.clone());
        let frame = gray(20, 10);
        assert_eq!(composer.ingest(frame.clone()), ComposeOutcome::PassThrough);
        assert!(store.get_raw().unwrap().same_pixels(&frame));
        assert!(store.get_composed().unwrap().same_pixels(&frame));
    }

    #[test]
    fn detector_path_draws_and_publishes() {
        let cache = Arc::new(DetectionsCache::new());
        let store = Arc::new(FrameStore::new());
        let mut composer = FrameComposer::new("preview", store.clone())
            .with_detector(stub_box())
            .with_cache(cache.clone())
            .with_config(thin_style());

        let frame = gray(100, 100);
        assert_eq!(composer.ingest(frame.clone()), ComposeOutcome::Detected { count: 1 });

        let entry = cache.latest().unwrap();
        assert_eq!(entry.value.source_shape, FrameShape::new(100, 100));
        assert!(store.get_raw().unwrap().same_pixels(&frame));
        let composed = store.get_composed().unwrap();
        assert_eq!(composed.image().get_pixel(10, 30).0, [0, 255, 0]);
    }

    #[test]
    fn detector_without_publish_flag_leaves_cache_alone() {
        let cache = Arc::new(DetectionsCache::new());
        let mut composer = FrameComposer::new("preview", Arc::new(FrameStore::new()))
            .with_detector(stub_box())
            .with_cache(cache.clone());
        composer.ingest(gray(100, 100));
        assert!(cache.latest().is_none());
    }

    #[test]
    fn cached_box_is_rescaled_to_consumer_shape() {
        let cache = Arc::new(DetectionsCache::new());
        let mut producer = FrameComposer::new("preview", Arc::new(FrameStore::new()))
            .with_detector(stub_box())
            .with_cache(cache.clone())
            .with_config(thin_style());
        producer.ingest(gray(100, 100));

        let video_store = Arc::new(FrameStore::new());
        let mut consumer = FrameComposer::new("video", video_store.clone())
            .with_cache(cache.clone())
            .with_config(thin_style());
        let outcome = consumer.ingest(gray(200, 200));
        assert!(matches!(outcome, ComposeOutcome::Reused { count: 1, .. }));

        let scaled = rescale_set(&cache.latest().unwrap().value, &gray(200, 200));
        assert_eq!(scaled[0].bbox, BoundingBox::new(20, 20, 100, 100));

        let composed = video_store.get_composed().unwrap();
        assert_eq!(composed.image().get_pixel(20, 60).0, [0, 255, 0]);
        assert_eq!(composed.image().get_pixel(100, 60).0, [0, 255, 0]);
        assert_eq!(composed.image().get_pixel(60, 60).0, [90, 90, 90]);
    }

    #[test]
    fn stale_cache_passes_frame_through() {
        let cache = Arc::new(DetectionsCache::new());
        cache.publish(
            DetectionSet::new(
                vec![Detection::new(BoundingBox::new(10, 10, 50, 50), "marker", 0.8)],
                FrameShape::new(100, 100),
            ),
            FrameShape::new(100, 100),
        );
        let store = Arc::new(FrameStore::new());
        let mut consumer = FrameComposer::new("video", store.clone())
            .with_cache(cache)
            .with_config(ComposerConfig {
                cache_max_age: Duration::from_millis(10),
                ..ComposerConfig::default()
            });
        std::thread::sleep(Duration::from_millis(30));

        let frame = gray(200, 200);
        assert!(matches!(consumer.ingest(frame.clone()), ComposeOutcome::Stale { .. }));
        assert!(store.get_composed().unwrap().same_pixels(&frame));
        assert_eq!(consumer.stats().stale_skips, 1);
    }

    #[test]
    fn empty_cache_passes_frame_through() {
        let store = Arc::new(FrameStore::new());
        let mut consumer = FrameComposer::new("video", store.clone())
            .with_cache(Arc::new(DetectionsCache::new()));
        let frame = gray(30, 30);
        assert_eq!(consumer.ingest(frame.clone()), ComposeOutcome::CacheEmpty);
        assert!(store.get_composed().unwrap().same_pixels(&frame));
    }

    #[test]
    fn detector_failure_fails_open() {
        let cache = Arc::new(DetectionsCache::new());
        let store = Arc::new(FrameStore::new());
        let mut composer = FrameComposer::new("preview", store.clone())
            .with_detector(Box::new(FailingDetector))
            .with_cache(cache.clone())
            .with_config(thin_style());

        let frame = gray(40, 40);
        let outcome = composer.ingest(frame.clone());
        assert!(matches!(
            outcome,
            ComposeOutcome::Failed(ref msg) if msg.contains("model offline")
        ));
        assert!(store.get_composed().unwrap().same_pixels(&frame));
        assert!(cache.latest().is_none());
        let stats = composer.stats();
        assert_eq!(stats.detector_failures, 1);
        assert_eq!(stats.last_error.as_deref(), Some("model offline"));
    }

    #[test]
    fn detector_panic_fails_open_and_keeps_composing() {
        let store = Arc::new(FrameStore::new());
        let mut composer = FrameComposer::new("preview", store.clone())
            .with_detector(Box::new(PanickingDetector))
            .with_config(thin_style());

        let first = gray(40, 40);
        let outcome = composer.ingest(first.clone());
        assert!(matches!(
            outcome,
            ComposeOutcome::Failed(ref msg) if msg.contains("tensor shape")
        ));
        assert!(store.get_composed().unwrap().same_pixels(&first));

        let second = Frame::filled(FrameShape::new(40, 40), [5, 5, 5]);
        assert!(matches!(composer.ingest(second.clone()), ComposeOutcome::Failed(_)));
        assert!(store.get_composed().unwrap().same_pixels(&second));

        let stats = composer.stats();
        assert_eq!(stats.frames_ingested, 2);
        assert_eq!(stats.detector_failures, 2);
        assert!(stats.last_error.unwrap().starts_with("panicked:"));
    }
}
