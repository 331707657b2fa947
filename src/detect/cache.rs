use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::detect::result::DetectionSet;
use crate::frame::FrameShape;

/// A published value and the instant it was published.
#[derive(Clone, Debug)]
pub struct CacheEntry<T> {
    pub value: T,
    pub published_at: Instant,
}

impl<T> CacheEntry<T> {
    pub fn age(&self) -> Duration {
        self.published_at.elapsed()
    }

    /// True when the entry is no older than `max_age`.
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.age() <= max_age
    }
}

/// Thread-safe holder of the most recent detection set.
///
/// One stream publishes what it detected together with the shape of the image
/// it ran on; other streams read it back and rescale to their own shape.
#[derive(Default)]
pub struct DetectionsCache {
    latest: Mutex<Option<CacheEntry<DetectionSet>>>,
}

impl DetectionsCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<CacheEntry<DetectionSet>>> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the cached set. `source_shape` overrides the shape recorded on
    /// the set itself.
    pub fn publish(&self, mut detections: DetectionSet, source_shape: FrameShape) {
        detections.source_shape = source_shape;
        let entry = CacheEntry {
            value: detections,
            published_at: Instant::now(),
        };
        *self.slot() = Some(entry);
    }

    /// Copy of the latest entry, if anything was ever published.
    pub fn latest(&self) -> Option<CacheEntry<DetectionSet>> {
        self.slot().clone()
    }

    /// Latest entry only when it is within `max_age`.
    pub fn latest_fresh(&self, max_age: Duration) -> Option<CacheEntry<DetectionSet>> {
        self.latest().filter(|entry| entry.is_fresh(max_age))
    }
}
