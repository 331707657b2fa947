use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{CaptureSource, StreamKind};
use crate::compose::{ComposeOutcome, ComposerStats, FrameComposer};
use crate::shutdown::Shutdown;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Spawn a worker that feeds `stream` into `composer` until shutdown.
///
/// Each poll waits at most `wait` for a frame so the shutdown flag is checked
/// regularly. The composer's final counters are returned on join.
pub fn spawn_acquisition(
    stream: StreamKind,
    source: Arc<dyn CaptureSource>,
    mut composer: FrameComposer,
    shutdown: Shutdown,
    wait: Duration,
) -> JoinHandle<ComposerStats> {
    std::thread::spawn(move || {
        log::info!("{}: acquisition started ({})", composer.name(), stream.name());
        let mut last_health = Instant::now();
        while !shutdown.is_triggered() {
            match source.get_within(stream, wait) {
                Ok(Some(frame)) => {
                    if let ComposeOutcome::Failed(err) = composer.ingest(frame) {
                        log::warn!("{}: detection failed: {}", composer.name(), err);
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    log::error!("{}: {} stream error: {:#}", composer.name(), stream.name(), err);
                    std::thread::sleep(ERROR_BACKOFF);
                }
            }

            if last_health.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = composer.stats();
                log::info!(
                    "{}: frames={} detector_runs={} failures={} reuses={} stale={}",
                    composer.name(),
                    stats.frames_ingested,
                    stats.detector_runs,
                    stats.detector_failures,
                    stats.cache_reuses,
                    stats.stale_skips
                );
                last_health = Instant::now();
            }
        }
        log::info!("{}: acquisition stopped", composer.name());
        composer.stats()
    })
}
