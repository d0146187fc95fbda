use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

/// Counters of the upload shell, reset whenever they are logged.
#[derive(Default)]
pub struct Meter {
    uploads: AtomicU64,
    detections: AtomicU64,
    failures: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            uploads: AtomicU64::new(0),
            detections: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn tick_upload(&self) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_detection(&self) {
        self.detections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take `(uploads, detections, failures)` and reset the counters.
    pub fn get_reset(&self) -> (u64, u64, u64) {
        (
            self.uploads.swap(0, Ordering::Relaxed),
            self.detections.swap(0, Ordering::Relaxed),
            self.failures.swap(0, Ordering::Relaxed),
        )
    }
}

pub fn spawn_meter_logger(period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut log_interval = interval(period);
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let (uploads, detections, failures) = METER.get_reset();
            if uploads + detections + failures == 0 {
                continue;
            }

            let elapsed = start.elapsed().as_secs_f32();
            log::info!(
                "{uploads} uploads, {detections} detections, {failures} failures in {elapsed:.1}s"
            );
        }
    })
}
