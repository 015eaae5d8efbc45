//! The producer side: pull frames off the device into the frame buffer

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::utils::CachePadded;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::capture::DeviceSession;
use crate::error::AcquireError;
use crate::pipeline::frame_buffer::FrameBuffer;
use crate::pipeline::lifecycle::StateFlag;

/// Why the acquisition loop returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    StopRequested,
    DeviceLost(String),
}

#[derive(Default)]
struct Counters {
    frames_acquired: AtomicU64,
    misses: AtomicU64,
    copy_failures: AtomicU64,
}

/// Counters written by the acquisition thread, read from anywhere
#[derive(Default)]
pub struct AcquisitionStats {
    counters: CachePadded<Counters>,
}

/// Point-in-time copy of [`AcquisitionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_acquired: u64,
    pub misses: u64,
    pub copy_failures: u64,
}

impl AcquisitionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_acquired: self.counters.frames_acquired.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            copy_failures: self.counters.copy_failures.load(Ordering::Relaxed),
        }
    }

    fn frame(&self) {
        self.counters.frames_acquired.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("depth_frames_acquired").increment(1);
    }

    fn miss(&self) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("depth_acquire_misses").increment(1);
    }

    fn copy_failure(&self) {
        self.counters.copy_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("depth_copy_failures").increment(1);
    }
}

fn device_lost(e: AcquireError) -> LoopExit {
    error!("Depth device failed, acquisition stopped: {}", e);
    match e {
        AcquireError::DeviceLost(reason) => LoopExit::DeviceLost(reason),
        other => LoopExit::DeviceLost(other.to_string()),
    }
}

/// Run until `state` leaves `Running` or the device is lost.
///
/// Each pass blocks on the device for at most `timeout`, so a stop request
/// is observed within one timeout.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64))]
pub fn run(
    session: &DeviceSession,
    buffer: &FrameBuffer,
    state: &StateFlag,
    stats: &AcquisitionStats,
    timeout: Duration,
) -> LoopExit {
    info!("Acquisition loop running");

    while state.is_running() {
        let lease = match session.next_frame(timeout) {
            Ok(lease) => lease,
            Err(e) if e.is_terminal() => return device_lost(e),
            Err(e) => {
                trace!("Acquire miss: {}", e);
                stats.miss();
                continue;
            }
        };

        match lease.with_depth_plane(|plane| buffer.publish(plane)) {
            Ok(Ok(sequence)) => {
                trace!(sequence, "Frame published");
                stats.frame();
            }
            Ok(Err(e)) => {
                warn!("Dropped frame: {}", e);
                stats.copy_failure();
            }
            Err(e) if e.is_terminal() => return device_lost(e),
            Err(e) => {
                debug!("Frame without depth data: {}", e);
                stats.miss();
            }
        }
        // lease drops here, releasing the device frame on every path, returns included
    }

    info!("Acquisition loop stopping");
    LoopExit::StopRequested
}
