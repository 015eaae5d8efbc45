//! Software depth sensor used for demos and tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::trace;

use crate::capture::{Control, DepthDevice, DeviceInfo, FrameFormat};
use crate::error::{AcquireError, DeviceError};

enum FeedEvent {
    Frame(Vec<f32>),
    Empty,
    Lost(String),
}

/// Producer side of a fed [`SimulatedSensor`]
#[derive(Clone)]
pub struct SensorFeed {
    tx: Sender<FeedEvent>,
}

impl SensorFeed {
    /// Queue one frame. Returns false once the sensor is gone.
    pub fn push(&self, samples: Vec<f32>) -> bool {
        self.tx.send(FeedEvent::Frame(samples)).is_ok()
    }

    /// Queue a frame with every sample set to `value`
    pub fn push_fill(&self, format: FrameFormat, value: f32) -> bool {
        self.push(vec![value; format.sample_count()])
    }

    /// Queue a frame that arrives without a depth plane
    pub fn push_empty(&self) -> bool {
        self.tx.send(FeedEvent::Empty).is_ok()
    }

    /// Make the next acquire report a hard device failure
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.tx.send(FeedEvent::Lost(reason.into())).is_ok()
    }
}

struct Synthetic {
    period: Duration,
    next_frame_at: Instant,
    phase: u32,
}

enum Source {
    Feed(Receiver<FeedEvent>),
    Synthetic(Mutex<Synthetic>),
}

/// A depth sensor backed by a channel or a synthetic ramp generator
pub struct SimulatedSensor {
    info: DeviceInfo,
    native: FrameFormat,
    source: Source,
    current: Mutex<Option<Vec<f32>>>,
    controls: Mutex<HashMap<Control, i32>>,
    writes: Mutex<Vec<(Control, i32)>>,
    acquired: AtomicU64,
    released: AtomicU64,
    closed: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedSensor {
    fn with_source(native: FrameFormat, source: Source, path: &str) -> Self {
        let controls = Control::ALL
            .into_iter()
            .map(|c| (c, c.default_value()))
            .collect();
        Self {
            info: DeviceInfo::new(path, "Simulated depth sensor", "sim"),
            native,
            source,
            current: Mutex::new(None),
            controls: Mutex::new(controls),
            writes: Mutex::new(Vec::new()),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Sensor that yields exactly the frames pushed through the returned feed.
    ///
    /// Dropping every feed handle makes the sensor report a lost device.
    pub fn fed(native: FrameFormat) -> (Self, SensorFeed) {
        let (tx, rx) = flume::unbounded();
        let sensor = Self::with_source(native, Source::Feed(rx), "sim:feed");
        (sensor, SensorFeed { tx })
    }

    /// Sensor that renders a moving depth ramp at `fps`
    pub fn synthetic(native: FrameFormat, fps: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
        let source = Source::Synthetic(Mutex::new(Synthetic {
            period,
            next_frame_at: Instant::now() + period,
            phase: 0,
        }));
        Self::with_source(native, source, "sim:0")
    }

    /// Every control write the device received, in order
    pub fn control_writes(&self) -> Vec<(Control, i32)> {
        lock(&self.writes).clone()
    }

    pub fn acquired_frames(&self) -> u64 {
        self.acquired.load(Ordering::Acquire)
    }

    pub fn released_frames(&self) -> u64 {
        self.released.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn next_fed(
        &self,
        rx: &Receiver<FeedEvent>,
        timeout: Duration,
    ) -> Result<Option<Vec<f32>>, AcquireError> {
        match rx.recv_timeout(timeout) {
            Ok(FeedEvent::Frame(samples)) => Ok(Some(samples)),
            Ok(FeedEvent::Empty) => Ok(None),
            Ok(FeedEvent::Lost(reason)) => Err(AcquireError::DeviceLost(reason)),
            Err(RecvTimeoutError::Timeout) => Err(AcquireError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(AcquireError::DeviceLost("sensor feed disconnected".into()))
            }
        }
    }

    fn next_synthetic(
        &self,
        state: &Mutex<Synthetic>,
        timeout: Duration,
    ) -> Result<Vec<f32>, AcquireError> {
        let mut state = lock(state);
        let wait = state.next_frame_at.saturating_duration_since(Instant::now());
        if wait > timeout {
            std::thread::sleep(timeout);
            return Err(AcquireError::Timeout(timeout));
        }
        std::thread::sleep(wait);
        let period = state.period;
        state.next_frame_at += period;
        state.phase = state.phase.wrapping_add(1);
        let phase = state.phase;
        drop(state);

        let FrameFormat {
            width,
            height,
            channels,
        } = self.native;
        let mut samples = Vec::with_capacity(self.native.sample_count());
        for y in 0..height {
            for x in 0..width {
                let ramp = (x + y).wrapping_add(phase) % width.max(1);
                let depth = 0.5 + 4.0 * ramp as f32 / width.max(1) as f32;
                samples.extend(std::iter::repeat(depth).take(channels as usize));
            }
        }
        Ok(samples)
    }
}

impl DepthDevice for SimulatedSensor {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn enable_stream(&self, format: FrameFormat) -> Result<(), DeviceError> {
        if format != self.native {
            return Err(DeviceError::StreamSetup {
                width: format.width,
                height: format.height,
                reason: format!(
                    "sensor only streams {}x{}x{}",
                    self.native.width, self.native.height, self.native.channels
                ),
            });
        }
        Ok(())
    }

    fn acquire_frame(&self, timeout: Duration) -> Result<(), AcquireError> {
        let frame = match &self.source {
            Source::Feed(rx) => self.next_fed(rx, timeout)?,
            Source::Synthetic(state) => Some(self.next_synthetic(state, timeout)?),
        };
        *lock(&self.current) = frame;
        let n = self.acquired.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(frame = n, "Simulated frame acquired");
        Ok(())
    }

    fn with_depth_plane(&self, f: &mut dyn FnMut(&[f32])) -> Result<(), AcquireError> {
        match lock(&self.current).as_deref() {
            Some(plane) => {
                f(plane);
                Ok(())
            }
            None => Err(AcquireError::NoSample),
        }
    }

    fn release_frame(&self) {
        lock(&self.current).take();
        self.released.fetch_add(1, Ordering::AcqRel);
    }

    fn control(&self, control: Control) -> Result<i32, DeviceError> {
        Ok(lock(&self.controls)
            .get(&control)
            .copied()
            .unwrap_or_else(|| control.default_value()))
    }

    fn set_control(&self, control: Control, value: i32) -> Result<(), DeviceError> {
        if !control.contains(value) {
            return Err(DeviceError::Control {
                control,
                value,
                reason: "out of range".into(),
            });
        }
        lock(&self.controls).insert(control, value);
        lock(&self.writes).push((control, value));
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
