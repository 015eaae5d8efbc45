//! UVC depth capture through V4L2 memory-mapped streaming

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::control::{Control as V4lControl, Value};
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::{Control, DepthDevice, DeviceInfo, FrameFormat};
use crate::error::{AcquireError, DeviceError};
use crate::CaptureConfig;

/// 16-bit little-endian depth, as exposed by RealSense-style UVC nodes
pub const Z16: [u8; 4] = *b"Z16 ";

const BUFFER_COUNT: u32 = 4;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Depth sensor on a V4L2 capture node
pub struct V4l2DepthSensor {
    info: DeviceInfo,
    device: Device,
    stream: Mutex<Option<MmapStream<'static>>>,
    /// Acquisition-side copy of the last dequeued frame, converted to metres
    staging: Mutex<Vec<f32>>,
    has_frame: AtomicBool,
    /// Samples per row and bytes per row of the negotiated format
    width: AtomicUsize,
    stride: AtomicUsize,
    depth_scale: f32,
    control_ids: HashMap<Control, u32>,
}

impl V4l2DepthSensor {
    pub fn open(path: &str, config: &CaptureConfig) -> Result<Self, DeviceError> {
        let device = Device::with_path(path).map_err(|e| DeviceError::Open {
            device: path.to_string(),
            reason: e.to_string(),
        })?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(DeviceError::Open {
                device: path.to_string(),
                reason: "device doesn't support video capture".into(),
            });
        }

        Ok(Self {
            info: DeviceInfo::new(path, caps.card, caps.driver),
            device,
            stream: Mutex::new(None),
            staging: Mutex::new(Vec::new()),
            has_frame: AtomicBool::new(false),
            width: AtomicUsize::new(0),
            stride: AtomicUsize::new(0),
            depth_scale: config.depth_scale,
            control_ids: config.v4l2_controls.clone(),
        })
    }

    fn control_id(&self, control: Control) -> Result<u32, DeviceError> {
        self.control_ids
            .get(&control)
            .copied()
            .ok_or(DeviceError::Unsupported(control))
    }
}

/// Convert Z16 rows of `stride` bytes into metres, `width` samples per row.
///
/// Returns false if `src` is too short for `dst`.
fn convert_z16(src: &[u8], width: usize, stride: usize, scale: f32, dst: &mut [f32]) -> bool {
    if width == 0 || dst.is_empty() {
        return false;
    }
    let rows = dst.len() / width;
    let needed = (rows - 1) * stride + width * 2;
    if src.len() < needed {
        return false;
    }
    for (row, out) in dst.chunks_exact_mut(width).enumerate() {
        let line = &src[row * stride..row * stride + width * 2];
        for (d, px) in out.iter_mut().zip(line.chunks_exact(2)) {
            *d = f32::from(u16::from_le_bytes([px[0], px[1]])) * scale;
        }
    }
    true
}

impl DepthDevice for V4l2DepthSensor {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    #[instrument(skip(self), fields(device = %self.info.path))]
    fn enable_stream(&self, format: FrameFormat) -> Result<(), DeviceError> {
        let stream_error = |reason: String| DeviceError::StreamSetup {
            width: format.width,
            height: format.height,
            reason,
        };
        if format.channels != 1 {
            return Err(stream_error("Z16 streams carry a single channel".into()));
        }

        let mut fmt = self.device.format()?;
        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = FourCC::new(&Z16);
        let applied = self.device.set_format(&fmt)?;
        if applied.fourcc != fmt.fourcc
            || applied.width != format.width
            || applied.height != format.height
        {
            return Err(stream_error(format!(
                "driver negotiated {} {}x{}",
                applied.fourcc, applied.width, applied.height
            )));
        }

        let row_bytes = format.width as usize * 2;
        let stride = (applied.stride as usize).max(row_bytes);
        self.width.store(format.width as usize, Ordering::Release);
        self.stride.store(stride, Ordering::Release);

        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, BUFFER_COUNT)?;
        *lock(&self.stream) = Some(stream);
        *lock(&self.staging) = vec![0.0; format.sample_count()];
        info!(stride, "Capture stream started with {} buffers", BUFFER_COUNT);
        Ok(())
    }

    fn acquire_frame(&self, timeout: Duration) -> Result<(), AcquireError> {
        let mut stream = lock(&self.stream);
        let stream = stream
            .as_mut()
            .ok_or_else(|| AcquireError::DeviceLost("stream not started".into()))?;
        stream.set_timeout(timeout);

        let buf = match stream.next() {
            Ok((buf, _meta)) => buf,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                return Err(AcquireError::Timeout(timeout))
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                return Err(AcquireError::NoSample)
            }
            Err(e) => return Err(AcquireError::DeviceLost(e.to_string())),
        };

        let mut staging = lock(&self.staging);
        let width = self.width.load(Ordering::Acquire);
        let stride = self.stride.load(Ordering::Acquire);
        if !convert_z16(buf, width, stride, self.depth_scale, &mut staging) {
            warn!(bytes = buf.len(), stride, "Short depth buffer");
            return Err(AcquireError::NoSample);
        }
        self.has_frame.store(true, Ordering::Release);
        Ok(())
    }

    fn with_depth_plane(&self, f: &mut dyn FnMut(&[f32])) -> Result<(), AcquireError> {
        if !self.has_frame.load(Ordering::Acquire) {
            return Err(AcquireError::NoSample);
        }
        f(&lock(&self.staging));
        Ok(())
    }

    fn release_frame(&self) {
        // The mmap buffer is requeued by the next dequeue; only the staging copy is retired.
        self.has_frame.store(false, Ordering::Release);
    }

    fn control(&self, control: Control) -> Result<i32, DeviceError> {
        let id = self.control_id(control)?;
        match self.device.control(id)?.value {
            Value::Integer(v) => Ok(v as i32),
            Value::Boolean(b) => Ok(b as i32),
            other => Err(DeviceError::Control {
                control,
                value: 0,
                reason: format!("unexpected control value {:?}", other),
            }),
        }
    }

    fn set_control(&self, control: Control, value: i32) -> Result<(), DeviceError> {
        let id = self.control_id(control)?;
        let value = match control {
            Control::ColorAutoExposure | Control::ColorAutoWhiteBalance => {
                Value::Boolean(value != 0)
            }
            _ => Value::Integer(i64::from(value)),
        };
        self.device.set_control(V4lControl { id, value })?;
        Ok(())
    }

    fn close(&self) {
        lock(&self.stream).take();
        self.has_frame.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_rows_are_skipped() {
        // 2x2 frame, 6-byte stride: 4 bytes of samples plus 2 of padding per row
        let src = [1, 0, 2, 0, 0xff, 0xff, 3, 0, 4, 0];
        let mut dst = [0.0; 4];
        assert!(convert_z16(&src, 2, 6, 0.5, &mut dst));
        assert_eq!(dst, [0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn packed_rows_convert_in_order() {
        let src = 1000u16
            .to_le_bytes()
            .into_iter()
            .chain(65535u16.to_le_bytes())
            .collect::<Vec<_>>();
        let mut dst = [0.0; 2];
        assert!(convert_z16(&src, 2, 4, 0.001, &mut dst));
        assert!((dst[0] - 1.0).abs() < 1e-6);
        assert!((dst[1] - 65.535).abs() < 1e-3);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut dst = [0.0; 4];
        assert!(!convert_z16(&[0; 9], 2, 6, 1.0, &mut dst));
    }
}
