//! Owned connection to one depth sensor

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::capture::{CaptureParams, Control, DepthDevice, FrameFormat};
use crate::error::{AcquireError, DeviceError};

/// An open depth stream on exactly one device
pub struct DeviceSession {
    device: Arc<dyn DepthDevice>,
    format: FrameFormat,
}

impl DeviceSession {
    /// Enable the depth stream on `device` at `format`
    #[instrument(skip(device), fields(sensor = %device.info()))]
    pub fn open(device: Arc<dyn DepthDevice>, format: FrameFormat) -> Result<Self, DeviceError> {
        device.enable_stream(format)?;
        info!(
            width = format.width,
            height = format.height,
            channels = format.channels,
            "Depth stream enabled"
        );
        Ok(Self { device, format })
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Block for the next frame. Dropping the lease releases it back to the driver.
    pub fn next_frame(&self, timeout: Duration) -> Result<FrameLease<'_>, AcquireError> {
        self.device.acquire_frame(timeout)?;
        Ok(FrameLease {
            device: &*self.device,
        })
    }

    /// Write `value` unless the device already reports it.
    ///
    /// Returns `Ok(true)` when a device write happened.
    pub fn set_control(&self, control: Control, value: i32) -> Result<bool, DeviceError> {
        let value = control.clamp(value);
        let current = self.device.control(control)?;
        if current == value {
            return Ok(false);
        }
        self.device.set_control(control, value)?;
        debug!(%control, from = current, to = value, "Control updated");
        Ok(true)
    }

    /// Push every capture parameter, returning the number of device writes
    pub fn apply_params(&self, params: &CaptureParams) -> usize {
        Control::ALL
            .into_iter()
            .filter(|&control| match self.set_control(control, params.get(control)) {
                Ok(written) => written,
                Err(e) => {
                    warn!(%control, "Failed to apply control: {}", e);
                    false
                }
            })
            .count()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.device.close();
        info!(device = %self.device.info(), "Depth session closed");
    }
}

/// A frame held by the driver between acquire and release
pub struct FrameLease<'a> {
    device: &'a dyn DepthDevice,
}

impl FrameLease<'_> {
    /// Run `f` over the depth plane of this frame
    pub fn with_depth_plane<R>(&self, f: impl FnOnce(&[f32]) -> R) -> Result<R, AcquireError> {
        let mut f = Some(f);
        let mut out = None;
        self.device.with_depth_plane(&mut |plane: &[f32]| {
            if let Some(f) = f.take() {
                out = Some(f(plane));
            }
        })?;
        out.ok_or(AcquireError::NoSample)
    }
}

impl Drop for FrameLease<'_> {
    fn drop(&mut self) {
        self.device.release_frame();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SimulatedSensor;

    fn open_sim() -> (Arc<SimulatedSensor>, crate::capture::SensorFeed, DeviceSession) {
        let format = FrameFormat::depth(4, 2);
        let (sensor, feed) = SimulatedSensor::fed(format);
        let sensor = Arc::new(sensor);
        let session = DeviceSession::open(sensor.clone(), format).unwrap();
        (sensor, feed, session)
    }

    #[test]
    fn setter_short_circuits_on_current_value() {
        let (sensor, _feed, session) = open_sim();
        let current = sensor.control(Control::LaserPower).unwrap();

        assert!(!session.set_control(Control::LaserPower, current).unwrap());
        assert!(sensor.control_writes().is_empty());
    }

    #[test]
    fn setter_writes_new_value_exactly_once() {
        let (sensor, _feed, session) = open_sim();

        assert!(session.set_control(Control::LaserPower, 3).unwrap());
        assert!(!session.set_control(Control::LaserPower, 3).unwrap());
        assert_eq!(sensor.control_writes(), vec![(Control::LaserPower, 3)]);
    }

    #[test]
    fn setter_clamps_before_comparing() {
        let (sensor, _feed, session) = open_sim();

        assert!(session.set_control(Control::Accuracy, 99).unwrap());
        assert_eq!(sensor.control(Control::Accuracy).unwrap(), 3);
        assert!(!session.set_control(Control::Accuracy, 42).unwrap());
        assert_eq!(sensor.control_writes().len(), 1);
    }

    #[test]
    fn apply_params_only_writes_changes() {
        let (sensor, _feed, session) = open_sim();

        assert_eq!(session.apply_params(&CaptureParams::default()), 0);

        let params = CaptureParams {
            filter_option: 6,
            color_auto_exposure: false,
            ..CaptureParams::default()
        };
        assert_eq!(session.apply_params(&params), 2);
        assert_eq!(session.apply_params(&params), 0);
        assert_eq!(
            sensor.control_writes(),
            vec![(Control::FilterOption, 6), (Control::ColorAutoExposure, 0)]
        );
    }

    #[test]
    fn lease_drop_releases_frame() {
        let (sensor, feed, session) = open_sim();
        feed.push_fill(session.format(), 1.5);

        {
            let lease = session.next_frame(Duration::from_millis(100)).unwrap();
            let sum = lease.with_depth_plane(|p| p.iter().sum::<f32>()).unwrap();
            assert_eq!(sum, 12.0);
            assert_eq!(sensor.released_frames(), 0);
        }
        assert_eq!(sensor.released_frames(), 1);
    }

    #[test]
    fn dropping_session_closes_device() {
        let (sensor, _feed, session) = open_sim();
        assert!(!sensor.is_closed());
        drop(session);
        assert!(sensor.is_closed());
    }
}
