pub mod controls;
pub mod device;
pub mod frame;
pub mod session;
pub mod sim;
#[cfg(feature = "v4l2")]
pub mod v4l2;

use std::sync::Arc;

pub use controls::{CaptureParams, Control, ControlKind};
pub use device::{DepthDevice, DeviceInfo};
pub use frame::{FrameFormat, FrameMetadata};
pub use session::{DeviceSession, FrameLease};
pub use sim::{SensorFeed, SimulatedSensor};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2DepthSensor;

pub use crate::utils::enumerate_devices;

use crate::error::DeviceError;
use crate::{Backend, CaptureConfig};

/// Open the device selected by `config`
pub fn open_device(config: &CaptureConfig) -> Result<Arc<dyn DepthDevice>, DeviceError> {
    match config.backend {
        Backend::Simulated => Ok(Arc::new(SimulatedSensor::synthetic(
            config.format(),
            config.fps,
        ))),
        #[cfg(feature = "v4l2")]
        Backend::V4l2 => {
            let path = if config.device.is_empty() {
                enumerate_devices(config)
                    .into_iter()
                    .next()
                    .map(|d| d.path)
                    .ok_or_else(|| DeviceError::NotFound("Z16 capture node".into()))?
            } else {
                config.device.clone()
            };
            Ok(Arc::new(V4l2DepthSensor::open(&path, config)?))
        }
        #[cfg(not(feature = "v4l2"))]
        Backend::V4l2 => Err(DeviceError::Open {
            device: config.device.clone(),
            reason: "built without the v4l2 feature".into(),
        }),
    }
}
