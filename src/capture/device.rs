//! Hardware seam between the pipeline and a physical depth sensor

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::{Control, FrameFormat};
use crate::error::{AcquireError, DeviceError};

/// Identity of a depth device as reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
}

impl DeviceInfo {
    pub fn new(path: impl Into<String>, name: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            driver: driver.into(),
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.path, self.driver)
    }
}

/// A depth sensor driver.
///
/// Implementations must tolerate `control`/`set_control` being called from the
/// render thread while another thread sits in `acquire_frame`. Frame calls are
/// only ever made from the acquisition thread, strictly paired as
/// `acquire_frame` → `with_depth_plane`* → `release_frame`.
pub trait DepthDevice: Send + Sync {
    fn info(&self) -> &DeviceInfo;

    /// Negotiate a single depth stream in `format`.
    fn enable_stream(&self, format: FrameFormat) -> Result<(), DeviceError>;

    /// Block until the next frame is available or `timeout` elapses.
    fn acquire_frame(&self, timeout: Duration) -> Result<(), AcquireError>;

    /// Hand the depth plane of the currently acquired frame to `f`.
    fn with_depth_plane(&self, f: &mut dyn FnMut(&[f32])) -> Result<(), AcquireError>;

    /// Give the acquired frame back to the driver.
    fn release_frame(&self);

    fn control(&self, control: Control) -> Result<i32, DeviceError>;

    fn set_control(&self, control: Control, value: i32) -> Result<(), DeviceError>;

    /// Stop streaming. Called once when the owning session is dropped.
    fn close(&self) {}
}
