//! Error types shared across the capture and pipeline layers

use std::time::Duration;

use thiserror::Error;

use crate::capture::Control;

/// Failures while opening or configuring a depth device
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no depth device found matching {0:?}")]
    NotFound(String),

    #[error("failed to open depth device {device}: {reason}")]
    Open { device: String, reason: String },

    #[error("depth stream {width}x{height} could not be enabled: {reason}")]
    StreamSetup {
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("control {0} is not supported by this device")]
    Unsupported(Control),

    #[error("control {control} rejected value {value}: {reason}")]
    Control {
        control: Control,
        value: i32,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcome of a single blocking acquire that did not yield a frame
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AcquireError {
    #[error("no frame within {0:?}")]
    Timeout(Duration),

    #[error("frame acquired without a depth plane")]
    NoSample,

    #[error("device can no longer produce frames: {0}")]
    DeviceLost(String),
}

impl AcquireError {
    /// Terminal errors end the acquisition loop; everything else is retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AcquireError::DeviceLost(_))
    }
}

/// Rejected writes into the frame buffer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("depth plane has {actual} samples, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Configuration loading and validation failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_device_lost_is_terminal() {
        assert!(AcquireError::DeviceLost("unplugged".into()).is_terminal());
        assert!(!AcquireError::Timeout(Duration::from_millis(5)).is_terminal());
        assert!(!AcquireError::NoSample.is_terminal());
    }

    #[test]
    fn messages_carry_context() {
        let err = FrameError::SizeMismatch {
            expected: 4,
            actual: 3,
        };
        assert_eq!(err.to_string(), "depth plane has 3 samples, expected 4");

        let err = DeviceError::Unsupported(Control::LaserPower);
        assert_eq!(
            err.to_string(),
            "control laser power is not supported by this device"
        );
    }
}
