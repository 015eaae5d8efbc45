use tracing::debug;

use crate::capture::DeviceInfo;
use crate::{Backend, CaptureConfig};

/// Highest `/dev/videoN` index probed during enumeration
const MAX_VIDEO_NODES: u32 = 10;

/// List the depth devices the configured backend can open
pub fn enumerate_devices(config: &CaptureConfig) -> Vec<DeviceInfo> {
    match config.backend {
        Backend::Simulated => vec![DeviceInfo::new("sim:0", "Simulated depth sensor", "sim")],
        Backend::V4l2 => scan_video_nodes(),
    }
}

#[cfg(feature = "v4l2")]
fn scan_video_nodes() -> Vec<DeviceInfo> {
    use std::path::Path;
    use v4l::{capability::Flags, video::Capture, Device, FourCC};

    let z16 = FourCC::new(b"Z16 ");
    let mut found = Vec::new();

    for i in 0..MAX_VIDEO_NODES {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            debug!("Skipping {}: cannot open", path);
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        // Only nodes streaming 16-bit depth
        let has_depth = dev
            .enum_formats()
            .map(|formats| formats.iter().any(|f| f.fourcc == z16))
            .unwrap_or(false);
        if has_depth {
            found.push(DeviceInfo::new(path, caps.card, caps.driver));
        }
    }

    found
}

#[cfg(not(feature = "v4l2"))]
fn scan_video_nodes() -> Vec<DeviceInfo> {
    debug!(
        nodes = MAX_VIDEO_NODES,
        "Built without the v4l2 feature, not scanning video nodes"
    );
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_backend_lists_one_device() {
        let devices = enumerate_devices(&CaptureConfig::default());
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].path, "sim:0");
        assert_eq!(devices[0].driver, "sim");
    }

    #[cfg(not(feature = "v4l2"))]
    #[test]
    fn v4l2_backend_without_feature_lists_nothing() {
        let config = CaptureConfig {
            backend: Backend::V4l2,
            ..CaptureConfig::default()
        };
        assert!(enumerate_devices(&config).is_empty());
    }
}
