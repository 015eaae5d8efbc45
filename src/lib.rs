pub mod capture;
pub mod display;
pub mod error;
pub mod host;
pub mod pipeline;
pub mod utils;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::capture::{CaptureParams, Control, FrameFormat};
use crate::error::ConfigError;

pub use crate::host::{HostOperator, OutputSize, ParameterRegistry};
pub use crate::pipeline::DepthPipeline;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Prefix for environment overrides, e.g. `DEPTHPIPE_CAPTURE__WIDTH=320`
pub const ENV_PREFIX: &str = "DEPTHPIPE";

/// System configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub params: CaptureParams,
    pub pipeline: PipelineConfig,
    pub display: DisplayConfig,
}

/// Which driver backs the depth device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Simulated,
    V4l2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub backend: Backend,
    /// Device node; empty selects the first enumerated device
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub fps: u32,
    /// Upper bound on one blocking acquire, and so on stop latency
    pub acquire_timeout_ms: u64,
    /// CPU core to pin the acquisition thread to
    pub pin_core: Option<usize>,
    /// Metres per raw Z16 unit
    pub depth_scale: f32,
    /// V4L2 control ids for the capture controls the node exposes
    pub v4l2_controls: HashMap<Control, u32>,
}

impl CaptureConfig {
    pub fn format(&self) -> FrameFormat {
        FrameFormat::new(self.width, self.height, self.channels)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Push parameter changes to the device every N render ticks
    pub param_poll_interval: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            params: CaptureParams::default(),
            pipeline: PipelineConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Simulated,
            device: String::new(),
            width: 640,
            height: 480,
            channels: 1,
            fps: 30,
            acquire_timeout_ms: 100,
            pin_core: None,
            depth_scale: 0.001,
            v4l2_controls: HashMap::new(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            param_poll_interval: 10,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 60,
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `DEPTHPIPE_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        let capture = &self.capture;

        if capture.width == 0 || capture.height == 0 {
            return invalid(format!(
                "capture resolution {}x{} is empty",
                capture.width, capture.height
            ));
        }
        if !(1..=4).contains(&capture.channels) {
            return invalid(format!("capture.channels must be 1-4, got {}", capture.channels));
        }
        if capture.fps == 0 {
            return invalid("capture.fps must be positive".into());
        }
        if capture.acquire_timeout_ms == 0 {
            return invalid("capture.acquire_timeout_ms must be positive".into());
        }
        if self.pipeline.param_poll_interval == 0 {
            return invalid("pipeline.param_poll_interval must be positive".into());
        }
        if self.display.fps == 0 {
            return invalid("display.fps must be positive".into());
        }
        if let Some((control, value)) = self.params.out_of_range() {
            return invalid(format!("{} value {} is out of range", control, value));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.format().byte_size(), 1_228_800);
        assert_eq!(config.pipeline.param_poll_interval, 10);
    }

    #[test]
    fn load_without_file_yields_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.capture.width, 640);
        assert_eq!(config.capture.backend, Backend::Simulated);
        assert_eq!(config.params, CaptureParams::default());
    }

    #[test]
    fn load_layers_file_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[capture]
width = 320
height = 240
acquire_timeout_ms = 50

[params]
laser_power = 4

[pipeline]
param_poll_interval = 5
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.capture.format(), FrameFormat::depth(320, 240));
        assert_eq!(config.capture.acquire_timeout(), Duration::from_millis(50));
        assert_eq!(config.params.laser_power, 4);
        assert_eq!(config.params.accuracy, 1);
        assert_eq!(config.pipeline.param_poll_interval, 5);
        assert_eq!(config.display.fps, 60);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = Config::default();
        config.capture.height = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.pipeline.param_poll_interval = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.params.accuracy = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn global_config_can_be_swapped() {
        let mut config = Config::default();
        config.display.fps = 24;
        CONFIG.store(std::sync::Arc::new(config));
        assert_eq!(CONFIG.load().display.fps, 24);
        CONFIG.store(std::sync::Arc::new(Config::default()));
    }
}
