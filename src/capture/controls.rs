//! Runtime-adjustable capture controls and their ranges

use std::fmt;

use serde::{Deserialize, Serialize};

/// A depth camera knob that can be changed while streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    Accuracy,
    LaserPower,
    FilterOption,
    MotionRangeTradeoff,
    ColorAutoExposure,
    ColorAutoWhiteBalance,
}

/// Value domain of a control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Int { min: i32, max: i32, default: i32 },
    Toggle { default: bool },
}

impl ControlKind {
    pub fn default_value(self) -> i32 {
        match self {
            ControlKind::Int { default, .. } => default,
            ControlKind::Toggle { default } => default as i32,
        }
    }

    /// Clamp a raw value into the domain. Toggles map any non-zero value to 1.
    pub fn clamp(self, value: i32) -> i32 {
        match self {
            ControlKind::Int { min, max, .. } => value.clamp(min, max),
            ControlKind::Toggle { .. } => (value != 0) as i32,
        }
    }
}

impl Control {
    pub const ALL: [Control; 6] = [
        Control::Accuracy,
        Control::LaserPower,
        Control::FilterOption,
        Control::MotionRangeTradeoff,
        Control::ColorAutoExposure,
        Control::ColorAutoWhiteBalance,
    ];

    pub fn kind(self) -> ControlKind {
        match self {
            Control::Accuracy => ControlKind::Int {
                min: 1,
                max: 3,
                default: 1,
            },
            Control::LaserPower => ControlKind::Int {
                min: 0,
                max: 16,
                default: 10,
            },
            Control::FilterOption => ControlKind::Int {
                min: 0,
                max: 7,
                default: 4,
            },
            Control::MotionRangeTradeoff => ControlKind::Int {
                min: 0,
                max: 100,
                default: 10,
            },
            Control::ColorAutoExposure | Control::ColorAutoWhiteBalance => {
                ControlKind::Toggle { default: true }
            }
        }
    }

    /// Parameter name as registered with the host
    pub fn par_name(self) -> &'static str {
        match self {
            Control::Accuracy => "Accuracy",
            Control::LaserPower => "Laserpower",
            Control::FilterOption => "Filteroption",
            Control::MotionRangeTradeoff => "Motiontradeoff",
            Control::ColorAutoExposure => "Colorautoexp",
            Control::ColorAutoWhiteBalance => "Colorautowb",
        }
    }

    /// Human readable label shown next to the parameter
    pub fn label(self) -> &'static str {
        match self {
            Control::Accuracy => "Accuracy",
            Control::LaserPower => "Laser power",
            Control::FilterOption => "Filter option",
            Control::MotionRangeTradeoff => "Motion tradeoff",
            Control::ColorAutoExposure => "Color auto exp",
            Control::ColorAutoWhiteBalance => "Auto white balance",
        }
    }

    pub fn default_value(self) -> i32 {
        self.kind().default_value()
    }

    pub fn clamp(self, value: i32) -> i32 {
        self.kind().clamp(value)
    }

    pub fn contains(self, value: i32) -> bool {
        self.clamp(value) == value
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Control::Accuracy => "accuracy",
            Control::LaserPower => "laser power",
            Control::FilterOption => "filter option",
            Control::MotionRangeTradeoff => "motion/range tradeoff",
            Control::ColorAutoExposure => "color auto-exposure",
            Control::ColorAutoWhiteBalance => "color auto-white-balance",
        };
        f.write_str(name)
    }
}

/// Desired values for every capture control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureParams {
    pub accuracy: i32,
    pub laser_power: i32,
    pub filter_option: i32,
    pub motion_range_tradeoff: i32,
    pub color_auto_exposure: bool,
    pub color_auto_white_balance: bool,
}

impl CaptureParams {
    pub fn get(&self, control: Control) -> i32 {
        match control {
            Control::Accuracy => self.accuracy,
            Control::LaserPower => self.laser_power,
            Control::FilterOption => self.filter_option,
            Control::MotionRangeTradeoff => self.motion_range_tradeoff,
            Control::ColorAutoExposure => self.color_auto_exposure as i32,
            Control::ColorAutoWhiteBalance => self.color_auto_white_balance as i32,
        }
    }

    pub fn set(&mut self, control: Control, value: i32) {
        let value = control.clamp(value);
        match control {
            Control::Accuracy => self.accuracy = value,
            Control::LaserPower => self.laser_power = value,
            Control::FilterOption => self.filter_option = value,
            Control::MotionRangeTradeoff => self.motion_range_tradeoff = value,
            Control::ColorAutoExposure => self.color_auto_exposure = value != 0,
            Control::ColorAutoWhiteBalance => self.color_auto_white_balance = value != 0,
        }
    }

    /// First control whose value lies outside its range
    pub fn out_of_range(&self) -> Option<(Control, i32)> {
        Control::ALL
            .into_iter()
            .map(|c| (c, self.get(c)))
            .find(|&(c, v)| !c.contains(v))
    }
}

impl Default for CaptureParams {
    fn default() -> Self {
        let mut params = Self {
            accuracy: 0,
            laser_power: 0,
            filter_option: 0,
            motion_range_tradeoff: 0,
            color_auto_exposure: false,
            color_auto_white_balance: false,
        };
        for control in Control::ALL {
            params.set(control, control.default_value());
        }
        params
    }
}
