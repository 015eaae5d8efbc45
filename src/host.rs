//! Narrow boundary between a render host and an operator

use std::collections::HashMap;

use crate::capture::{CaptureParams, Control, ControlKind};
use crate::display::FrameRenderer;

/// Pixel size of the host's output surface for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSize {
    pub width: u32,
    pub height: u32,
}

impl OutputSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// A tunable exposed to the host's parameter UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDef {
    pub name: &'static str,
    pub label: &'static str,
    pub page: &'static str,
    pub kind: ControlKind,
}

impl From<Control> for ParameterDef {
    fn from(control: Control) -> Self {
        Self {
            name: control.par_name(),
            label: control.label(),
            page: DEVICE_PAGE,
            kind: control.kind(),
        }
    }
}

/// Page the capture controls are grouped under
pub const DEVICE_PAGE: &str = "Device";

/// Host-side store of parameter definitions and their current values
#[derive(Debug, Default)]
pub struct ParameterRegistry {
    defs: Vec<ParameterDef>,
    values: HashMap<&'static str, i32>,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `def` at its default value. Re-registering a name keeps its
    /// current value.
    pub fn append(&mut self, def: ParameterDef) {
        let value = def.kind.default_value();
        self.append_with_value(def, value);
    }

    /// Register `def` starting at `value` (clamped). Returns false, leaving the
    /// current value alone, when the name was already registered.
    pub fn append_with_value(&mut self, def: ParameterDef, value: i32) -> bool {
        if let Some(existing) = self.defs.iter_mut().find(|d| d.name == def.name) {
            *existing = def;
            return false;
        }
        self.values.insert(def.name, def.kind.clamp(value));
        self.defs.push(def);
        true
    }

    pub fn definitions(&self) -> &[ParameterDef] {
        &self.defs
    }

    pub fn get(&self, name: &str) -> Option<i32> {
        self.values.get(name).copied()
    }

    /// Set a value as the UI would, clamped to the parameter's range.
    ///
    /// Returns false for unknown names.
    pub fn set(&mut self, name: &str, value: i32) -> bool {
        let Some(def) = self.defs.iter().find(|d| d.name == name) else {
            return false;
        };
        let value = def.kind.clamp(value);
        self.values.insert(def.name, value);
        true
    }

    pub fn set_toggle(&mut self, name: &str, on: bool) -> bool {
        self.set(name, on as i32)
    }

    /// Current capture parameters; unregistered controls keep their defaults
    pub fn capture_params(&self) -> CaptureParams {
        let mut params = CaptureParams::default();
        for control in Control::ALL {
            if let Some(value) = self.get(control.par_name()) {
                params.set(control, value);
            }
        }
        params
    }
}

/// A named scalar published to the host's info channels
#[derive(Debug, Clone, PartialEq)]
pub struct InfoChannel {
    pub name: &'static str,
    pub value: f64,
}

/// What a render host drives: configure once, tick every frame, tear down once.
pub trait HostOperator {
    /// Allocate resources and register tunables. Called before the first tick.
    fn configure(&mut self, registry: &mut ParameterRegistry);

    /// One render tick.
    fn execute(
        &mut self,
        output: OutputSize,
        registry: &ParameterRegistry,
        renderer: &mut dyn FrameRenderer,
    );

    /// Release everything. Safe to call more than once.
    fn teardown(&mut self);

    /// Sticky error for the host's status display
    fn error_string(&self) -> Option<&str>;

    fn info_channels(&self) -> Vec<InfoChannel>;

    /// Two-column rows of name and value
    fn info_table(&self) -> Vec<[String; 2]>;
}
