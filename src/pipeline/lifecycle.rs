//! Start/stop of the acquisition thread

use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::pipeline::acquisition::LoopExit;

const THREAD_NAME: &str = "depth-acquisition";

/// Pipeline state as seen by both threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    NotStarted = 0,
    Running = 1,
    StopRequested = 2,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PipelineState::NotStarted,
            1 => PipelineState::Running,
            _ => PipelineState::StopRequested,
        }
    }
}

/// Atomic tri-state flag shared with the acquisition loop
#[derive(Debug)]
pub struct StateFlag(AtomicU8);

impl StateFlag {
    pub fn new() -> Self {
        Self(AtomicU8::new(PipelineState::NotStarted as u8))
    }

    pub fn load(&self) -> PipelineState {
        PipelineState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.load() == PipelineState::Running
    }

    /// Move from `from` to `to`; false if the flag held anything else
    pub fn transition(&self, from: PipelineState, to: PipelineState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Force `StopRequested`, returning the previous state
    fn request_stop(&self) -> PipelineState {
        PipelineState::from_u8(
            self.0
                .swap(PipelineState::StopRequested as u8, Ordering::AcqRel),
        )
    }
}

impl Default for StateFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the acquisition thread and its running flag.
///
/// The thread is spawned at most once and joined at most once. Dropping the
/// manager stops and joins the thread.
pub struct AcquisitionThread {
    state: Arc<StateFlag>,
    handle: Option<JoinHandle<LoopExit>>,
    pin_core: Option<usize>,
}

impl AcquisitionThread {
    pub fn new(pin_core: Option<usize>) -> Self {
        Self {
            state: Arc::new(StateFlag::new()),
            handle: None,
            pin_core,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state.load()
    }

    /// True once the loop body has returned, whatever the reason
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Spawn `body` on the acquisition thread.
    ///
    /// Returns `Ok(false)` without spawning if the thread was already started
    /// or the manager was stopped.
    pub fn start<F>(&mut self, body: F) -> io::Result<bool>
    where
        F: FnOnce(&StateFlag) -> LoopExit + Send + 'static,
    {
        if !self
            .state
            .transition(PipelineState::NotStarted, PipelineState::Running)
        {
            debug!(state = ?self.state(), "Acquisition thread already started");
            return Ok(false);
        }

        let state = self.state.clone();
        let pin_core = self.pin_core;
        let spawned = thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || {
                if let Some(id) = pin_core {
                    if !core_affinity::set_for_current(core_affinity::CoreId { id }) {
                        warn!(core = id, "Failed to pin acquisition thread");
                    }
                }
                body(&state)
            });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                info!("Started acquisition thread");
                Ok(true)
            }
            Err(e) => {
                self.state
                    .transition(PipelineState::Running, PipelineState::NotStarted);
                Err(e)
            }
        }
    }

    /// Request stop and join the thread. Later calls are no-ops.
    pub fn stop(&mut self) -> Option<LoopExit> {
        let previous = self.state.request_stop();
        let handle = self.handle.take()?;
        debug!(?previous, "Stop requested, joining acquisition thread");

        match handle.join() {
            Ok(exit) => {
                info!(?exit, "Stopped acquisition thread");
                Some(exit)
            }
            Err(_) => {
                error!("Acquisition thread panicked");
                None
            }
        }
    }
}

impl Drop for AcquisitionThread {
    fn drop(&mut self) {
        self.stop();
    }
}
