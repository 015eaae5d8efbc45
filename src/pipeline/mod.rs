//! Depth frame pipeline: device → acquisition thread → frame buffer → render tick

pub mod acquisition;
pub mod frame_buffer;
pub mod lifecycle;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

pub use acquisition::{AcquisitionStats, LoopExit, StatsSnapshot};
pub use frame_buffer::{FrameBuffer, RenderFrame};
pub use lifecycle::{AcquisitionThread, PipelineState, StateFlag};

use crate::capture::{self, Control, DepthDevice, DeviceSession};
use crate::display::FrameRenderer;
use crate::error::DeviceError;
use crate::host::{HostOperator, InfoChannel, OutputSize, ParameterRegistry};
use crate::{utils, CaptureConfig, Config};

/// Opens the depth device at configuration time
pub type DeviceOpener =
    Box<dyn FnMut(&CaptureConfig) -> Result<Arc<dyn DepthDevice>, DeviceError> + Send>;

/// One depth pipeline instance, driven by a render host
pub struct DepthPipeline {
    config: Config,
    opener: DeviceOpener,
    thread: AcquisitionThread,
    session: Option<Arc<DeviceSession>>,
    buffer: Option<Arc<FrameBuffer>>,
    render: Option<RenderFrame>,
    stats: Arc<AcquisitionStats>,
    tick_count: u64,
    error: Option<String>,
    enumerated: bool,
    torn_down: bool,
}

impl DepthPipeline {
    /// Pipeline that opens the device selected in `config.capture`
    pub fn new(config: Config) -> Self {
        Self::with_opener(config, Box::new(capture::open_device))
    }

    pub fn with_opener(config: Config, opener: DeviceOpener) -> Self {
        let thread = AcquisitionThread::new(config.capture.pin_core);
        Self {
            config,
            opener,
            thread,
            session: None,
            buffer: None,
            render: None,
            stats: Arc::new(AcquisitionStats::new()),
            tick_count: 0,
            error: None,
            enumerated: false,
            torn_down: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.thread.state()
    }

    /// True while the acquisition loop is alive
    pub fn is_acquiring(&self) -> bool {
        self.state() == PipelineState::Running && !self.thread.is_finished()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// The render-owned copy from the most recent tick
    pub fn render_frame(&self) -> Option<&RenderFrame> {
        self.render.as_ref()
    }

    pub fn session(&self) -> Option<&DeviceSession> {
        self.session.as_deref()
    }

    fn fail(&mut self, message: String) {
        error!("{}", message);
        self.error = Some(message);
    }

    /// New parameters start at the configured `[params]` values
    fn register_parameters(&self, registry: &mut ParameterRegistry) {
        let params = &self.config.params;
        for control in Control::ALL {
            registry.append_with_value(control.into(), params.get(control));
        }
        debug!(?params, "Registered capture parameters");
    }

    fn open_session(&mut self) -> Result<DeviceSession, DeviceError> {
        let capture = &self.config.capture;
        if !self.enumerated {
            for device in utils::enumerate_devices(capture) {
                info!(path = %device.path, name = %device.name, "Found depth device");
            }
            self.enumerated = true;
        }
        let device = (self.opener)(capture)?;
        DeviceSession::open(device, capture.format())
    }

    /// Allocate storage, open the device, start acquisition and register tunables.
    ///
    /// Failures leave the pipeline without an acquisition thread and set the
    /// sticky error. A later successful call clears it.
    #[instrument(skip_all)]
    pub fn configure(&mut self, registry: &mut ParameterRegistry) {
        if self.torn_down {
            warn!("configure called after teardown");
            return;
        }
        self.register_parameters(registry);

        if self.state() != PipelineState::NotStarted {
            debug!("Pipeline already configured");
            return;
        }

        let format = self.config.capture.format();
        let buffer = self
            .buffer
            .get_or_insert_with(|| Arc::new(FrameBuffer::new(format)))
            .clone();
        self.render.get_or_insert_with(|| RenderFrame::new(format));

        let session = match self.open_session() {
            Ok(session) => Arc::new(session),
            Err(e) => {
                self.fail(format!("Depth device unavailable: {}", e));
                return;
            }
        };
        session.apply_params(&registry.capture_params());

        let timeout = self.config.capture.acquire_timeout();
        let stats = self.stats.clone();
        let loop_session = session.clone();
        let started = self.thread.start(move |state: &StateFlag| {
            acquisition::run(&loop_session, &buffer, state, &stats, timeout)
        });

        match started {
            Ok(_) => {
                self.session = Some(session);
                self.error = None;
                info!(
                    width = format.width,
                    height = format.height,
                    bytes = format.byte_size(),
                    "Depth pipeline configured"
                );
            }
            Err(e) => self.fail(format!("Failed to spawn acquisition thread: {}", e)),
        }
    }

    fn poll_parameters(&self, registry: &ParameterRegistry) {
        if let Some(session) = &self.session {
            let writes = session.apply_params(&registry.capture_params());
            if writes > 0 {
                debug!(writes, "Pushed parameter changes to device");
            }
        }
    }

    /// One render tick: poll parameters on cadence, snapshot, upload and draw
    pub fn execute(
        &mut self,
        output: OutputSize,
        registry: &ParameterRegistry,
        renderer: &mut dyn FrameRenderer,
    ) {
        self.tick_count += 1;
        metrics::gauge!("depth_tick_count").set(self.tick_count as f64);

        if self.tick_count % self.config.pipeline.param_poll_interval.max(1) == 0 {
            self.poll_parameters(registry);
        }

        if self.error.is_some() {
            return;
        }
        let (Some(buffer), Some(render)) = (&self.buffer, &mut self.render) else {
            return;
        };

        buffer.snapshot_into(render);

        let render_start = Instant::now();
        if let Err(e) = renderer.render(render, output) {
            warn!("Render failed: {}", e);
        }
        metrics::histogram!("render_time_us")
            .record(render_start.elapsed().as_micros() as f64);
    }

    /// Stop acquisition and join the thread, keeping the last frame renderable
    pub fn stop(&mut self) -> Option<LoopExit> {
        let exit = self.thread.stop();
        if let Some(exit) = &exit {
            debug!(?exit, "Acquisition loop exited");
        }
        exit
    }

    /// Stop → join → release the device → free frame storage. Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.stop();
        if let Some(session) = self.session.take() {
            drop(session);
        }
        self.buffer = None;
        self.render = None;
        info!(ticks = self.tick_count, "Depth pipeline torn down");
    }

    pub fn error_string(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn info_channels(&self) -> Vec<InfoChannel> {
        vec![
            InfoChannel {
                name: "tick_count",
                value: self.tick_count as f64,
            },
            InfoChannel {
                name: "frames_acquired",
                value: self.stats.snapshot().frames_acquired as f64,
            },
        ]
    }

    pub fn info_table(&self) -> Vec<[String; 2]> {
        self.info_channels()
            .into_iter()
            .map(|c| [c.name.to_string(), c.value.to_string()])
            .collect()
    }
}

impl HostOperator for DepthPipeline {
    fn configure(&mut self, registry: &mut ParameterRegistry) {
        DepthPipeline::configure(self, registry)
    }

    fn execute(
        &mut self,
        output: OutputSize,
        registry: &ParameterRegistry,
        renderer: &mut dyn FrameRenderer,
    ) {
        DepthPipeline::execute(self, output, registry, renderer)
    }

    fn teardown(&mut self) {
        DepthPipeline::teardown(self)
    }

    fn error_string(&self) -> Option<&str> {
        DepthPipeline::error_string(self)
    }

    fn info_channels(&self) -> Vec<InfoChannel> {
        DepthPipeline::info_channels(self)
    }

    fn info_table(&self) -> Vec<[String; 2]> {
        DepthPipeline::info_table(self)
    }
}

impl Drop for DepthPipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}
