use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::Result;
use depthpipe::capture::{Control, DepthDevice, FrameFormat, SensorFeed, SimulatedSensor};
use depthpipe::display::FrameRenderer;
use depthpipe::error::DeviceError;
use depthpipe::pipeline::{LoopExit, PipelineState, RenderFrame};
use depthpipe::{Config, DepthPipeline, HostOperator, OutputSize, ParameterRegistry};

const OUTPUT: OutputSize = OutputSize::new(320, 240);

/// Remembers what every render call was handed
#[derive(Default)]
struct RecordingRenderer {
    frames: Vec<(u64, f32)>,
}

impl FrameRenderer for RecordingRenderer {
    fn render(&mut self, frame: &RenderFrame, _output: OutputSize) -> Result<()> {
        self.frames
            .push((frame.sequence(), frame.samples().first().copied().unwrap_or(-1.0)));
        Ok(())
    }
}

fn test_config(width: u32, height: u32) -> Config {
    let mut config = Config::default();
    config.capture.width = width;
    config.capture.height = height;
    config.capture.acquire_timeout_ms = 20;
    config
}

fn fed_pipeline(config: Config) -> (DepthPipeline, Arc<SimulatedSensor>, SensorFeed) {
    let (sensor, feed) = SimulatedSensor::fed(config.capture.format());
    let sensor = Arc::new(sensor);
    let device = sensor.clone();
    let pipeline = DepthPipeline::with_opener(
        config,
        Box::new(move |_| Ok(device.clone() as Arc<dyn DepthDevice>)),
    );
    (pipeline, sensor, feed)
}

fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn render_tick_sees_each_published_frame() {
    let config = test_config(640, 480);
    let format = config.capture.format();
    let (mut pipeline, _sensor, feed) = fed_pipeline(config);
    let mut registry = ParameterRegistry::new();
    let mut renderer = RecordingRenderer::default();

    pipeline.configure(&mut registry);
    assert_eq!(pipeline.state(), PipelineState::Running);
    assert!(pipeline.error_string().is_none());

    for i in 1..=5u64 {
        assert!(feed.push_fill(format, i as f32));
        wait_for("frame", || pipeline.stats().frames_acquired == i);
        pipeline.execute(OUTPUT, &registry, &mut renderer);

        let frame = pipeline.render_frame().unwrap();
        assert_eq!(frame.sequence(), i);
        assert_eq!(frame.samples().len(), 640 * 480);
        assert!(frame.samples().iter().all(|&v| v == i as f32));
    }
    assert_eq!(
        renderer.frames,
        (1..=5).map(|i| (i, i as f32)).collect::<Vec<_>>()
    );

    assert_eq!(pipeline.stop(), Some(LoopExit::StopRequested));
    assert_eq!(pipeline.state(), PipelineState::StopRequested);

    pipeline.execute(OUTPUT, &registry, &mut renderer);
    let frame = pipeline.render_frame().unwrap();
    assert_eq!(frame.sequence(), 5);
    assert!(frame.samples().iter().all(|&v| v == 5.0));
    assert_eq!(renderer.frames.last(), Some(&(5, 5.0)));
}

#[test]
fn render_before_first_frame_shows_zeroes() {
    let (mut pipeline, _sensor, _feed) = fed_pipeline(test_config(16, 8));
    let mut registry = ParameterRegistry::new();
    let mut renderer = RecordingRenderer::default();

    pipeline.configure(&mut registry);
    pipeline.execute(OUTPUT, &registry, &mut renderer);

    let frame = pipeline.render_frame().unwrap();
    assert_eq!(frame.sequence(), 0);
    assert!(frame.samples().iter().all(|&v| v == 0.0));
    assert_eq!(renderer.frames, vec![(0, 0.0)]);
}

#[test]
fn open_failure_sets_sticky_error_and_starts_nothing() {
    let mut pipeline = DepthPipeline::with_opener(
        test_config(16, 8),
        Box::new(|_| Err(DeviceError::NotFound("no depth camera".into()))),
    );
    let mut registry = ParameterRegistry::new();
    let mut renderer = RecordingRenderer::default();

    pipeline.configure(&mut registry);

    assert_eq!(pipeline.state(), PipelineState::NotStarted);
    assert!(!pipeline.is_acquiring());
    let message = pipeline.error_string().unwrap();
    assert!(message.starts_with("Depth device unavailable"), "{}", message);

    for _ in 0..3 {
        pipeline.execute(OUTPUT, &registry, &mut renderer);
    }
    assert!(renderer.frames.is_empty());
    assert_eq!(pipeline.tick_count(), 3);

    pipeline.teardown();
}

#[test]
fn resolution_mismatch_is_reported() {
    let config = test_config(640, 480);
    let (sensor, _feed) = SimulatedSensor::fed(FrameFormat::depth(320, 240));
    let sensor = Arc::new(sensor);
    let mut pipeline = DepthPipeline::with_opener(
        config,
        Box::new(move |_| Ok(sensor.clone() as Arc<dyn DepthDevice>)),
    );
    let mut registry = ParameterRegistry::new();

    pipeline.configure(&mut registry);

    assert_eq!(pipeline.state(), PipelineState::NotStarted);
    assert!(pipeline.error_string().unwrap().contains("640x480"));
}

#[test]
fn successful_configure_clears_previous_error() {
    let config = test_config(16, 8);
    let (sensor, _feed) = SimulatedSensor::fed(config.capture.format());
    let sensor = Arc::new(sensor);
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let mut pipeline = DepthPipeline::with_opener(
        config,
        Box::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(DeviceError::NotFound("not plugged in yet".into()))
            } else {
                Ok(sensor.clone() as Arc<dyn DepthDevice>)
            }
        }),
    );
    let mut registry = ParameterRegistry::new();

    pipeline.configure(&mut registry);
    assert!(pipeline.error_string().is_some());

    pipeline.configure(&mut registry);
    assert!(pipeline.error_string().is_none());
    assert_eq!(pipeline.state(), PipelineState::Running);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(registry.definitions().len(), 6);
}

#[test]
fn teardown_joins_before_closing_and_is_idempotent() {
    let config = test_config(16, 8);
    let format = config.capture.format();
    let (mut pipeline, sensor, feed) = fed_pipeline(config);
    let mut registry = ParameterRegistry::new();

    pipeline.configure(&mut registry);
    feed.push_fill(format, 1.0);
    wait_for("frame", || pipeline.stats().frames_acquired == 1);

    pipeline.teardown();
    assert!(sensor.is_closed());
    assert_eq!(sensor.acquired_frames(), sensor.released_frames());
    assert!(pipeline.render_frame().is_none());
    assert!(pipeline.session().is_none());

    pipeline.teardown();
    let op: &mut dyn HostOperator = &mut pipeline;
    op.teardown();
    assert_eq!(pipeline.state(), PipelineState::StopRequested);
}

#[test]
fn stop_returns_within_acquire_timeout() {
    let (mut pipeline, _sensor, _feed) = fed_pipeline(test_config(16, 8));
    let mut registry = ParameterRegistry::new();
    pipeline.configure(&mut registry);
    assert!(pipeline.is_acquiring());

    let started = Instant::now();
    assert_eq!(pipeline.stop(), Some(LoopExit::StopRequested));
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(pipeline.stop(), None);
}

#[test]
fn parameter_changes_reach_device_on_poll_cadence() {
    let mut config = test_config(16, 8);
    config.pipeline.param_poll_interval = 4;
    let (mut pipeline, sensor, _feed) = fed_pipeline(config);
    let mut registry = ParameterRegistry::new();
    let mut renderer = RecordingRenderer::default();

    pipeline.configure(&mut registry);
    assert!(sensor.control_writes().is_empty());

    assert!(registry.set("Laserpower", 4));
    for _ in 0..3 {
        pipeline.execute(OUTPUT, &registry, &mut renderer);
    }
    assert!(sensor.control_writes().is_empty());

    pipeline.execute(OUTPUT, &registry, &mut renderer);
    assert_eq!(
        sensor.control_writes(),
        vec![(Control::LaserPower, 4)]
    );

    // Unchanged values are never rewritten
    for _ in 0..8 {
        pipeline.execute(OUTPUT, &registry, &mut renderer);
    }
    assert_eq!(sensor.control_writes().len(), 1);
}

#[test]
fn configured_params_reach_device_at_configure() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[capture]
width = 16
height = 8

[params]
laser_power = 4
color_auto_exposure = false
"#
    )
    .unwrap();
    let config = Config::load(Some(file.path())).unwrap();
    let (mut pipeline, sensor, _feed) = fed_pipeline(config);
    let mut registry = ParameterRegistry::new();

    pipeline.configure(&mut registry);

    assert_eq!(registry.get("Laserpower"), Some(4));
    assert_eq!(registry.get("Colorautoexp"), Some(0));
    assert_eq!(sensor.control(Control::LaserPower).unwrap(), 4);
    assert_eq!(sensor.control(Control::ColorAutoExposure).unwrap(), 0);
    assert_eq!(
        sensor.control_writes(),
        vec![(Control::LaserPower, 4), (Control::ColorAutoExposure, 0)]
    );

    // A value changed in the host survives reconfiguration
    registry.set("Laserpower", 7);
    pipeline.configure(&mut registry);
    assert_eq!(registry.get("Laserpower"), Some(7));
}

#[test]
fn device_loss_keeps_last_frame_on_screen() {
    let config = test_config(16, 8);
    let format = config.capture.format();
    let (mut pipeline, _sensor, feed) = fed_pipeline(config);
    let mut registry = ParameterRegistry::new();
    let mut renderer = RecordingRenderer::default();

    pipeline.configure(&mut registry);
    feed.push_fill(format, 1.0);
    feed.push_fill(format, 2.0);
    wait_for("frames", || pipeline.stats().frames_acquired == 2);

    feed.fail("usb unplugged");
    wait_for("loop exit", || !pipeline.is_acquiring());

    pipeline.execute(OUTPUT, &registry, &mut renderer);
    assert_eq!(renderer.frames, vec![(2, 2.0)]);
    assert!(pipeline.error_string().is_none());

    assert_eq!(
        pipeline.stop(),
        Some(LoopExit::DeviceLost("usb unplugged".into()))
    );
}

#[test]
fn info_channels_report_ticks_and_frames() {
    let config = test_config(16, 8);
    let format = config.capture.format();
    let (mut pipeline, _sensor, feed) = fed_pipeline(config);
    let mut registry = ParameterRegistry::new();
    let mut renderer = RecordingRenderer::default();

    pipeline.configure(&mut registry);
    feed.push_fill(format, 3.0);
    wait_for("frame", || pipeline.stats().frames_acquired == 1);
    pipeline.execute(OUTPUT, &registry, &mut renderer);
    pipeline.execute(OUTPUT, &registry, &mut renderer);

    let table = pipeline.info_table();
    assert_eq!(table.len(), 2);
    assert_eq!(table[0], ["tick_count".to_string(), "2".to_string()]);
    assert_eq!(table[1], ["frames_acquired".to_string(), "1".to_string()]);

    let channels = pipeline.info_channels();
    assert_eq!(channels[0].name, "tick_count");
    assert_eq!(channels[1].value, 1.0);
}
