//! depthpipe: live depth capture driven by a fixed-rate render loop

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use depthpipe::display::{FrameRenderer, NullRenderer};
use depthpipe::{Config, DepthPipeline, OutputSize, ParameterRegistry};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Seconds between status lines
const STATUS_INTERVAL_SECS: u64 = 5;

fn make_renderer() -> Box<dyn FrameRenderer> {
    #[cfg(feature = "gpu-display")]
    match depthpipe::display::GpuRenderer::new() {
        Ok(renderer) => return Box::new(renderer),
        Err(e) => warn!("GPU unavailable, rendering disabled: {}", e),
    }
    #[cfg(not(feature = "gpu-display"))]
    warn!("Built without gpu-display, rendering disabled");

    Box::new(NullRenderer::new())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("depthpipe=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("depthpipe launching...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    depthpipe::CONFIG.store(Arc::new(config.clone()));

    let output = OutputSize::new(config.display.width, config.display.height);
    let fps = config.display.fps;

    let mut registry = ParameterRegistry::new();
    let mut pipeline = DepthPipeline::new(config);
    pipeline.configure(&mut registry);
    if let Some(message) = pipeline.error_string() {
        error!("{}", message);
    }

    let mut renderer = make_renderer();

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps as f64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let status_every = STATUS_INTERVAL_SECS * fps as u64;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                pipeline.execute(output, &registry, renderer.as_mut());
                if pipeline.tick_count() % status_every == 0 {
                    for [name, value] in pipeline.info_table() {
                        info!("{}: {}", name, value);
                    }
                }
            }
            res = &mut shutdown => {
                if let Err(e) = res {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
        }
    }

    pipeline.teardown();
    info!("depthpipe shutting down");
    Ok(())
}
