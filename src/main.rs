//! hwmond — drives the Intel Xserve front-panel CPU activity LEDs.
//!
//! Two threads:
//!   - sampler: per-core CPU ticks at 5 Hz, folded into one value per LED row
//!   - renderer: smooths those values at 60 Hz and writes 32-byte frames to
//!     the panel's bulk OUT endpoint
//!
//! No arguments. Runs until SIGINT/SIGTERM, then releases the panel.

#![allow(dead_code)]

mod config;
mod error;
mod panel;
mod shared;
mod system;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use log::info;
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};

use config::PanelConfig;
use error::PanelError;
use panel::renderer::Renderer;
use panel::transport::Panel;
use shared::breakdown_channel;
use system::collector::{describe_host, CpuSampler};
use system::ticks::HostTicks;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging() -> Result<()> {
    let mut lcfg = ConfigBuilder::new();
    lcfg.set_time_level(LevelFilter::Error)
        .set_location_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off);
    TermLogger::init(
        LevelFilter::Info,
        lcfg.build(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )?;
    Ok(())
}

fn run() -> Result<()> {
    init_logging()?;

    let config = PanelConfig::default();
    config.validate()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::Relaxed);
    })
    .context("Error setting signal handler")?;

    let mut panel = Panel::open(&config)?;
    let renderer = Renderer::new(&config)?;

    let sampler = CpuSampler::new(HostTicks::new()).context("Failed to get initial CPU load data")?;
    info!("{}", describe_host(sampler.num_packages()));
    info!("LED rows: {}", sampler.distribution(config.rows)?);

    let (publisher, receiver) = breakdown_channel();

    let render_thread = {
        let shutdown = shutdown.clone();
        thread::Builder::new()
            .name("panel-renderer".into())
            .spawn(move || {
                renderer.run(&mut panel, receiver, &shutdown);
                panel
            })
            .map_err(|e| PanelError::AllocFailed(format!("renderer thread: {}", e)))?
    };

    let sample_thread = {
        let shutdown = shutdown.clone();
        let rows = config.rows;
        let interval = config.sample_interval;
        thread::Builder::new()
            .name("cpu-sampler".into())
            .spawn(move || sampler.run(rows, interval, publisher, &shutdown))
    };

    // Whatever happens to the sampler, the renderer has to be told to stop
    let sampled = match sample_thread {
        Ok(handle) => handle
            .join()
            .map_err(|_| anyhow!("sampler thread panicked"))
            .and_then(|r| r.map_err(Into::into)),
        Err(e) => Err(PanelError::AllocFailed(format!("sampler thread: {}", e)).into()),
    };
    shutdown.store(true, Ordering::Relaxed);

    let panel = render_thread
        .join()
        .map_err(|_| anyhow!("renderer thread panicked"))?;
    panel.close();

    sampled?;
    info!("Exiting...");
    Ok(())
}
