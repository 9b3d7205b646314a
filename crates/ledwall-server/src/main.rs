//! LED wall server entry point.
//!
//! # Usage
//!
//! ```text
//! ledwall-server [OPTIONS] <SCENE>
//!
//! Options:
//!   --config <PATH>      Server configuration [default: config.toml]
//!   --port-start <PORT>  Overrides [server] port_start
//!   --port-end <PORT>    Overrides [server] port_end
//! ```
//!
//! # Startup
//!
//! ```text
//! main()
//!  └─ load_config()           -- topology, canvas, dispatch policy
//!  └─ load_scene()            -- every asset loaded before serving
//!  └─ DeviceListener::run()   (Tokio task)
//!  └─ Scheduler::run()        -- frame loop until Ctrl-C
//! ```

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ledwall_server::application::canvas::Canvas;
use ledwall_server::application::dispatch::Dispatcher;
use ledwall_server::application::manage_devices::{ConnectionRegistry, DeviceTable};
use ledwall_server::application::scheduler::Scheduler;
use ledwall_server::infrastructure::clock::SystemClock;
use ledwall_server::infrastructure::network::{DeviceListener, TcpDeviceLink};
use ledwall_server::infrastructure::storage::{load_config, load_scene};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Composites a scene and streams it to networked LED matrix devices.
#[derive(Debug, Parser)]
#[command(name = "ledwall-server", version)]
struct Cli {
    /// Server configuration file.
    #[arg(long, default_value = "config.toml", env = "LEDWALL_CONFIG")]
    config: PathBuf,

    /// Scene file describing the elements to show.
    scene: PathBuf,

    /// First listener port, overriding the configuration.
    #[arg(long)]
    port_start: Option<u16>,

    /// Last listener port, overriding the configuration.
    #[arg(long)]
    port_end: Option<u16>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)
        .with_context(|| format!("loading configuration {}", cli.config.display()))?;
    if let Some(port) = cli.port_start {
        config.server.port_start = port;
    }
    if let Some(port) = cli.port_end {
        config.server.port_end = port;
    }
    config.validate().context("invalid port override")?;

    // Level is overridden by `RUST_LOG`.
    let fallback = config.server.log_level.clone();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();

    info!("LED wall server starting with {} device(s)", config.devices.len());

    // ── Canvas and scene ──────────────────────────────────────────────────────
    let mut canvas = Canvas::new(config.canvas.width, config.canvas.height);
    if let Some(gamma) = config.canvas.gamma {
        canvas = canvas.with_gamma(gamma);
    }
    load_scene(&cli.scene, &mut canvas, None)
        .with_context(|| format!("loading scene {}", cli.scene.display()))?;

    // ── Devices and listener ──────────────────────────────────────────────────
    let devices = Arc::new(DeviceTable::new(config.devices()));
    let registry = Arc::new(ConnectionRegistry::<TcpDeviceLink>::new(devices.macs()));
    let running = Arc::new(AtomicBool::new(true));

    let listener = DeviceListener::bind(
        &config.listener_config()?,
        Arc::clone(&devices),
        Arc::clone(&registry),
    )
    .await
    .context("starting device listener")?;
    let listener_task = tokio::spawn(listener.run(Arc::clone(&running)));

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    // ── Frame loop ────────────────────────────────────────────────────────────
    let dispatcher = Dispatcher::new(devices, registry, config.packing_policy())
        .with_send_timeout(config.send_timeout());
    let mut scheduler = Scheduler::new(
        canvas,
        dispatcher,
        Arc::new(SystemClock),
        config.scheduler_config()?,
        Arc::clone(&running),
    )
    .context("starting scheduler")?;

    info!("LED wall server ready.  Press Ctrl-C to exit.");
    scheduler.run().await;

    listener_task.await.context("device listener task panicked")?;
    info!("LED wall server stopped");
    Ok(())
}
