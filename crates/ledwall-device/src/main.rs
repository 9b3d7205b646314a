//! LED wall device entry point.
//!
//! Runs the device side of the protocol on a host, with pixels going to a
//! logging driver.  Useful for exercising a server setup without hardware.
//!
//! ```text
//! main()
//!  └─ LogBuffer               -- tee of all log output, drained by GET_LOGS
//!  └─ CommandHandler          -- strips, brightness, status
//!  └─ DeviceClient::run()     -- connect, CHECK_IN, serve, reconnect
//! ```

use std::net::IpAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use ledwall_core::MacAddress;
use ledwall_device::application::handle_commands::CommandHandler;
use ledwall_device::infrastructure::log_buffer::LogBuffer;
use ledwall_device::infrastructure::network::{DeviceClient, DeviceConfig};
use ledwall_device::infrastructure::pixel_driver::logging::LoggingPixelDriver;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Software LED wall device.
#[derive(Debug, Parser)]
#[command(name = "ledwall-device", version)]
struct Cli {
    /// Server IP address.
    #[arg(long, default_value = "127.0.0.1", env = "LEDWALL_SERVER")]
    server: IpAddr,

    /// First server port to try.
    #[arg(long, default_value_t = 9000, env = "LEDWALL_PORT_START")]
    port_start: u16,

    /// Last server port to try, inclusive.
    #[arg(long, default_value_t = 9010, env = "LEDWALL_PORT_END")]
    port_end: u16,

    /// MAC address sent in CHECK_IN.
    #[arg(long, default_value = "02:00:00:00:00:01", env = "LEDWALL_MAC")]
    mac: MacAddress,

    /// Delay before reconnecting, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    reconnect_ms: u64,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Everything logged is also kept for GET_LOGS.
    let logs = LogBuffer::new();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_writer(std::io::stdout.and(logs.clone()))
        .init();

    info!("LED wall device {} starting", cli.mac);

    if cli.port_start > cli.port_end {
        anyhow::bail!("--port-start {} is above --port-end {}", cli.port_start, cli.port_end);
    }
    let config = DeviceConfig {
        server: cli.server,
        port_start: cli.port_start,
        port_end: cli.port_end,
        mac: cli.mac,
        reconnect_interval: Duration::from_millis(cli.reconnect_ms),
    };
    let handler = CommandHandler::new(
        cli.mac,
        Arc::new(LoggingPixelDriver::new()),
        Arc::new(logs),
    );
    let mut client = DeviceClient::new(config, handler);

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    tokio::select! {
        _ = client.run(Arc::clone(&running)) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("shutdown signal received");
            running.store(false, Ordering::Relaxed);
        }
    }

    info!("LED wall device stopped");
    Ok(())
}
