//! Connection to the server.
//!
//! Architecture:
//! - [`connect_port_range`] tries each port of the configured range in turn.
//! - [`run_session`] sends CHECK_IN, then reads framed messages and hands
//!   each to the [`CommandHandler`], writing back any reply.
//! - [`DeviceClient::run`] wraps both in a reconnect loop.
//!
//! A message that fails to decode is dropped and the session carries on.
//! A rejected size field or a transport error ends the session, since the
//! stream can no longer be trusted; the client reconnects after
//! `reconnect_interval`.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ledwall_core::protocol::{decode_message, encode_check_in, read_frame_into, FrameError};
use ledwall_core::MacAddress;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::application::handle_commands::CommandHandler;

/// Errors that can occur in the device network layer.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("invalid port range {start}..={end}")]
    InvalidPortRange { start: u16, end: u16 },

    /// No port in the range accepted a connection.
    #[error("no server listening on {host} ports {start}..={end}")]
    NoServer {
        host: IpAddr,
        start: u16,
        end: u16,
        #[source]
        last_error: Option<io::Error>,
    },

    #[error("connection I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Frame(#[from] FrameError),
}

/// Configuration for the device's server connection.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub server: IpAddr,
    pub port_start: u16,
    pub port_end: u16,
    pub mac: MacAddress,
    /// Delay before reconnecting after the connection drops.
    pub reconnect_interval: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            server: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port_start: 9000,
            port_end: 9010,
            mac: MacAddress::new([0x02, 0, 0, 0, 0, 0x01]),
            reconnect_interval: Duration::from_secs(5),
        }
    }
}

/// Connects to the first port in `start..=end` that accepts.
///
/// # Errors
///
/// [`DeviceError::InvalidPortRange`] if `start > end`, otherwise
/// [`DeviceError::NoServer`] when every attempt failed.
pub async fn connect_port_range(
    host: IpAddr,
    start: u16,
    end: u16,
) -> Result<TcpStream, DeviceError> {
    if start > end {
        return Err(DeviceError::InvalidPortRange { start, end });
    }
    let mut last_error = None;
    for port in start..=end {
        match TcpStream::connect(SocketAddr::new(host, port)).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("tried and failed to connect to server port {port}: {e}");
                last_error = Some(e);
            }
        }
    }
    Err(DeviceError::NoServer {
        host,
        start,
        end,
        last_error,
    })
}

/// Checks in on `stream` and serves commands until the server hangs up.
///
/// Returns `Ok(())` on a clean close.
///
/// # Errors
///
/// [`DeviceError::Frame`] for a rejected size field or a read failure,
/// [`DeviceError::Io`] if a write fails.
pub async fn run_session(
    mut stream: TcpStream,
    mac: MacAddress,
    handler: &mut CommandHandler,
) -> Result<(), DeviceError> {
    stream.write_all(&encode_check_in(mac)).await?;
    info!("check-in sent as {mac}");

    let mut buf = Vec::new();
    loop {
        match read_frame_into(&mut stream, &mut buf).await {
            Ok(_) => {}
            Err(FrameError::Closed) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let msg = match decode_message(&buf) {
            Ok((msg, _)) => msg,
            Err(e) => {
                warn!("dropping malformed message: {e}");
                continue;
            }
        };
        debug!("received {:?}", msg.op_code());
        match handler.handle(&msg) {
            Ok(Some(reply)) => stream.write_all(&reply).await?,
            Ok(None) => {}
            Err(e) => warn!("{:?} failed: {e}", msg.op_code()),
        }
    }
}

/// Reconnecting client.
pub struct DeviceClient {
    config: DeviceConfig,
    handler: CommandHandler,
}

impl DeviceClient {
    pub fn new(config: DeviceConfig, handler: CommandHandler) -> Self {
        Self { config, handler }
    }

    pub fn handler(&self) -> &CommandHandler {
        &self.handler
    }

    /// Connects, serves and reconnects until `running` is cleared.
    ///
    /// The flag is checked between sessions only.
    pub async fn run(&mut self, running: Arc<AtomicBool>) {
        let cfg = &self.config;
        while running.load(Ordering::Relaxed) {
            match connect_port_range(cfg.server, cfg.port_start, cfg.port_end).await {
                Ok(stream) => {
                    let peer = stream
                        .peer_addr()
                        .map_or_else(|_| "unknown".to_string(), |a| a.to_string());
                    info!("connected to server at {peer}");
                    match run_session(stream, cfg.mac, &mut self.handler).await {
                        Ok(()) => info!("server closed the connection"),
                        Err(e) => warn!("connection lost: {e}"),
                    }
                }
                Err(e) => warn!("{e}"),
            }

            if running.load(Ordering::Relaxed) {
                info!("reconnecting in {:?}", cfg.reconnect_interval);
                tokio::time::sleep(cfg.reconnect_interval).await;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
