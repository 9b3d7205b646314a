//! Device listener: port-range binding, accept loop and check-in handshake.
//!
//! Per connection:
//!
//! ```text
//! accept ──► await CHECK_IN (bounded) ──┬─ unknown MAC ──► close
//!                                       └─ known MAC ──► close old link
//!                                                        ──► SET_CONFIG
//!                                                        ──► register
//! ```
//!
//! Every handshake runs on its own task, so a silent peer only ever costs
//! its own check-in timeout.  Once registered, the connection's read half
//! stays on a reader task that logs the device's SEND_LOGS replies.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ledwall_core::protocol::{
    decode_check_in, decode_check_in_header, decode_message, encode_message, read_frame_into,
    FrameError, Message, ProtocolError, CHECK_IN_SIZE, HEADER_SIZE,
};
use ledwall_core::MacAddress;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::application::manage_devices::{ConnectionRegistry, DeviceLink, DeviceTable};
use crate::infrastructure::network::link::TcpDeviceLink;

/// How often the accept loop re-checks the running flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid port range {start}..={end}")]
    InvalidPortRange { start: u16, end: u16 },

    #[error("no free port in {start}..={end} on {address}")]
    NoPortAvailable {
        address: IpAddr,
        start: u16,
        end: u16,
        #[source]
        last_error: Option<io::Error>,
    },
}

/// Why a single handshake ended without registering a device.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("no check-in within {0:?}")]
    Timeout(Duration),

    #[error("could not read check-in: {0}")]
    Frame(#[from] FrameError),

    #[error("invalid check-in: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("device {0} is not configured")]
    UnknownDevice(MacAddress),

    #[error("could not send configuration: {0}")]
    Send(#[source] io::Error),

    #[error("device {0} registered by a concurrent handshake")]
    Superseded(MacAddress),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    pub bind_address: IpAddr,
    pub port_start: u16,
    pub port_end: u16,
    pub checkin_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port_start: 9000,
            port_end: 9010,
            checkin_timeout: Duration::from_secs(5),
        }
    }
}

/// Binds the first port in `start..=end` that is free on `address`.
///
/// # Errors
///
/// [`ListenerError::InvalidPortRange`] if `start > end`, otherwise
/// [`ListenerError::NoPortAvailable`] when every bind attempt failed.
pub async fn bind_port_range(
    address: IpAddr,
    start: u16,
    end: u16,
) -> Result<TcpListener, ListenerError> {
    if start > end {
        return Err(ListenerError::InvalidPortRange { start, end });
    }
    let mut last_error = None;
    for port in start..=end {
        match TcpListener::bind(SocketAddr::new(address, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!("port {port} unavailable: {e}");
                last_error = Some(e);
            }
        }
    }
    Err(ListenerError::NoPortAvailable {
        address,
        start,
        end,
        last_error,
    })
}

/// Accepts devices and hands registered links to the connection registry.
pub struct DeviceListener {
    listener: TcpListener,
    devices: Arc<DeviceTable>,
    registry: Arc<ConnectionRegistry<TcpDeviceLink>>,
    checkin_timeout: Duration,
}

impl DeviceListener {
    /// Binds the listener within the configured port range.
    ///
    /// # Errors
    ///
    /// See [`bind_port_range`].
    pub async fn bind(
        config: &ListenerConfig,
        devices: Arc<DeviceTable>,
        registry: Arc<ConnectionRegistry<TcpDeviceLink>>,
    ) -> Result<Self, ListenerError> {
        let listener =
            bind_port_range(config.bind_address, config.port_start, config.port_end).await?;
        Ok(Self {
            listener,
            devices,
            registry,
            checkin_timeout: config.checkin_timeout,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `running` is cleared.
    pub async fn run(self, running: Arc<AtomicBool>) {
        match self.local_addr() {
            Ok(addr) => info!("listening for devices on {addr}"),
            Err(e) => warn!("listening for devices on unknown address: {e}"),
        }

        while running.load(Ordering::Relaxed) {
            let (stream, peer) =
                match tokio::time::timeout(ACCEPT_POLL_INTERVAL, self.listener.accept()).await {
                    Err(_) => continue,
                    Ok(Ok(pair)) => pair,
                    Ok(Err(e)) => {
                        error!("accept failed: {e}");
                        continue;
                    }
                };
            debug!("connection from {peer}");

            let devices = Arc::clone(&self.devices);
            let registry = Arc::clone(&self.registry);
            let timeout = self.checkin_timeout;
            tokio::spawn(async move {
                match handshake(stream, peer, &devices, &registry, timeout).await {
                    Ok(mac) => debug!("handshake with {mac} at {peer} complete"),
                    Err(HandshakeError::UnknownDevice(mac)) => {
                        warn!("rejected unknown device {mac} from {peer}")
                    }
                    Err(e) => warn!("handshake with {peer} failed: {e}"),
                }
            });
        }
        info!("device listener stopped");
    }
}

/// Runs the check-in handshake on an accepted stream.
///
/// On success the device is registered with a fresh [`TcpDeviceLink`] and a
/// reader task owns the read half.  On any failure the stream is dropped,
/// which closes it.
///
/// # Errors
///
/// Returns [`HandshakeError`] describing why the device was not registered.
pub async fn handshake(
    stream: TcpStream,
    peer: SocketAddr,
    devices: &DeviceTable,
    registry: &Arc<ConnectionRegistry<TcpDeviceLink>>,
    checkin_timeout: Duration,
) -> Result<MacAddress, HandshakeError> {
    let (mut reader, writer) = stream.into_split();

    // The header is checked on its own so nothing but an 11-byte CHECK_IN
    // is ever read past it.
    let mut frame = [0u8; CHECK_IN_SIZE];
    let read_check_in = async {
        reader
            .read_exact(&mut frame[..HEADER_SIZE])
            .await
            .map_err(FrameError::from)?;
        decode_check_in_header(&frame[..HEADER_SIZE])?;
        reader
            .read_exact(&mut frame[HEADER_SIZE..])
            .await
            .map_err(FrameError::from)?;
        Ok::<_, HandshakeError>(())
    };
    tokio::time::timeout(checkin_timeout, read_check_in)
        .await
        .map_err(|_| HandshakeError::Timeout(checkin_timeout))??;
    let mac = decode_check_in(&frame)?;
    let device = devices.get(&mac).ok_or(HandshakeError::UnknownDevice(mac))?;

    let link = TcpDeviceLink::new(peer, writer);
    if let Some(stale) = registry.set_disconnected(mac) {
        info!("{mac} checked in again from {peer}; closing link to {}", stale.peer());
        stale.close().await;
    }

    let config = encode_message(&Message::SetConfig(device.set_config_message()))?;
    if let Err(e) = link.send(&config).await {
        link.close().await;
        return Err(HandshakeError::Send(e));
    }

    let task = tokio::spawn(read_device_messages(
        mac,
        reader,
        link.clone(),
        Arc::clone(registry),
    ));
    link.attach_reader(task.abort_handle());

    if !registry.set_connected(mac, link.clone()) {
        link.close().await;
        return Err(HandshakeError::Superseded(mac));
    }
    info!(
        "device {} ({mac}) connected from {peer} with {} pin(s)",
        device.name,
        device.pins.len()
    );
    Ok(mac)
}

/// Logs what a registered device sends until the connection ends, then
/// demotes the device if this connection is still its current one.
async fn read_device_messages(
    mac: MacAddress,
    mut reader: OwnedReadHalf,
    link: TcpDeviceLink,
    registry: Arc<ConnectionRegistry<TcpDeviceLink>>,
) {
    let mut buf = Vec::new();
    loop {
        match read_frame_into(&mut reader, &mut buf).await {
            Ok(_) => {}
            Err(FrameError::Closed) => {
                info!("{mac} closed the connection");
                break;
            }
            Err(e) => {
                warn!("{mac}: {e}; dropping connection");
                break;
            }
        }
        match decode_message(&buf) {
            Ok((Message::SendLogs(text), _)) => {
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    info!(device = %mac, "{line}");
                }
            }
            Ok((other, _)) => debug!("{mac} sent unexpected {:?}", other.op_code()),
            Err(e) => warn!("{mac}: dropping malformed message: {e}"),
        }
    }

    if registry.set_disconnected_if_current(mac, &link).is_some() {
        info!("{mac} marked disconnected");
    }
    link.close().await;
}
