//! TOML-based server configuration.
//!
//! One file describes the listener, the canvas, the dispatch policy and the
//! full device topology:
//!
//! ```toml
//! [server]
//! port_start = 9000
//! port_end = 9010
//!
//! [canvas]
//! width = 64
//! height = 32
//! frame_rate = 30.0
//! gamma = 2.2
//!
//! [dispatch]
//! brightness_divisor = 10
//! serpentine = "odd_rows_reversed"
//!
//! [[devices]]
//! mac = "24:6f:28:aa:bb:cc"
//! name = "left-half"
//!
//! [[devices.pins]]
//! pin = 18
//! color_order = "grb"
//!
//! [[devices.pins.matrices]]
//! width = 32
//! height = 32
//! x = 0
//! y = 0
//! rotation = "up"
//! ```
//!
//! Fields annotated with `#[serde(default = "...")]` may be omitted.
//! [`load_config`] parses and then validates; a config that fails
//! validation never reaches the scheduler.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ledwall_core::protocol::{ColorOrder, LedType};
use ledwall_core::{Device, LedMatrix, MacAddress, PinConnection, Rotation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::canvas::CanvasError;
use crate::application::element::{period_for_rate, ElementError};
use crate::application::packing::{PackingPolicy, Serpentine, DEFAULT_BRIGHTNESS_DIVISOR};
use crate::application::scheduler::SchedulerConfig;
use crate::infrastructure::media::MediaError;
use crate::infrastructure::network::ListenerConfig;

/// Error type for configuration and scene files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),

    #[error("port range {start}..={end} is empty")]
    InvalidPortRange { start: u16, end: u16 },

    #[error("canvas must be at least 1x1, got {width}x{height}")]
    EmptyCanvas { width: u32, height: u32 },

    #[error("frame rate must be positive and give a usable frame period, got {0}")]
    InvalidFrameRate(f64),

    #[error("gamma must be positive and finite, got {0}")]
    InvalidGamma(f64),

    #[error("brightness divisor must be at least 1")]
    ZeroBrightnessDivisor,

    #[error("device {0} is configured more than once")]
    DuplicateDevice(MacAddress),

    #[error("device {mac} has {count} pins; at most 255 are supported")]
    TooManyPins { mac: MacAddress, count: usize },

    #[error("device {mac} uses pin {pin} more than once")]
    DuplicatePin { mac: MacAddress, pin: u8 },

    #[error("device {mac} pin {pin} has a panel with zero width or height")]
    EmptyMatrix { mac: MacAddress, pin: u8 },

    #[error("element id {0} is used more than once")]
    DuplicateElement(u32),

    #[error("element {id}: {source}")]
    Media {
        id: u32,
        #[source]
        source: MediaError,
    },

    #[error(transparent)]
    Element(#[from] ElementError),

    #[error(transparent)]
    Canvas(#[from] CanvasError),

    #[error("element {id} is text but no text rasterizer is available")]
    NoRasterizer { id: u32 },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub canvas: CanvasSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

/// Listener and logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// IP address to bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// First port tried.
    #[serde(default = "default_port_start")]
    pub port_start: u16,
    /// Last port tried, inclusive.
    #[serde(default = "default_port_end")]
    pub port_end: u16,
    /// How long a new connection may take to send CHECK_IN.
    #[serde(default = "default_checkin_timeout_ms")]
    pub checkin_timeout_ms: u64,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanvasSection {
    #[serde(default = "default_canvas_width")]
    pub width: u32,
    #[serde(default = "default_canvas_height")]
    pub height: u32,
    /// Frames sent per second.
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,
    /// Gamma exponent; omitted means no correction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchSection {
    #[serde(default = "default_brightness_divisor")]
    pub brightness_divisor: u8,
    #[serde(default)]
    pub serpentine: Serpentine,
    /// Upper bound on one device write; omitted means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_timeout_ms: Option<u64>,
    /// Interval between GET_LOGS requests; omitted disables them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_poll_secs: Option<u64>,
    /// Interval between GET_STATUS requests; omitted disables them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_poll_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceEntry {
    pub mac: MacAddress,
    #[serde(default)]
    pub name: String,
    /// Channel order of the bytes sent to this device.
    #[serde(default = "default_channel_order")]
    pub channel_order: ColorOrder,
    #[serde(default)]
    pub pins: Vec<PinEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PinEntry {
    pub pin: u8,
    #[serde(default)]
    pub color_order: ColorOrder,
    #[serde(default)]
    pub led_type: LedType,
    #[serde(default)]
    pub matrices: Vec<MatrixEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatrixEntry {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    #[serde(default)]
    pub rotation: Rotation,
    #[serde(default = "default_power_limit_amps")]
    pub power_limit_amps: f32,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port_start() -> u16 {
    9000
}
fn default_port_end() -> u16 {
    9010
}
fn default_checkin_timeout_ms() -> u64 {
    5_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_canvas_width() -> u32 {
    64
}
fn default_canvas_height() -> u32 {
    32
}
fn default_frame_rate() -> f64 {
    30.0
}
fn default_brightness_divisor() -> u8 {
    DEFAULT_BRIGHTNESS_DIVISOR
}
fn default_channel_order() -> ColorOrder {
    ColorOrder::Rgb
}
fn default_power_limit_amps() -> f32 {
    2.0
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port_start: default_port_start(),
            port_end: default_port_end(),
            checkin_timeout_ms: default_checkin_timeout_ms(),
            log_level: default_log_level(),
        }
    }
}

impl Default for CanvasSection {
    fn default() -> Self {
        Self {
            width: default_canvas_width(),
            height: default_canvas_height(),
            frame_rate: default_frame_rate(),
            gamma: None,
        }
    }
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            brightness_divisor: default_brightness_divisor(),
            serpentine: Serpentine::default(),
            send_timeout_ms: None,
            log_poll_secs: None,
            status_poll_secs: None,
        }
    }
}

// ── Validation and conversion ─────────────────────────────────────────────────

impl ServerConfig {
    /// Checks every constraint the rest of the server relies on.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_address()?;
        let (start, end) = (self.server.port_start, self.server.port_end);
        if start > end {
            return Err(ConfigError::InvalidPortRange { start, end });
        }

        let c = &self.canvas;
        if c.width == 0 || c.height == 0 {
            return Err(ConfigError::EmptyCanvas {
                width: c.width,
                height: c.height,
            });
        }
        if period_for_rate(c.frame_rate).is_none() {
            return Err(ConfigError::InvalidFrameRate(c.frame_rate));
        }
        if let Some(gamma) = c.gamma {
            if !gamma.is_finite() || gamma <= 0.0 {
                return Err(ConfigError::InvalidGamma(gamma));
            }
        }
        if self.dispatch.brightness_divisor == 0 {
            return Err(ConfigError::ZeroBrightnessDivisor);
        }

        let mut macs = HashSet::new();
        for device in &self.devices {
            let mac = device.mac;
            if !macs.insert(mac) {
                return Err(ConfigError::DuplicateDevice(mac));
            }
            if device.pins.len() > u8::MAX as usize {
                return Err(ConfigError::TooManyPins {
                    mac,
                    count: device.pins.len(),
                });
            }
            let mut pins = HashSet::new();
            for pin in &device.pins {
                if !pins.insert(pin.pin) {
                    return Err(ConfigError::DuplicatePin { mac, pin: pin.pin });
                }
                if pin.matrices.iter().any(|m| m.width == 0 || m.height == 0) {
                    return Err(ConfigError::EmptyMatrix { mac, pin: pin.pin });
                }
            }
        }
        Ok(())
    }

    /// Parsed bind address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBindAddress`] if it is not an IP address.
    pub fn bind_address(&self) -> Result<IpAddr, ConfigError> {
        self.server
            .bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.server.bind_address.clone()))
    }

    /// Listener settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBindAddress`] for an unparsable address.
    pub fn listener_config(&self) -> Result<ListenerConfig, ConfigError> {
        Ok(ListenerConfig {
            bind_address: self.bind_address()?,
            port_start: self.server.port_start,
            port_end: self.server.port_end,
            checkin_timeout: Duration::from_millis(self.server.checkin_timeout_ms),
        })
    }

    pub fn packing_policy(&self) -> PackingPolicy {
        PackingPolicy {
            brightness_divisor: self.dispatch.brightness_divisor,
            serpentine: self.dispatch.serpentine,
        }
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        self.dispatch.send_timeout_ms.map(Duration::from_millis)
    }

    /// Frame period and diagnostic polls.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidFrameRate`] if the frame rate has no
    /// usable period.
    pub fn scheduler_config(&self) -> Result<SchedulerConfig, ConfigError> {
        let rate = self.canvas.frame_rate;
        let base =
            SchedulerConfig::from_frame_rate(rate).ok_or(ConfigError::InvalidFrameRate(rate))?;
        Ok(SchedulerConfig {
            log_poll: self.dispatch.log_poll_secs.map(Duration::from_secs),
            status_poll: self.dispatch.status_poll_secs.map(Duration::from_secs),
            ..base
        })
    }

    /// The device topology as domain types.
    pub fn devices(&self) -> Vec<Device> {
        self.devices.iter().map(DeviceEntry::to_device).collect()
    }
}

impl DeviceEntry {
    pub fn to_device(&self) -> Device {
        let name = if self.name.is_empty() {
            self.mac.to_string()
        } else {
            self.name.clone()
        };
        Device {
            mac: self.mac,
            name,
            channel_order: self.channel_order,
            pins: self
                .pins
                .iter()
                .map(|p| PinConnection {
                    pin: p.pin,
                    color_order: p.color_order,
                    led_type: p.led_type,
                    matrices: p.matrices.iter().map(MatrixEntry::to_matrix).collect(),
                })
                .collect(),
        }
    }
}

impl MatrixEntry {
    pub fn to_matrix(&self) -> LedMatrix {
        LedMatrix {
            width: self.width,
            height: self.height,
            power_limit_amps: self.power_limit_amps,
            x: self.x,
            y: self.y,
            rotation: self.rotation,
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parses and validates a configuration string.
///
/// # Errors
///
/// [`ConfigError::Parse`] for malformed TOML, otherwise any validation error.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Reads, parses and validates the configuration file at `path`.
///
/// # Errors
///
/// [`ConfigError::Io`] if the file cannot be read, otherwise see
/// [`parse_config`].
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
