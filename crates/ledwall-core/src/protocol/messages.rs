//! All LED wall protocol message types.
//!
//! Every message starts with a 5-byte header: a little-endian `u32` holding
//! the total message size (header included) followed by a one-byte op code.
//! Fixed-layout payloads are packed with no padding.  Pixel payloads are
//! borrowed from the receive buffer, so a decoded [`Message`] carries the
//! lifetime of the bytes it was decoded from.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::domain::device::MacAddress;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Size of the common `[size:4][op_code:1]` header in bytes.
pub const HEADER_SIZE: usize = 5;

/// Upper bound on the declared size of a single message.
///
/// Frames announcing more than this are rejected before any allocation.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Exact size of a CHECK_IN message: header plus a 6-byte MAC address.
pub const CHECK_IN_SIZE: usize = HEADER_SIZE + 6;

/// Packed size of one [`PinInfo`] record inside SET_CONFIG.
pub const PIN_INFO_SIZE: usize = 7;

/// Packed size of the `{gpio_pin:1, num_leds:4}` header preceding each
/// entry of a batched pixel update.
pub const BATCH_ENTRY_HEADER_SIZE: usize = 5;

/// Every LED is transmitted as three colour bytes.
pub const BYTES_PER_PIXEL: usize = 3;

// ── Op codes ──────────────────────────────────────────────────────────────────

/// One-byte operation identifier carried in every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpCode {
    // Server → device
    SetLeds = 0x01,
    GetLogs = 0x02,
    Redraw = 0x03,
    SetConfig = 0x04,
    // Device → server
    CheckIn = 0x05,
    SendLogs = 0x06,
    // Server → device extensions
    SetLedsBatched = 0x07,
    GetStatus = 0x08,
    SetBrightness = 0x09,
}

impl OpCode {
    /// Smallest declared size a message with this op code may carry.
    pub fn min_size(self) -> usize {
        match self {
            OpCode::SetLeds => HEADER_SIZE + 1,
            OpCode::GetLogs | OpCode::Redraw | OpCode::GetStatus | OpCode::SendLogs => HEADER_SIZE,
            OpCode::SetConfig => HEADER_SIZE + 2,
            OpCode::CheckIn => CHECK_IN_SIZE,
            OpCode::SetLedsBatched => HEADER_SIZE + 1,
            OpCode::SetBrightness => HEADER_SIZE + 1,
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(OpCode::SetLeds),
            0x02 => Ok(OpCode::GetLogs),
            0x03 => Ok(OpCode::Redraw),
            0x04 => Ok(OpCode::SetConfig),
            0x05 => Ok(OpCode::CheckIn),
            0x06 => Ok(OpCode::SendLogs),
            0x07 => Ok(OpCode::SetLedsBatched),
            0x08 => Ok(OpCode::GetStatus),
            0x09 => Ok(OpCode::SetBrightness),
            _ => Err(()),
        }
    }
}

// ── Strip parameters ──────────────────────────────────────────────────────────

/// Order in which a strip expects the three colour bytes of each LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ColorOrder {
    Rgb = 0x00,
    /// Wire order of a pin's strip when configuration names none; the
    /// device-level canvas channel order defaults to `Rgb` separately.
    #[default]
    Grb = 0x01,
}

impl TryFrom<u8> for ColorOrder {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(ColorOrder::Rgb),
            0x01 => Ok(ColorOrder::Grb),
            _ => Err(()),
        }
    }
}

/// LED chipset attached to a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LedType {
    #[default]
    Ws2811 = 0x01,
    Ws2812 = 0x02,
}

impl TryFrom<u8> for LedType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(LedType::Ws2811),
            0x02 => Ok(LedType::Ws2812),
            _ => Err(()),
        }
    }
}

// ── Message payloads ──────────────────────────────────────────────────────────

/// Decoded `[size:4][op_code:1]` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Total message size including the header.
    pub size: u32,
    pub op_code: OpCode,
}

/// Per-pin strip description carried inside SET_CONFIG.
///
/// Wire layout (7 bytes): `[pin_num:1][color_order:1][max_leds:4][led_type:1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinInfo {
    pub pin_num: u8,
    pub color_order: ColorOrder,
    /// Total LEDs on the strip; zero means the pin is present but unused.
    pub max_leds: u32,
    pub led_type: LedType,
}

/// Payload of SET_CONFIG: `[num_color_channels:1][num_pins:1][PinInfo × num_pins]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetConfigMessage {
    pub num_color_channels: u8,
    pub pins: Vec<PinInfo>,
}

/// Payload of SET_LEDS: `[gpio_pin:1][pixel bytes...]`.
///
/// The LED count is implied by the remaining message length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetLedsMessage<'a> {
    pub gpio_pin: u8,
    pub pixel_data: &'a [u8],
}

impl SetLedsMessage<'_> {
    /// Number of whole LEDs carried by the payload.
    pub fn num_leds(&self) -> usize {
        self.pixel_data.len() / BYTES_PER_PIXEL
    }
}

/// One `{gpio_pin, num_leds, pixels}` entry of SET_LEDS_BATCHED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEntry<'a> {
    pub gpio_pin: u8,
    /// Exactly `num_leds * 3` bytes.
    pub pixel_data: &'a [u8],
}

impl BatchEntry<'_> {
    pub fn num_leds(&self) -> usize {
        self.pixel_data.len() / BYTES_PER_PIXEL
    }
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// A single protocol message in either direction.
///
/// Pixel payloads and log text borrow from the buffer they were decoded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<'a> {
    /// Device → server greeting carrying the device's MAC address.
    CheckIn(MacAddress),
    /// Configure the strips attached to each GPIO pin.
    SetConfig(SetConfigMessage),
    /// Write pixels to a single pin.
    SetLeds(SetLedsMessage<'a>),
    /// Write pixels to several pins in one message.
    SetLedsBatched(Vec<BatchEntry<'a>>),
    /// Latch the staged pixel data onto every strip.
    Redraw,
    /// Ask the device to reply with its buffered log text.
    GetLogs,
    /// Device → server log text.  The terminating NUL is not part of the text.
    SendLogs(Cow<'a, str>),
    /// Ask the device to reply with a one-line status summary.
    GetStatus,
    /// Set the device-side global brightness (0–255).
    SetBrightness(u8),
}

impl Message<'_> {
    /// Returns the op code for this message variant.
    pub fn op_code(&self) -> OpCode {
        match self {
            Message::CheckIn(_) => OpCode::CheckIn,
            Message::SetConfig(_) => OpCode::SetConfig,
            Message::SetLeds(_) => OpCode::SetLeds,
            Message::SetLedsBatched(_) => OpCode::SetLedsBatched,
            Message::Redraw => OpCode::Redraw,
            Message::GetLogs => OpCode::GetLogs,
            Message::SendLogs(_) => OpCode::SendLogs,
            Message::GetStatus => OpCode::GetStatus,
            Message::SetBrightness(_) => OpCode::SetBrightness,
        }
    }

    /// Payload size in bytes, excluding the header.
    pub fn payload_len(&self) -> usize {
        match self {
            Message::CheckIn(_) => 6,
            Message::SetConfig(m) => 2 + m.pins.len() * PIN_INFO_SIZE,
            Message::SetLeds(m) => 1 + m.pixel_data.len(),
            Message::SetLedsBatched(entries) => {
                1 + entries
                    .iter()
                    .map(|e| BATCH_ENTRY_HEADER_SIZE + e.pixel_data.len())
                    .sum::<usize>()
            }
            Message::Redraw | Message::GetLogs | Message::GetStatus => 0,
            Message::SendLogs(text) => text.len() + 1,
            Message::SetBrightness(_) => 1,
        }
    }

    /// Total encoded size including the header.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload_len()
    }

    /// Returns `true` for messages that only a device sends.
    pub fn is_device_originated(&self) -> bool {
        matches!(self, Message::CheckIn(_) | Message::SendLogs(_))
    }
}
