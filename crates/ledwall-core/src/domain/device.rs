//! Device identity and physical topology.
//!
//! A [`Device`] is identified by its [`MacAddress`] and drives one strip per
//! GPIO pin.  Each strip ([`PinConnection`]) chains one or more
//! [`LedMatrix`] panels, and each panel is mapped onto a rectangle of the
//! virtual canvas.  The topology is loaded once at startup and never mutated.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::messages::{ColorOrder, LedType, PinInfo, SetConfigMessage, BYTES_PER_PIXEL};

/// Number of colour channels every device is configured with.
pub const NUM_COLOR_CHANNELS: u8 = 3;

// ── MacAddress ────────────────────────────────────────────────────────────────

/// Error returned when a MAC address string cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid MAC address '{input}': expected 12 hex digits")]
pub struct MacAddressParseError {
    pub input: String,
}

/// A 6-byte hardware identifier.
///
/// Parses `aa:bb:cc:dd:ee:ff`, `AA-BB-CC-DD-EE-FF` and bare `aabbccddeeff`;
/// always displays in lowercase colon form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl FromStr for MacAddress {
    type Err = MacAddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || MacAddressParseError {
            input: s.to_string(),
        };
        let digits: Vec<u8> = s
            .bytes()
            .filter(|b| !matches!(b, b':' | b'-' | b'.') && !b.is_ascii_whitespace())
            .collect();
        if digits.len() != 12 {
            return Err(err());
        }

        let mut bytes = [0u8; 6];
        for (i, pair) in digits.chunks_exact(2).enumerate() {
            let hi = hex_value(pair[0]).ok_or_else(err)?;
            let lo = hex_value(pair[1]).ok_or_else(err)?;
            bytes[i] = (hi << 4) | lo;
        }
        Ok(Self(bytes))
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl TryFrom<String> for MacAddress {
    type Error = MacAddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddress({self})")
    }
}

// ── Rotation ──────────────────────────────────────────────────────────────────

/// Orientation of a panel relative to the canvas.
///
/// `Left` panels are mounted so that the canvas region must be turned 90°
/// clockwise before it matches the wiring; `Right` panels turn 90°
/// counter-clockwise; `Down` panels turn 180°.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    #[default]
    #[serde(alias = "UP")]
    Up,
    #[serde(alias = "DOWN")]
    Down,
    #[serde(alias = "LEFT")]
    Left,
    #[serde(alias = "RIGHT")]
    Right,
}

impl Rotation {
    /// `true` when the panel's width and height are swapped on the canvas.
    pub fn is_quarter_turn(self) -> bool {
        matches!(self, Rotation::Left | Rotation::Right)
    }
}

// ── LedMatrix ─────────────────────────────────────────────────────────────────

/// One rectangular LED panel and its placement on the canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct LedMatrix {
    /// Panel width in LEDs, as wired.
    pub width: u32,
    /// Panel height in LEDs, as wired.
    pub height: u32,
    /// Supply current budget for the panel, in amps.
    pub power_limit_amps: f32,
    /// Canvas x offset of the panel's top-left corner.
    pub x: i32,
    /// Canvas y offset of the panel's top-left corner.
    pub y: i32,
    pub rotation: Rotation,
}

impl LedMatrix {
    /// Size of the canvas rectangle this panel covers, after rotation.
    pub fn footprint(&self) -> (u32, u32) {
        if self.rotation.is_quarter_turn() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }

    pub fn led_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes needed for the panel's packed RGB stream.
    pub fn packed_pixel_array_size(&self) -> usize {
        self.led_count() * BYTES_PER_PIXEL
    }

    /// Returns `true` if the footprint lies entirely inside a canvas of the
    /// given size.  Panels that do not fit are still packed; the missing
    /// part reads as black.
    pub fn fits_within(&self, canvas_width: u32, canvas_height: u32) -> bool {
        let (w, h) = self.footprint();
        self.x >= 0
            && self.y >= 0
            && self.x as i64 + w as i64 <= canvas_width as i64
            && self.y as i64 + h as i64 <= canvas_height as i64
    }
}

// ── PinConnection ─────────────────────────────────────────────────────────────

/// One GPIO pin and the chain of panels wired to it.
#[derive(Debug, Clone, PartialEq)]
pub struct PinConnection {
    pub pin: u8,
    pub color_order: ColorOrder,
    pub led_type: LedType,
    /// Panels in wiring order; their streams are concatenated.
    pub matrices: Vec<LedMatrix>,
}

impl PinConnection {
    /// Total LEDs on the strip.
    pub fn max_leds(&self) -> u32 {
        self.matrices
            .iter()
            .map(|m| m.led_count() as u64)
            .sum::<u64>()
            .min(u32::MAX as u64) as u32
    }

    /// Bytes in one full frame for this pin.
    pub fn packed_size(&self) -> usize {
        self.matrices.iter().map(LedMatrix::packed_pixel_array_size).sum()
    }

    pub fn pin_info(&self) -> PinInfo {
        PinInfo {
            pin_num: self.pin,
            color_order: self.color_order,
            max_leds: self.max_leds(),
            led_type: self.led_type,
        }
    }
}

// ── Device ────────────────────────────────────────────────────────────────────

/// A configured end-point and its full topology.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub mac: MacAddress,
    /// Human-readable label used in logs.
    pub name: String,
    /// Channel order of the pixel bytes the server sends to this device.
    pub channel_order: ColorOrder,
    pub pins: Vec<PinConnection>,
}

impl Device {
    /// Builds the SET_CONFIG payload sent right after check-in.
    pub fn set_config_message(&self) -> SetConfigMessage {
        SetConfigMessage {
            num_color_channels: NUM_COLOR_CHANNELS,
            pins: self.pins.iter().map(PinConnection::pin_info).collect(),
        }
    }

    pub fn total_leds(&self) -> u64 {
        self.pins.iter().map(|p| p.max_leds() as u64).sum()
    }

    pub fn pin(&self, pin: u8) -> Option<&PinConnection> {
        self.pins.iter().find(|p| p.pin == pin)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(width: u32, height: u32, rotation: Rotation) -> LedMatrix {
        LedMatrix {
            width,
            height,
            power_limit_amps: 2.0,
            x: 0,
            y: 0,
            rotation,
        }
    }

    #[test]
    fn test_mac_parses_colon_dash_and_bare_forms() {
        let expected = MacAddress::new([0xAA, 0xBB, 0xCC, 0x01, 0x02, 0x03]);
        assert_eq!("aa:bb:cc:01:02:03".parse::<MacAddress>(), Ok(expected));
        assert_eq!("AA-BB-CC-01-02-03".parse::<MacAddress>(), Ok(expected));
        assert_eq!("aabbcc010203".parse::<MacAddress>(), Ok(expected));
    }

    #[test]
    fn test_mac_rejects_bad_input() {
        assert!("aa:bb:cc".parse::<MacAddress>().is_err());
        assert!("zz:bb:cc:01:02:03".parse::<MacAddress>().is_err());
        assert!("aa:bb:cc:01:02:03:04".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_mac_display_is_lowercase_colon_form() {
        let mac = MacAddress::new([0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x0A]);
        assert_eq!(mac.to_string(), "de:ad:be:ef:00:0a");
    }

    #[test]
    fn test_footprint_swaps_for_quarter_turns() {
        assert_eq!(matrix(16, 8, Rotation::Up).footprint(), (16, 8));
        assert_eq!(matrix(16, 8, Rotation::Down).footprint(), (16, 8));
        assert_eq!(matrix(16, 8, Rotation::Left).footprint(), (8, 16));
        assert_eq!(matrix(16, 8, Rotation::Right).footprint(), (8, 16));
    }

    #[test]
    fn test_packed_pixel_array_size_is_rotation_independent() {
        assert_eq!(matrix(16, 8, Rotation::Up).packed_pixel_array_size(), 384);
        assert_eq!(matrix(16, 8, Rotation::Left).packed_pixel_array_size(), 384);
    }

    #[test]
    fn test_fits_within_accounts_for_rotation() {
        let mut m = matrix(16, 8, Rotation::Left);
        m.x = 24;
        assert!(m.fits_within(32, 16));
        m.rotation = Rotation::Up;
        assert!(!m.fits_within(32, 16));
    }

    #[test]
    fn test_pin_max_leds_sums_all_matrices() {
        let pin = PinConnection {
            pin: 18,
            color_order: ColorOrder::Grb,
            led_type: LedType::Ws2811,
            matrices: vec![matrix(16, 16, Rotation::Up), matrix(8, 8, Rotation::Down)],
        };
        assert_eq!(pin.max_leds(), 320);
        assert_eq!(pin.packed_size(), 960);
    }

    #[test]
    fn test_set_config_message_lists_every_pin() {
        let device = Device {
            mac: MacAddress::new([1, 2, 3, 4, 5, 6]),
            name: "wall-left".to_string(),
            channel_order: ColorOrder::Rgb,
            pins: vec![
                PinConnection {
                    pin: 18,
                    color_order: ColorOrder::Grb,
                    led_type: LedType::Ws2811,
                    matrices: vec![matrix(4, 2, Rotation::Up)],
                },
                PinConnection {
                    pin: 19,
                    color_order: ColorOrder::Grb,
                    led_type: LedType::Ws2811,
                    matrices: vec![],
                },
            ],
        };

        let msg = device.set_config_message();
        assert_eq!(msg.num_color_channels, 3);
        assert_eq!(msg.pins.len(), 2);
        assert_eq!(msg.pins[0].max_leds, 8);
        assert_eq!(msg.pins[1].max_leds, 0);
    }
}
