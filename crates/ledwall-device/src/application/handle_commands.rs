//! CommandHandler: applies server messages to the device's strips.
//!
//! Pixel writes are staged per pin and only reach the hardware on REDRAW,
//! so a multi-pin frame latches all at once.  The hardware itself sits
//! behind the [`PixelDriver`] trait; implementations live in the
//! infrastructure layer.

use std::collections::BTreeMap;
use std::sync::Arc;

use ledwall_core::protocol::{
    encode_send_logs, ColorOrder, LedType, Message, OpCode, PinInfo, ProtocolError,
    BYTES_PER_PIXEL, HEADER_SIZE, MAX_MESSAGE_SIZE,
};
use ledwall_core::MacAddress;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Most LEDs one pin may declare: the largest pixel stream a single
/// SET_LEDS message can carry.
pub const MAX_LEDS_PER_PIN: u32 = ((MAX_MESSAGE_SIZE - HEADER_SIZE - 1) / BYTES_PER_PIXEL) as u32;

/// Error reported by a pixel driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver error: {0}")]
    Hardware(String),
}

/// Error type for command handling.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("SET_CONFIG with no pins")]
    NoPins,

    #[error("pin {pin} declares {max_leds} LEDs; at most {limit} are supported", limit = MAX_LEDS_PER_PIN)]
    TooManyLeds { pin: u8, max_leds: u32 },

    #[error("pixel data for unconfigured pin {0}")]
    UnconfiguredPin(u8),

    #[error("no strips configured")]
    NotConfigured,

    #[error("{0:?} is not a server command")]
    Unexpected(OpCode),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("could not encode reply: {0}")]
    Encode(#[from] ProtocolError),
}

/// Hardware seam: accepts a flat RGB byte sequence per pin and displays it.
pub trait PixelDriver: Send + Sync {
    /// Prepares the strips described by `pins`, replacing any previous set.
    fn configure(&self, pins: &[PinInfo]) -> Result<(), DriverError>;

    /// Displays `pixels` (`max_leds * 3` bytes) on `pin`.
    fn show(&self, pin: u8, pixels: &[u8]) -> Result<(), DriverError>;
}

/// Source of buffered log text for GET_LOGS.
pub trait LogSource: Send + Sync {
    /// Returns and clears everything buffered so far.
    fn drain(&self) -> String;
}

/// One configured strip and its staged pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strip {
    pub color_order: ColorOrder,
    pub led_type: LedType,
    pub max_leds: u32,
    /// Always `max_leds * 3` bytes.
    pub staged: Vec<u8>,
}

impl Strip {
    fn new(info: &PinInfo) -> Result<Self, CommandError> {
        let too_many = CommandError::TooManyLeds {
            pin: info.pin_num,
            max_leds: info.max_leds,
        };
        if info.max_leds > MAX_LEDS_PER_PIN {
            return Err(too_many);
        }
        let len = usize::try_from(info.max_leds)
            .ok()
            .and_then(|n| n.checked_mul(BYTES_PER_PIXEL))
            .ok_or(too_many)?;
        Ok(Self {
            color_order: info.color_order,
            led_type: info.led_type,
            max_leds: info.max_leds,
            staged: vec![0; len],
        })
    }

    /// Copies whole pixels from `data`, dropping anything past the strip.
    fn stage(&mut self, data: &[u8]) -> usize {
        let whole = data.len() / BYTES_PER_PIXEL * BYTES_PER_PIXEL;
        let n = whole.min(self.staged.len());
        self.staged[..n].copy_from_slice(&data[..n]);
        n / BYTES_PER_PIXEL
    }
}

/// The device command use case.
pub struct CommandHandler {
    mac: MacAddress,
    driver: Arc<dyn PixelDriver>,
    logs: Arc<dyn LogSource>,
    strips: BTreeMap<u8, Strip>,
    brightness: u8,
    redraws: u64,
    /// Scratch buffer for brightness scaling.
    scaled: Vec<u8>,
}

impl CommandHandler {
    pub fn new(mac: MacAddress, driver: Arc<dyn PixelDriver>, logs: Arc<dyn LogSource>) -> Self {
        Self {
            mac,
            driver,
            logs,
            strips: BTreeMap::new(),
            brightness: u8::MAX,
            redraws: 0,
            scaled: Vec::new(),
        }
    }

    pub fn strip(&self, pin: u8) -> Option<&Strip> {
        self.strips.get(&pin)
    }

    pub fn strip_count(&self) -> usize {
        self.strips.len()
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    /// Applies one decoded message.
    ///
    /// Returns the encoded reply, if the message asks for one.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the message cannot be applied.  The
    /// handler's state stays usable either way.
    pub fn handle(&mut self, msg: &Message<'_>) -> Result<Option<Vec<u8>>, CommandError> {
        match msg {
            Message::SetConfig(config) => self.set_config(&config.pins).map(|()| None),
            Message::SetLeds(m) => self.set_leds(m.gpio_pin, m.pixel_data).map(|()| None),
            Message::SetLedsBatched(entries) => {
                for entry in entries {
                    self.set_leds(entry.gpio_pin, entry.pixel_data)?;
                }
                Ok(None)
            }
            Message::Redraw => self.redraw().map(|()| None),
            Message::SetBrightness(level) => {
                self.brightness = *level;
                info!("brightness set to {level}");
                Ok(None)
            }
            Message::GetLogs => Ok(Some(encode_send_logs(&self.logs.drain())?)),
            Message::GetStatus => Ok(Some(encode_send_logs(&self.status_line())?)),
            Message::CheckIn(_) | Message::SendLogs(_) => {
                Err(CommandError::Unexpected(msg.op_code()))
            }
        }
    }

    fn set_config(&mut self, pins: &[PinInfo]) -> Result<(), CommandError> {
        self.strips.clear();
        if pins.is_empty() {
            return Err(CommandError::NoPins);
        }

        let mut active = Vec::with_capacity(pins.len());
        let mut strips = BTreeMap::new();
        for info in pins {
            if info.max_leds == 0 {
                warn!("pin {} has no LEDs; skipping", info.pin_num);
                continue;
            }
            strips.insert(info.pin_num, Strip::new(info)?);
            active.push(*info);
        }
        self.driver.configure(&active)?;
        self.strips = strips;
        info!("configured {} strip(s)", self.strips.len());
        Ok(())
    }

    fn set_leds(&mut self, pin: u8, data: &[u8]) -> Result<(), CommandError> {
        let strip = self
            .strips
            .get_mut(&pin)
            .ok_or(CommandError::UnconfiguredPin(pin))?;
        let written = strip.stage(data);
        if written * BYTES_PER_PIXEL < data.len() {
            debug!(
                "pin {pin}: {} byte(s) beyond {} LEDs dropped",
                data.len() - written * BYTES_PER_PIXEL,
                strip.max_leds
            );
        }
        Ok(())
    }

    fn redraw(&mut self) -> Result<(), CommandError> {
        if self.strips.is_empty() {
            return Err(CommandError::NotConfigured);
        }
        for (&pin, strip) in &self.strips {
            if self.brightness == u8::MAX {
                self.driver.show(pin, &strip.staged)?;
            } else {
                let level = self.brightness as u16;
                self.scaled.clear();
                self.scaled
                    .extend(strip.staged.iter().map(|&b| (b as u16 * level / 255) as u8));
                self.driver.show(pin, &self.scaled)?;
            }
        }
        self.redraws += 1;
        Ok(())
    }

    /// One-line summary sent in reply to GET_STATUS.
    pub fn status_line(&self) -> String {
        let leds: u64 = self.strips.values().map(|s| s.max_leds as u64).sum();
        format!(
            "status mac={} strips={} leds={leds} brightness={} redraws={}",
            self.mac,
            self.strips.len(),
            self.brightness,
            self.redraws
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
