//! Driver that only logs what it would display.
//!
//! Used by the `ledwall-device` binary on hosts without LED hardware, which
//! makes it a software stand-in for a wall when testing a server setup.

use std::sync::atomic::{AtomicU64, Ordering};

use ledwall_core::protocol::PinInfo;
use tracing::{debug, info};

use crate::application::handle_commands::{DriverError, PixelDriver};

/// Every this many frames per pin, a frame is logged at `info`.
const INFO_EVERY: u64 = 100;

#[derive(Debug, Default)]
pub struct LoggingPixelDriver {
    frames: AtomicU64,
}

impl LoggingPixelDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total `show` calls so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl PixelDriver for LoggingPixelDriver {
    fn configure(&self, pins: &[PinInfo]) -> Result<(), DriverError> {
        for p in pins {
            info!(
                "strip on pin {}: {} LEDs, {:?}, {:?}",
                p.pin_num, p.max_leds, p.led_type, p.color_order
            );
        }
        Ok(())
    }

    fn show(&self, pin: u8, pixels: &[u8]) -> Result<(), DriverError> {
        let n = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        let first = pixels.get(..3).unwrap_or(&[]);
        if n % INFO_EVERY == 0 {
            info!("pin {pin}: frame {n}, {} bytes, first pixel {first:?}", pixels.len());
        } else {
            debug!("pin {pin}: {} bytes, first pixel {first:?}", pixels.len());
        }
        Ok(())
    }
}
