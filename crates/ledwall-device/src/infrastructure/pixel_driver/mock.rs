//! Mock pixel driver for unit testing.
//!
//! Records every call in `Mutex<Vec<...>>` fields so tests can inspect
//! exactly what reached the "hardware" and in what order.
//!
//! Set `should_fail = true` to make every call return
//! [`DriverError::Hardware`].

use std::sync::Mutex;

use ledwall_core::protocol::PinInfo;

use crate::application::handle_commands::{DriverError, PixelDriver};

#[derive(Default)]
pub struct MockPixelDriver {
    /// One entry per `configure` call.
    pub configured: Mutex<Vec<Vec<PinInfo>>>,
    /// One `(pin, pixels)` entry per `show` call.
    pub shown: Mutex<Vec<(u8, Vec<u8>)>>,
    pub should_fail: bool,
}

impl MockPixelDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PixelDriver for MockPixelDriver {
    fn configure(&self, pins: &[PinInfo]) -> Result<(), DriverError> {
        if self.should_fail {
            return Err(DriverError::Hardware("mock failure".into()));
        }
        self.configured
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(pins.to_vec());
        Ok(())
    }

    fn show(&self, pin: u8, pixels: &[u8]) -> Result<(), DriverError> {
        if self.should_fail {
            return Err(DriverError::Hardware("mock failure".into()));
        }
        self.shown
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((pin, pixels.to_vec()));
        Ok(())
    }
}
