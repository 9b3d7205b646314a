//! ledwall-device library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! The device is the receiving end of the LED wall.  It:
//!
//! 1. Connects to the server, trying each port of a configured range.
//! 2. Sends CHECK_IN with its MAC address.
//! 3. Receives SET_CONFIG and allocates one staging buffer per pin.
//! 4. Stages SET_LEDS / SET_LEDS_BATCHED pixel data and latches it onto the
//!    strips on REDRAW, through a [`PixelDriver`](application::handle_commands::PixelDriver).
//! 5. Answers GET_LOGS and GET_STATUS with SEND_LOGS.

/// Application layer: the command handler and its driver seam.
pub mod application;

/// Infrastructure layer: server connection, pixel drivers, log capture.
pub mod infrastructure;
