//! Application layer for the device.
//!
//! - **`handle_commands`** – Applies decoded server messages to the
//!   device's strip state and produces replies.  Hardware output goes
//!   through a `PixelDriver` and log text comes from a `LogSource`, both
//!   injected at construction time.

pub mod handle_commands;
