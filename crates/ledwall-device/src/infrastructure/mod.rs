//! Infrastructure layer for the device.
//!
//! Implements the application-layer seams: [`pixel_driver`] provides
//! `PixelDriver` implementations, [`log_buffer`] provides the `LogSource`
//! behind GET_LOGS, and [`network`] owns the connection to the server.
//!
//! Infrastructure depends on application, never the other way round.

pub mod log_buffer;
pub mod network;
pub mod pixel_driver;
