//! Pixel driver implementations.
//!
//! Hardware strip drivers are board specific and live outside this crate;
//! they implement [`PixelDriver`](crate::application::handle_commands::PixelDriver)
//! the same way these do.

pub mod logging;
pub mod mock;
