//! Domain module containing pure business logic with no I/O.
//!
//! - [`device`] – device identity and the static pin/panel topology.
//! - [`pixels`] – the RGB8 pixel buffer used by the canvas and the packer.

pub mod device;
pub mod pixels;
