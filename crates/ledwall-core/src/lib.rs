//! # ledwall-core
//!
//! Shared library for the LED wall containing the binary wire protocol,
//! the static device topology model, and the RGB pixel buffer type.
//!
//! This crate is used by both the compositor server and the device client.
//! It performs no socket I/O of its own; the only async piece is
//! [`protocol::stream::read_frame`], which is generic over any
//! `tokio::io::AsyncRead`.
//!
//! # Architecture overview
//!
//! The LED wall is a grid of LED-matrix panels driven by small networked
//! devices.  A central server keeps one big virtual canvas, composites
//! images, carousels, videos and text onto it several times per second, then
//! slices the canvas into per-panel pixel streams and pushes them to the
//! devices over TCP.
//!
//! - **`protocol`** – How bytes travel over the network.  Every message is
//!   a little-endian, length-prefixed record: `[size:4][op_code:1][payload]`.
//!   Encoders compute the size themselves; decoders validate it before
//!   handing out a borrowed view of the payload.
//!
//! - **`domain`** – Device identity (MAC address), the physical topology
//!   (pins, panels, rotations) and the RGB pixel buffer shared by the
//!   canvas and the packer.

pub mod domain;
pub mod protocol;

pub use domain::device::{Device, LedMatrix, MacAddress, PinConnection, Rotation};
pub use domain::pixels::PixelBuffer;
pub use protocol::codec::{decode_message, encode_message, ProtocolError};
pub use protocol::messages::Message;
