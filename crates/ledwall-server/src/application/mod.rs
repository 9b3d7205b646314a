//! Application layer use cases for the compositor server.
//!
//! Everything here depends on `ledwall_core` and on traits declared in this
//! layer.  Sockets, files and the wall clock live in `infrastructure` and are
//! injected at construction time, so each use case can be driven from a
//! unit test with recording doubles.
//!
//! # Sub-modules
//!
//! - **`manage_devices`** – The static device table, the [`DeviceLink`]
//!   seam over a device socket, and the connection registry that tracks
//!   which devices are online.
//!
//! - **`element`** / **`canvas`** – Visual layers and their composition into
//!   one pixel buffer.
//!
//! - **`packing`** – Pure functions turning a canvas region into the byte
//!   stream a physical panel expects.
//!
//! - **`dispatch`** – Packs and sends one frame to every connected device,
//!   demoting devices whose socket fails.
//!
//! - **`scheduler`** – The phase-locked frame loop and its event queue.
//!
//! [`DeviceLink`]: manage_devices::DeviceLink

pub mod canvas;
pub mod dispatch;
pub mod element;
pub mod manage_devices;
pub mod packing;
pub mod scheduler;
