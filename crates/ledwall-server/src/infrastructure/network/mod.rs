//! Network infrastructure for the compositor server.
//!
//! # Sub-modules
//!
//! - **`link`** – [`TcpDeviceLink`], the TCP implementation of the
//!   application layer's `DeviceLink`: a shared write half plus a handle to
//!   the connection's reader task.
//!
//! - **`listener`** – Binds the first free port in the configured range,
//!   accepts devices, runs the CHECK_IN → SET_CONFIG handshake and registers
//!   each device in the connection registry.

pub mod link;
pub mod listener;

pub use link::TcpDeviceLink;
pub use listener::{bind_port_range, DeviceListener, HandshakeError, ListenerConfig, ListenerError};
