//! Infrastructure layer for the compositor server.
//!
//! Contains OS-facing adapters: TCP sockets, the wall clock, TOML
//! configuration and scene files, and image/frame loading.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `ledwall_core`, but MUST NOT be imported by the `application` layer.

pub mod clock;
pub mod media;
pub mod network;
pub mod storage;
