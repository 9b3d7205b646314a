//! Storage infrastructure: configuration and scene files.
//!
//! - **`config`** – The server's TOML configuration: listener, canvas,
//!   dispatch policy and the static device topology.
//!
//! - **`scene`** – The TOML scene file listing the elements to place on the
//!   canvas, and the loader that turns it into application elements.

pub mod config;
pub mod scene;

pub use config::{load_config, ConfigError, ServerConfig};
pub use scene::{load_scene, SceneConfig};
