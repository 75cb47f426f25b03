//! Core utilities shared by the wrap engine crates.
//!
//! - Error types and result aliases
//! - Logging initialization
//! - TOML-backed engine configuration
//! - Frame timing

mod config;
mod error;
mod logging;
mod timer;

pub use config::{
    CONFIG_ENV_VAR, DEFAULT_CONFIG_FILE, EngineConfig, LoggingConfig, RenderConfig, ShaderConfig,
    WindowConfig,
};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::FrameTimer;
