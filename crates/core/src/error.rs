//! Error types shared by the engine crates that sit above the RHI.

use thiserror::Error;

/// Failures outside the GPU API: windowing, files and configuration.
#[derive(Error, Debug)]
pub enum Error {
    #[error("window: {0}")]
    Window(String),

    /// The window could not produce a Vulkan surface or its extension list.
    #[error("surface: {0}")]
    Surface(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Unparseable TOML, or values rejected by validation.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
