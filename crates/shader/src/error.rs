use std::path::PathBuf;

use thiserror::Error;

/// Errors from shader compilation and watching.
#[derive(Error, Debug)]
pub enum ShaderError {
    #[error("Failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file extension does not name a shader stage.
    #[error("Cannot infer shader stage from {0:?}")]
    UnknownStage(PathBuf),

    /// The stage is recognised but the GLSL backend cannot compile it.
    #[error("{0} shaders are not supported by the compiler")]
    UnsupportedStage(&'static str),

    #[error("Failed to parse {name}: {message}")]
    Parse { name: String, message: String },

    #[error("Validation failed for {name}: {message}")]
    Validation { name: String, message: String },

    #[error("SPIR-V generation failed for {name}: {message}")]
    Codegen { name: String, message: String },

    #[error("Include <{name}> not found at {path:?}")]
    IncludeNotFound { name: String, path: PathBuf },

    #[error("Includes nested deeper than {0} levels")]
    IncludeTooDeep(usize),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

pub type ShaderResult<T> = std::result::Result<T, ShaderError>;
