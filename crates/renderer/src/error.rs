//! Error type for the renderer layer.

use thiserror::Error;
use wrap_rhi::RhiError;
use wrap_shader::ShaderError;

/// Errors surfaced by the renderer. All of them are fatal to the caller
/// except where a method documents otherwise.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Shader compilation failed while building the initial pipeline
    #[error(transparent)]
    Shader(#[from] ShaderError),

    /// Window or surface setup failed
    #[error(transparent)]
    Platform(#[from] wrap_core::Error),
}

pub type RenderResult<T> = std::result::Result<T, RenderError>;
