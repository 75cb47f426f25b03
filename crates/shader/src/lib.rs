//! Runtime shader tooling for the wrap engine.
//!
//! - [`ShaderCompiler`] turns GLSL sources into SPIR-V with naga
//! - [`ShaderWatcher`] reports modified files in the shader directory

mod compiler;
mod error;
mod watcher;

pub use compiler::{
    MAX_INCLUDE_DEPTH, ShaderCompiler, ShaderKind, resolve_includes, spirv_path, strip_bom,
};
pub use error::{ShaderError, ShaderResult};
pub use watcher::{DEBOUNCE_WINDOW, Debouncer, ShaderWatcher};
