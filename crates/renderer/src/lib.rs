//! Rendering layer of the wrap engine.
//!
//! - [`FrameScheduler`]: frames in flight, acquire/submit/present
//! - [`PipelineManager`]: the graphics pipeline and shader hot reload
//! - [`ResourceSet`]: mesh buffers, uniform buffers and descriptor sets
//! - [`Renderer`]: owns all of the above plus the device

mod error;
mod hot_reload;

pub mod frame_scheduler;
pub mod pipeline_manager;
pub mod renderer;
pub mod resource_set;
pub mod ubo;

pub use error::{RenderError, RenderResult};
pub use frame_scheduler::{FrameOutcome, FrameScheduler};
pub use hot_reload::ShaderReload;
pub use pipeline_manager::{PipelineManager, RebuildOutcome};
pub use renderer::{DeviceContext, Renderer};
pub use resource_set::ResourceSet;
pub use ubo::{CameraUbo, ModelUbo};

/// Maximum number of frames that can be in flight simultaneously.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
