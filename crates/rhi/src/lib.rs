//! Vulkan ownership layer for the wrap engine.
//!
//! Every GPU handle is wrapped in a type whose `Drop` releases it exactly
//! once. Covers:
//! - Instance, physical device selection and the logical device
//! - Memory-type lookup and buffers (staged upload, mapped uniforms)
//! - Command pools and buffers, fences and semaphores
//! - Swapchain, render pass and framebuffers
//! - Descriptors, shader modules and the graphics pipeline

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod instance;
pub mod memory;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{RhiError, RhiResult};

pub use ash::vk;
