//! Uniform buffer object definitions for shaders.
//!
//! These structures must match the GLSL uniform blocks in `shaders/` exactly.
//! All structures use `#[repr(C)]` for predictable memory layout and implement
//! `Pod` and `Zeroable` for safe byte casting.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use wrap_scene::Camera;

/// Camera uniform block, binding 0.
///
/// # Memory Layout
///
/// - Offset 0: view matrix (64 bytes)
/// - Offset 64: projection matrix (64 bytes)
/// - Total size: 128 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct CameraUbo {
    /// World to view space.
    pub view: Mat4,
    /// View to clip space, Y already flipped for Vulkan.
    pub proj: Mat4,
}

impl CameraUbo {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(view: Mat4, proj: Mat4) -> Self {
        Self { view, proj }
    }

    pub fn from_camera(camera: &Camera) -> Self {
        Self::new(camera.view_matrix(), camera.projection_matrix())
    }
}

impl Default for CameraUbo {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

/// Per-mesh uniform block, binding 1.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ModelUbo {
    pub model: Mat4,
}

impl ModelUbo {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(model: Mat4) -> Self {
        Self { model }
    }
}

impl Default for ModelUbo {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY)
    }
}
