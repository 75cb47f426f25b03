//! Descriptor set layouts, pools and uniform-buffer writes.
//!
//! Mesh drawing uses a single set layout with two uniform-buffer bindings
//! read by the vertex stage:
//! - binding [`CAMERA_BINDING`]: view and projection matrices
//! - binding [`MODEL_BINDING`]: the per-object model matrix
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wrap_rhi::device::Device;
//! use wrap_rhi::descriptor::{DescriptorPool, DescriptorSetLayout};
//!
//! # fn example(device: Arc<Device>) -> Result<(), wrap_rhi::RhiError> {
//! let layout = DescriptorSetLayout::for_mesh(device.clone())?;
//! let pool = DescriptorPool::for_uniform_sets(device.clone(), 16)?;
//! let sets = pool.allocate(&[layout.handle(); 4])?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Binding slot of the camera uniform.
pub const CAMERA_BINDING: u32 = 0;
/// Binding slot of the per-object model uniform.
pub const MODEL_BINDING: u32 = 1;
/// Uniform descriptors consumed by one mesh set.
pub const UNIFORMS_PER_SET: u32 = 2;

/// Layout bindings for a mesh descriptor set.
pub fn mesh_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 2] {
    [
        uniform_buffer_binding(CAMERA_BINDING, vk::ShaderStageFlags::VERTEX),
        uniform_buffer_binding(MODEL_BINDING, vk::ShaderStageFlags::VERTEX),
    ]
}

#[inline]
pub fn uniform_buffer_binding(
    binding: u32,
    stage_flags: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding::default()
        .binding(binding)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(stage_flags)
}

/// Pool sizes for `set_count` mesh sets.
pub fn uniform_pool_sizes(set_count: u32) -> [vk::DescriptorPoolSize; 1] {
    [vk::DescriptorPoolSize::default()
        .ty(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(set_count.saturating_mul(UNIFORMS_PER_SET))]
}

/// Owned `VkDescriptorSetLayout`.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    /// Camera + model layout used by every mesh.
    pub fn for_mesh(device: Arc<Device>) -> RhiResult<Self> {
        Self::new(device, &mesh_bindings())
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Set layout destroyed");
    }
}

/// Pool of uniform-buffer descriptor sets. Sets are reclaimed in bulk by
/// [`DescriptorPool::reset`], never individually.
///
/// Not thread-safe. Sets allocated from it are released together by
/// [`reset`](Self::reset) or when the pool is dropped.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={}",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Pool able to hold `set_count` mesh sets.
    pub fn for_uniform_sets(device: Arc<Device>, set_count: u32) -> RhiResult<Self> {
        Self::new(device, set_count, &uniform_pool_sizes(set_count))
    }

    /// Allocates one set per layout in `layouts`.
    pub fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        if layouts.is_empty() {
            return Ok(Vec::new());
        }

        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };
        debug!("Allocated {} descriptor sets", sets.len());

        Ok(sets)
    }

    /// Returns every set to the pool.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())?;
        }
        debug!("Descriptor pool reset, all sets reclaimed");
        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Descriptor pool destroyed");
    }
}

/// Points a mesh set at its camera and model uniform buffers.
pub fn write_mesh_set(
    device: &Device,
    set: vk::DescriptorSet,
    camera: vk::DescriptorBufferInfo,
    model: vk::DescriptorBufferInfo,
) {
    let camera_info = [camera];
    let model_info = [model];
    let writes = [
        vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(CAMERA_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&camera_info),
        vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(MODEL_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&model_info),
    ];

    unsafe {
        device.handle().update_descriptor_sets(&writes, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_bindings_are_vertex_uniforms() {
        let bindings = mesh_bindings();
        assert_eq!(bindings[0].binding, CAMERA_BINDING);
        assert_eq!(bindings[1].binding, MODEL_BINDING);
        for binding in bindings {
            assert_eq!(binding.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
            assert_eq!(binding.descriptor_count, 1);
            assert_eq!(binding.stage_flags, vk::ShaderStageFlags::VERTEX);
        }
    }

    #[test]
    fn test_uniform_pool_sizes() {
        let [size] = uniform_pool_sizes(8);
        assert_eq!(size.ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(size.descriptor_count, 16);

        let [size] = uniform_pool_sizes(u32::MAX);
        assert_eq!(size.descriptor_count, u32::MAX);
    }
}
