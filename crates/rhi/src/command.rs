//! Command pool and command buffer management.
//!
//! - [`CommandPool`] owns a VkCommandPool and hands out primary buffers
//! - [`CommandBuffer`] records commands into a pool-owned handle
//! - [`submit_one_time`] records, submits and waits for a throwaway buffer
//!
//! The renderer keeps one resettable buffer per frame slot:
//!
//! ```no_run
//! use std::sync::Arc;
//! use wrap_rhi::device::Device;
//! use wrap_rhi::command::{CommandPool, CommandBuffer};
//!
//! # fn example(device: Arc<Device>) -> Result<(), wrap_rhi::RhiError> {
//! let pool = CommandPool::new(device.clone(), device.graphics_family())?;
//! let cmd = CommandBuffer::new(device.clone(), &pool)?;
//!
//! cmd.begin()?;
//! // ... record rendering commands ...
//! cmd.end()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::RhiResult;

/// Owns a `VkCommandPool`. Buffers from one pool are recorded on one thread.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    queue_family_index: u32,
}

impl CommandPool {
    /// Creates a pool whose buffers can be reset individually, which the
    /// per-slot frame buffers rely on.
    ///
    /// # Arguments
    ///
    /// * `device` - Logical device the pool belongs to.
    /// * `queue_family_index` - Family of the queue the buffers will be
    ///   submitted to. Usually [`Device::graphics_family`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::RhiError::Vulkan`] if `vkCreateCommandPool` fails.
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        Self::with_flags(
            device,
            queue_family_index,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )
    }

    /// Creates a pool for short-lived one-shot buffers (uploads, readbacks).
    pub fn new_transient(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        Self::with_flags(
            device,
            queue_family_index,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                | vk::CommandPoolCreateFlags::TRANSIENT,
        )
    }

    fn with_flags(
        device: Arc<Device>,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(flags);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        info!(
            "Command pool created for queue family {} ({:?})",
            queue_family_index, flags
        );

        Ok(Self {
            device,
            pool,
            queue_family_index,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Allocates `count` primary command buffers.
    pub fn allocate_command_buffers(&self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        Ok(buffers)
    }

    /// Returns buffers to the pool.
    ///
    /// # Safety
    ///
    /// The buffers must have been allocated from this pool and must not be
    /// pending execution.
    pub unsafe fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        unsafe {
            self.device
                .handle()
                .free_command_buffers(self.pool, buffers);
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        info!(
            "Command pool destroyed for queue family {}",
            self.queue_family_index
        );
    }
}

/// A primary command buffer borrowed from a [`CommandPool`].
///
/// Does not own the handle; it is freed with the pool it came from.
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    pub fn new(device: Arc<Device>, pool: &CommandPool) -> RhiResult<Self> {
        let buffer = pool.allocate_command_buffers(1)?[0];
        Ok(Self { device, buffer })
    }

    /// Allocates `count` buffers at once, one per frame slot typically.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RhiError::Vulkan`] if the pool cannot provide
    /// `count` more buffers.
    pub fn allocate(device: &Arc<Device>, pool: &CommandPool, count: u32) -> RhiResult<Vec<Self>> {
        Ok(pool
            .allocate_command_buffers(count)?
            .into_iter()
            .map(|buffer| Self {
                device: device.clone(),
                buffer,
            })
            .collect())
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    // =========================================================================
    // Recording Control
    // =========================================================================

    /// Begins recording for a single submission.
    pub fn begin(&self) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }

        Ok(())
    }

    pub fn end(&self) -> RhiResult<()> {
        unsafe {
            self.device.handle().end_command_buffer(self.buffer)?;
        }

        Ok(())
    }

    /// Resets the buffer to the initial state so it can be re-recorded.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }

        Ok(())
    }

    // =========================================================================
    // Render Pass
    // =========================================================================

    /// Begins `render_pass` on `framebuffer`, clearing the single color
    /// attachment to `clear_color`.
    pub fn begin_render_pass(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        }];

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.device.handle().cmd_begin_render_pass(
                self.buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    pub fn end_render_pass(&self) {
        unsafe {
            self.device.handle().cmd_end_render_pass(self.buffer);
        }
    }

    // =========================================================================
    // Binding
    // =========================================================================

    pub fn bind_graphics_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe {
            self.device.handle().cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
    }

    pub fn bind_vertex_buffers(
        &self,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe {
            self.device.handle().cmd_bind_vertex_buffers(
                self.buffer,
                first_binding,
                buffers,
                offsets,
            );
        }
    }

    pub fn bind_index_buffer(
        &self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_index_buffer(self.buffer, buffer, offset, index_type);
        }
    }

    pub fn bind_graphics_descriptor_sets(
        &self,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                first_set,
                descriptor_sets,
                &[],
            );
        }
    }

    // =========================================================================
    // Dynamic State
    // =========================================================================

    /// Sets viewport 0 and scissor 0 to cover `extent`.
    pub fn set_viewport_and_scissor(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, &[viewport]);
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, &[scissor]);
        }
    }

    // =========================================================================
    // Draw / Transfer
    // =========================================================================

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.handle().cmd_draw_indexed(
                self.buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer(self.buffer, src, dst, regions);
        }
    }
}

/// Records `record` into a fresh buffer from `pool`, submits it to the
/// graphics queue and blocks until the queue is idle.
///
/// Only for work outside the frame loop: uploads and debug readbacks.
///
/// # Arguments
///
/// * `pool` - Pool for the throwaway buffer. Its family must be the
///   graphics family, since submission goes to the graphics queue.
/// * `record` - Records the commands. `begin` and `end` are called around
///   it.
///
/// # Errors
///
/// Returns any allocation, submission or wait failure. The buffer is freed
/// back to `pool` in every case.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use wrap_rhi::buffer::Buffer;
/// use wrap_rhi::command::{CommandPool, submit_one_time};
/// use wrap_rhi::device::Device;
/// use wrap_rhi::vk;
///
/// # fn example(device: Arc<Device>, pool: &CommandPool, src: &Buffer, dst: &Buffer)
/// # -> Result<(), wrap_rhi::RhiError> {
/// let region = vk::BufferCopy::default().size(src.size());
/// submit_one_time(&device, pool, |cmd| {
///     cmd.copy_buffer(src.handle(), dst.handle(), &[region]);
/// })?;
/// # Ok(())
/// # }
/// ```
pub fn submit_one_time(
    device: &Arc<Device>,
    pool: &CommandPool,
    record: impl FnOnce(&CommandBuffer),
) -> RhiResult<()> {
    let cmd = CommandBuffer::new(device.clone(), pool)?;

    let result = (|| {
        cmd.begin()?;
        record(&cmd);
        cmd.end()?;

        let command_buffers = [cmd.handle()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe { device.submit_graphics(&[submit_info], vk::Fence::null())? };
        device.wait_graphics_idle()
    })();

    // Either idle or never submitted, so the buffer is free to release.
    unsafe { pool.free_command_buffers(&[cmd.handle()]) };
    debug!("One-time command buffer completed");

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_buffer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandBuffer>();
    }

    #[test]
    fn test_command_pool_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandPool>();
    }
}
