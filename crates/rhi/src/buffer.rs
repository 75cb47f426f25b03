//! GPU buffer management.
//!
//! - [`Buffer`] wraps a VkBuffer bound to gpu-allocator memory
//! - [`Buffer::upload_static`] stages data through host memory into a
//!   device-local buffer
//! - [`UniformBuffer`] is a persistently mapped, host-coherent buffer holding
//!   one `T`
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wrap_rhi::device::Device;
//! use wrap_rhi::command::CommandPool;
//! use wrap_rhi::buffer::{Buffer, BufferUsage};
//!
//! # fn example(device: Arc<Device>, pool: &CommandPool) -> Result<(), wrap_rhi::RhiError> {
//! let indices: [u16; 6] = [0, 1, 2, 2, 3, 0];
//! let index_buffer = Buffer::upload_static(
//!     &device,
//!     pool,
//!     BufferUsage::Index,
//!     bytemuck::cast_slice(&indices),
//! )?;
//! # Ok(())
//! # }
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::command::{CommandPool, submit_one_time};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::memory::{MemoryResidency, find_memory_type};

/// Buffer usage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
    /// Source of a staged upload
    Staging,
    /// Destination of a debug readback
    Readback,
}

impl BufferUsage {
    /// Vulkan usage flags. Vertex and index buffers are also transfer
    /// sources so their contents can be read back.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferUsage::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Staging => "staging",
            BufferUsage::Readback => "readback",
        }
    }
}

/// GPU buffer with gpu-allocator managed memory.
///
/// Dropping the buffer frees the allocation, then destroys the handle.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
    residency: MemoryResidency,
}

impl Buffer {
    /// Creates an uninitialised buffer.
    ///
    /// # Errors
    ///
    /// - [`RhiError::InvalidHandle`] for a zero size
    /// - [`RhiError::NoMatchingMemoryType`] if the device has no memory type
    ///   for `residency` among those the buffer accepts
    /// - [`RhiError::OutOfMemory`] if the allocation fails for lack of memory
    pub fn new(
        device: Arc<Device>,
        usage: BufferUsage,
        residency: MemoryResidency,
        size: vk::DeviceSize,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };

        match Self::allocate_and_bind(&device, buffer, usage, residency) {
            Ok(allocation) => {
                debug!(
                    "Created {} buffer: {} bytes ({:?})",
                    usage.name(),
                    size,
                    residency
                );
                Ok(Self {
                    device,
                    buffer,
                    allocation: Some(allocation),
                    size,
                    usage,
                    residency,
                })
            }
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                Err(e)
            }
        }
    }

    fn allocate_and_bind(
        device: &Device,
        buffer: vk::Buffer,
        usage: BufferUsage,
        residency: MemoryResidency,
    ) -> RhiResult<Allocation> {
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let memory_type = find_memory_type(
            device.memory_properties(),
            requirements.memory_type_bits,
            residency.property_flags(),
        )?;

        let allocation = device.allocator().allocate(&AllocationCreateDesc {
            name: usage.name(),
            requirements,
            location: residency.location(),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        debug!(
            "{} buffer eligible for memory type {}, allocator placed it in {:?}",
            usage.name(),
            memory_type,
            allocation.memory_properties()
        );

        let bound = unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            if let Err(free_err) = device.allocator().free(allocation) {
                error!("Failed to free allocation after bind failure: {:?}", free_err);
            }
            return Err(e.into());
        }

        Ok(allocation)
    }

    /// Host-visible buffer initialised with `data`.
    pub fn new_with_data(
        device: Arc<Device>,
        usage: BufferUsage,
        residency: MemoryResidency,
        data: &[u8],
    ) -> RhiResult<Self> {
        let buffer = Self::new(device, usage, residency, data.len() as vk::DeviceSize)?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Uploads `data` into a new device-local buffer.
    ///
    /// The bytes go into a host-coherent staging buffer first and are copied
    /// on the graphics queue with a one-shot command buffer. Blocks until the
    /// copy completes; the staging buffer is released before returning.
    pub fn upload_static(
        device: &Arc<Device>,
        pool: &CommandPool,
        usage: BufferUsage,
        data: &[u8],
    ) -> RhiResult<Self> {
        let staging = Self::new_with_data(
            device.clone(),
            BufferUsage::Staging,
            MemoryResidency::HostCoherent,
            data,
        )?;
        let destination = Self::new(
            device.clone(),
            usage,
            MemoryResidency::DeviceLocal,
            data.len() as vk::DeviceSize,
        )?;

        copy_buffer(device, pool, &staging, &destination, staging.size())?;

        debug!(
            "Uploaded {} bytes into device-local {} buffer",
            data.len(),
            usage.name()
        );
        Ok(destination)
    }

    /// Copies the buffer contents into host memory.
    ///
    /// Device-local buffers are copied through a temporary readback buffer.
    /// Blocks on the graphics queue; intended for tests and debugging.
    pub fn read_back(&self, pool: &CommandPool) -> RhiResult<Vec<u8>> {
        if self.residency.is_host_visible() {
            return self.read(0, self.size);
        }

        let readback = Self::new(
            self.device.clone(),
            BufferUsage::Readback,
            MemoryResidency::Readback,
            self.size,
        )?;
        copy_buffer(&self.device, pool, self, &readback, self.size)?;
        readback.read(0, self.size)
    }

    /// Writes into a host-visible buffer. Coherent memory, so no flush.
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let dst = self.mapped_range(offset, data.len() as vk::DeviceSize)?;

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    /// Reads `len` bytes from a host-visible buffer.
    pub fn read(&self, offset: vk::DeviceSize, len: vk::DeviceSize) -> RhiResult<Vec<u8>> {
        let src = self.mapped_range(offset, len)?;
        let mut out = vec![0u8; len as usize];

        unsafe {
            std::ptr::copy_nonoverlapping(src as *const u8, out.as_mut_ptr(), out.len());
        }

        Ok(out)
    }

    fn mapped_range(&self, offset: vk::DeviceSize, len: vk::DeviceSize) -> RhiResult<*mut u8> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.size)
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!(
                    "Access exceeds buffer size: offset {} + len {} > buffer {}",
                    offset, len, self.size
                ))
            })?;
        debug_assert!(end <= self.size);

        let allocation = self.allocation.as_ref().ok_or_else(|| {
            RhiError::InvalidHandle("Buffer allocation is not available".to_string())
        })?;

        let mapped_ptr = allocation
            .mapped_ptr()
            .ok_or_else(|| RhiError::InvalidHandle("Buffer memory is not mapped".to_string()))?;

        Ok(unsafe { (mapped_ptr.as_ptr() as *mut u8).add(offset as usize) })
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    #[inline]
    pub fn residency(&self) -> MemoryResidency {
        self.residency
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take()
            && let Err(e) = self.device.allocator().free(allocation)
        {
            error!("Failed to free buffer allocation: {:?}", e);
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed {} buffer", self.usage.name());
    }
}

/// Copies `size` bytes from `src` to `dst` on the graphics queue and waits.
pub fn copy_buffer(
    device: &Arc<Device>,
    pool: &CommandPool,
    src: &Buffer,
    dst: &Buffer,
    size: vk::DeviceSize,
) -> RhiResult<()> {
    if size > src.size() || size > dst.size() {
        return Err(RhiError::InvalidHandle(format!(
            "Copy of {} bytes exceeds source ({}) or destination ({})",
            size,
            src.size(),
            dst.size()
        )));
    }

    let region = vk::BufferCopy::default().size(size);
    submit_one_time(device, pool, |cmd| {
        cmd.copy_buffer(src.handle(), dst.handle(), &[region]);
    })
}

/// Persistently mapped uniform buffer holding a single `T`.
pub struct UniformBuffer<T: Pod> {
    buffer: Buffer,
    _marker: PhantomData<T>,
}

impl<T: Pod> UniformBuffer<T> {
    /// Size of `T` in bytes.
    pub const SIZE: vk::DeviceSize = std::mem::size_of::<T>() as vk::DeviceSize;

    /// Creates the buffer initialised to `initial`.
    pub fn new(device: Arc<Device>, initial: &T) -> RhiResult<Self> {
        let buffer = Buffer::new(
            device,
            BufferUsage::Uniform,
            MemoryResidency::HostCoherent,
            Self::SIZE,
        )?;
        buffer.write(0, bytemuck::bytes_of(initial))?;

        Ok(Self {
            buffer,
            _marker: PhantomData,
        })
    }

    /// Overwrites the contents. Visible to the GPU without a flush.
    pub fn write(&self, value: &T) -> RhiResult<()> {
        self.buffer.write(0, bytemuck::bytes_of(value))
    }

    /// Current contents as seen by the host.
    pub fn read(&self) -> RhiResult<T> {
        let bytes = self.buffer.read(0, Self::SIZE)?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Descriptor info covering the whole buffer.
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.buffer.handle())
            .offset(0)
            .range(Self::SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_usages_are_copy_targets() {
        for usage in [BufferUsage::Vertex, BufferUsage::Index] {
            let flags = usage.to_vk_usage();
            assert!(flags.contains(vk::BufferUsageFlags::TRANSFER_DST));
            assert!(flags.contains(vk::BufferUsageFlags::TRANSFER_SRC));
        }
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
    }

    #[test]
    fn test_transfer_roles() {
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
        assert_eq!(
            BufferUsage::Readback.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_DST
        );
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
    }

    #[test]
    fn test_uniform_size() {
        assert_eq!(UniformBuffer::<[f32; 16]>::SIZE, 64);
    }
}
