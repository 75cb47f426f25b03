//! Synchronization primitives.
//!
//! - [`Semaphore`] orders work between queue operations on the GPU
//! - [`Fence`] lets the host wait for submitted work to finish
//!
//! A frame slot reuses its fence: wait, reset, then submit with it again.
//!
//! ```no_run
//! use std::sync::Arc;
//! use wrap_rhi::device::Device;
//! use wrap_rhi::sync::Fence;
//!
//! # fn example(device: Arc<Device>) -> Result<(), wrap_rhi::RhiError> {
//! let slots = Fence::signaled_set(&device, 2)?;
//! for fence in &slots {
//!     // Returns at once: the fences start signaled.
//!     fence.wait(u64::MAX)?;
//!     fence.reset()?;
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Binary semaphore.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates an unsignaled binary semaphore.
    ///
    /// # Arguments
    ///
    /// * `device` - Logical device that owns the semaphore and destroys it
    ///   on drop.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RhiError::Vulkan`] if `vkCreateSemaphore` fails,
    /// typically on host or device memory exhaustion.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        Ok(Self { device, semaphore })
    }

    /// `count` independent semaphores.
    pub fn many(device: &Arc<Device>, count: usize) -> RhiResult<Vec<Self>> {
        (0..count).map(|_| Self::new(device.clone())).collect()
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Host-waitable fence.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence.
    ///
    /// # Arguments
    ///
    /// * `device` - Logical device that owns the fence.
    /// * `signaled` - Start in the signaled state. Frame-slot fences use
    ///   this so the first wait on a slot that was never submitted returns
    ///   immediately.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RhiError::Vulkan`] if `vkCreateFence` fails.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use wrap_rhi::device::Device;
    /// use wrap_rhi::sync::Fence;
    ///
    /// # fn example(device: Arc<Device>) -> Result<(), wrap_rhi::RhiError> {
    /// let upload_done = Fence::new(device, false)?;
    /// assert!(!upload_done.is_signaled()?);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self { device, fence })
    }

    /// One signaled fence per frame slot, so the first wait on each slot
    /// does not block.
    pub fn signaled_set(device: &Arc<Device>, count: usize) -> RhiResult<Vec<Self>> {
        (0..count).map(|_| Self::new(device.clone(), true)).collect()
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until signaled. `timeout` is in nanoseconds, `u64::MAX` waits
    /// forever.
    ///
    /// # Errors
    ///
    /// Returns `RhiError::Vulkan(vk::Result::TIMEOUT)` when the timeout
    /// elapses first, and `ERROR_DEVICE_LOST` if the GPU stopped responding.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .wait_for_fences(&[self.fence], true, timeout)?
        };
        Ok(())
    }

    /// Returns the fence to the unsignaled state. The fence must not be
    /// pending on a queue.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe { self.device.handle().reset_fences(&[self.fence])? };
        Ok(())
    }

    /// Non-blocking status query.
    pub fn is_signaled(&self) -> RhiResult<bool> {
        Ok(unsafe { self.device.handle().get_fence_status(self.fence)? })
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_objects_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
    }
}
