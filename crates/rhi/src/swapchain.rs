//! Swapchain management.
//!
//! [`Swapchain`] owns the presentable images, one image view and one
//! framebuffer per image, and the render pass the framebuffers are built
//! against. Recreation builds a complete replacement chain first and swaps
//! it in, so callers never observe a half-destroyed state.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use ash::vk;
//! # use wrap_rhi::{device::Device, instance::Instance, swapchain::{AcquireOutcome, Swapchain}};
//! # fn example(instance: &Instance, device: Arc<Device>, surface: vk::SurfaceKHR, sem: vk::Semaphore)
//! # -> Result<(), wrap_rhi::RhiError> {
//! let mut swapchain = Swapchain::new(instance, device, surface, (800, 600))?;
//!
//! match swapchain.acquire_next_image(sem)? {
//!     AcquireOutcome::Acquired { image_index, .. } => { /* record into framebuffer(image_index) */ }
//!     AcquireOutcome::OutOfDate => {
//!         swapchain.recreate((800, 600))?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::render_pass::RenderPass;

/// What the surface supports for swapchain creation.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// At least one format and one present mode are required.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Result of [`Swapchain::acquire_next_image`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready. A suboptimal swapchain is still usable.
    Acquired { image_index: u32, suboptimal: bool },
    /// The surface changed; the swapchain must be recreated.
    OutOfDate,
}

/// Result of [`Swapchain::present`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    /// Whether the swapchain should be rebuilt before the next frame.
    #[inline]
    pub fn needs_recreate(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

/// One generation of swapchain state. Dropping it destroys the
/// framebuffers, the views and the swapchain handle, in that order.
struct Chain {
    device: Arc<Device>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Drop for Chain {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.handle().destroy_framebuffer(framebuffer, None);
            }
            for &view in &self.image_views {
                self.device.handle().destroy_image_view(view, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.swapchain, None);
            }
        }
        debug!(
            "Swapchain chain destroyed ({}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}

/// Vulkan swapchain with its image views, framebuffers and render pass.
///
/// Not thread-safe; drive it from the frame loop thread.
pub struct Swapchain {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    // Field order: the chain's framebuffers go before the render pass.
    chain: Chain,
    render_pass: RenderPass,
}

impl Swapchain {
    /// Creates the swapchain for `surface`.
    ///
    /// `framebuffer_size` is only used when the surface leaves the extent up
    /// to the application.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        framebuffer_size: (u32, u32),
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        let support =
            SwapchainSupportDetails::query(device.physical_device(), surface, &surface_loader)?;
        let format = choose_surface_format(&support.formats)?;
        let render_pass = RenderPass::new(device.clone(), format.format)?;

        let chain = build_chain(
            &device,
            &swapchain_loader,
            surface,
            &support,
            &render_pass,
            framebuffer_size,
            vk::SwapchainKHR::null(),
        )?;

        Ok(Self {
            device,
            swapchain_loader,
            surface_loader,
            surface,
            chain,
            render_pass,
        })
    }

    /// Rebuilds the swapchain after a resize or an out-of-date result.
    ///
    /// Waits for the device to go idle, re-queries surface support and builds
    /// a new chain from the old handle. The render pass is rebuilt only if
    /// the surface format changed. On error the previous chain stays in
    /// place. Returns true if the render pass was replaced.
    pub fn recreate(&mut self, framebuffer_size: (u32, u32)) -> RhiResult<bool> {
        self.device.wait_idle()?;

        info!(
            "Recreating swapchain for framebuffer size {}x{}",
            framebuffer_size.0, framebuffer_size.1
        );

        let support = SwapchainSupportDetails::query(
            self.device.physical_device(),
            self.surface,
            &self.surface_loader,
        )?;
        let format = choose_surface_format(&support.formats)?;

        let new_render_pass = if format.format != self.render_pass.format() {
            warn!(
                "Surface format changed {:?} -> {:?}, rebuilding render pass",
                self.render_pass.format(),
                format.format
            );
            Some(RenderPass::new(self.device.clone(), format.format)?)
        } else {
            None
        };

        let chain = build_chain(
            &self.device,
            &self.swapchain_loader,
            self.surface,
            &support,
            new_render_pass.as_ref().unwrap_or(&self.render_pass),
            framebuffer_size,
            self.chain.swapchain,
        )?;

        // Old framebuffers reference the old render pass, so retire the chain first.
        let old_chain = std::mem::replace(&mut self.chain, chain);
        drop(old_chain);

        let render_pass_changed = new_render_pass.is_some();
        if let Some(render_pass) = new_render_pass {
            self.render_pass = render_pass;
        }

        Ok(render_pass_changed)
    }

    /// Requests the next image, signalling `semaphore` once it is available.
    ///
    /// `ERROR_OUT_OF_DATE_KHR` is reported as [`AcquireOutcome::OutOfDate`];
    /// every other failure is an error.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RhiResult<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.chain.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(RhiError::Vulkan(e)),
        }
    }

    /// Queues `image_index` for presentation once `wait_semaphore` signals.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<PresentOutcome> {
        let swapchains = [self.chain.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain_loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(RhiError::Vulkan(e)),
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.chain.swapchain
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.chain.format.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.chain.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.chain.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.chain.images.len() as u32
    }

    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    /// Framebuffer for the acquired image.
    ///
    /// # Panics
    ///
    /// Panics if `image_index` is out of bounds.
    #[inline]
    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.chain.framebuffers[image_index as usize]
    }
}

fn build_chain(
    device: &Arc<Device>,
    loader: &ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    support: &SwapchainSupportDetails,
    render_pass: &RenderPass,
    framebuffer_size: (u32, u32),
    old_swapchain: vk::SwapchainKHR,
) -> RhiResult<Chain> {
    if !support.is_adequate() {
        return Err(RhiError::Swapchain(
            "Inadequate swapchain support (no formats or present modes)".to_string(),
        ));
    }

    let format = choose_surface_format(&support.formats)?;
    let present_mode = choose_present_mode(&support.present_modes);
    let extent = choose_extent(&support.capabilities, framebuffer_size);
    let image_count = determine_image_count(&support.capabilities, present_mode);

    if extent.width == 0 || extent.height == 0 {
        return Err(RhiError::Swapchain(format!(
            "Cannot create a {}x{} swapchain",
            extent.width, extent.height
        )));
    }

    info!(
        "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images",
        extent.width, extent.height, format.format, present_mode, image_count
    );

    let queue_families = device.queue_families();
    let family_indices: Vec<u32> = queue_families.unique_families();
    let (sharing_mode, shared_families) = if family_indices.len() > 1 {
        debug!("Using CONCURRENT sharing across queue families {:?}", family_indices);
        (vk::SharingMode::CONCURRENT, family_indices.as_slice())
    } else {
        (vk::SharingMode::EXCLUSIVE, &[][..])
    };

    let create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(surface)
        .min_image_count(image_count)
        .image_format(format.format)
        .image_color_space(format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(sharing_mode)
        .queue_family_indices(shared_families)
        .pre_transform(support.capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);

    let swapchain = unsafe { loader.create_swapchain(&create_info, None)? };

    // From here on the partially built chain cleans up after itself.
    let mut chain = Chain {
        device: device.clone(),
        loader: loader.clone(),
        swapchain,
        images: Vec::new(),
        image_views: Vec::new(),
        framebuffers: Vec::new(),
        format,
        extent,
        present_mode,
    };

    chain.images = unsafe { loader.get_swapchain_images(swapchain)? };

    for (i, &image) in chain.images.iter().enumerate() {
        let view = create_image_view(device, image, format.format).map_err(|e| {
            RhiError::Swapchain(format!("Failed to create image view {}: {:?}", i, e))
        })?;
        chain.image_views.push(view);
    }

    for &view in &chain.image_views {
        let attachments = [view];
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let framebuffer = unsafe { device.handle().create_framebuffer(&create_info, None)? };
        chain.framebuffers.push(framebuffer);
    }

    info!("Swapchain created with {} images", chain.images.len());
    Ok(chain)
}

fn create_image_view(device: &Device, image: vk::Image, format: vk::Format) -> RhiResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .level_count(1)
                .layer_count(1),
        );

    Ok(unsafe { device.handle().create_image_view(&create_info, None)? })
}

/// Prefers B8G8R8A8_SRGB with SRGB_NONLINEAR, else the first reported format.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> RhiResult<vk::SurfaceFormatKHR> {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = preferred {
        return Ok(format);
    }

    let first = formats
        .first()
        .copied()
        .ok_or_else(|| RhiError::Swapchain("Surface reports no formats".to_string()))?;
    warn!("Preferred surface format unavailable, using {:?}", first.format);
    Ok(first)
}

/// Prefers MAILBOX (low latency, no tearing). FIFO is always available.
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Uses the surface's current extent unless it is the `u32::MAX` sentinel,
/// in which case the framebuffer size is clamped to the surface limits.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer_size: (u32, u32),
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let (width, height) = framebuffer_size;
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Three images for MAILBOX, otherwise `min + 1`, clamped to the surface's
/// `[min, max]` (`max == 0` means no upper bound).
pub fn determine_image_count(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    present_mode: vk::PresentModeKHR,
) -> u32 {
    let preferred = if present_mode == vk::PresentModeKHR::MAILBOX {
        3
    } else {
        capabilities.min_image_count + 1
    };

    let count = preferred.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}
