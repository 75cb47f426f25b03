//! Window management using winit, plus Vulkan surface creation.

use std::ffi::c_char;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use wrap_core::{Error, Result, WindowConfig};

/// Owned Vulkan surface. The instance it came from must outlive it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: created by ash_window::create_surface from the same instance
        // as the loader, and destroyed only here.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// Framebuffer size plus the resize and close requests seen so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowState {
    size: (u32, u32),
    resized: bool,
    close_requested: bool,
}

impl WindowState {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            ..Default::default()
        }
    }

    /// Current framebuffer size in physical pixels.
    #[inline]
    pub fn framebuffer_size(&self) -> (u32, u32) {
        self.size
    }

    /// A zero-sized framebuffer cannot be rendered to.
    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.size.0 == 0 || self.size.1 == 0
    }

    /// Width over height, or 1.0 while minimized.
    pub fn aspect_ratio(&self) -> f32 {
        if self.is_minimized() {
            1.0
        } else {
            self.size.0 as f32 / self.size.1 as f32
        }
    }

    /// Records a resize event. Unchanged sizes are ignored.
    pub fn handle_resize(&mut self, width: u32, height: u32) {
        if (width, height) != self.size {
            self.size = (width, height);
            self.resized = true;
            tracing::debug!("Window resized: {}x{}", width, height);
        }
    }

    /// Returns and clears the pending-resize flag.
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    #[inline]
    pub fn should_close(&self) -> bool {
        self.close_requested
    }
}

/// Application window.
///
/// Its [`WindowState`] carries the pending-resize flag that the renderer
/// consumes before acquiring the next image.
pub struct Window {
    window: Arc<WinitWindow>,
    state: WindowState,
}

impl Window {
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        let size = window.inner_size();
        tracing::info!("Window created: {}x{}", size.width, size.height);

        Ok(Self {
            window: Arc::new(window),
            state: WindowState::new(size.width, size.height),
        })
    }

    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    #[inline]
    pub fn state(&self) -> &WindowState {
        &self.state
    }

    #[inline]
    pub fn state_mut(&mut self) -> &mut WindowState {
        &mut self.state
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Instance extensions needed to create a surface for this window.
    ///
    /// The pointers reference static strings owned by the Vulkan loader.
    pub fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
            .map_err(|e| Error::Surface(format!("Failed to enumerate required extensions: {}", e)))?;

        tracing::debug!(
            "Required Vulkan extensions for surface: {:?}",
            extensions
                .iter()
                // SAFETY: ash_window returns static, null-terminated names.
                .map(|&ext| unsafe { std::ffi::CStr::from_ptr(ext) })
                .collect::<Vec<_>>()
        );

        Ok(extensions.to_vec())
    }

    /// Creates a Vulkan surface for this window.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;

        // SAFETY: entry and instance are valid; the handles come from a live
        // winit window. Destruction happens in Surface::drop.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Surface(format!("Failed to create Vulkan surface: {}", e)))?
        };

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        tracing::info!("Vulkan surface created");

        Ok(Surface {
            handle,
            surface_loader,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_flag_is_taken_once() {
        let mut state = WindowState::new(800, 600);
        assert!(!state.take_resized());

        state.handle_resize(800, 600);
        assert!(!state.take_resized());

        state.handle_resize(1024, 768);
        assert_eq!(state.framebuffer_size(), (1024, 768));
        assert!(state.take_resized());
        assert!(!state.take_resized());
    }

    #[test]
    fn test_minimized_window() {
        let mut state = WindowState::new(800, 600);
        assert!((state.aspect_ratio() - 800.0 / 600.0).abs() < f32::EPSILON);

        state.handle_resize(0, 600);
        assert!(state.is_minimized());
        assert_eq!(state.aspect_ratio(), 1.0);
    }

    #[test]
    fn test_close_request() {
        let mut state = WindowState::new(1, 1);
        assert!(!state.should_close());
        state.request_close();
        assert!(state.should_close());
    }
}
