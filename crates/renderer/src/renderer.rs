//! Main renderer orchestration.
//!
//! [`Renderer`] owns every GPU object the engine uses and wires the frame
//! scheduler, pipeline manager and resource set together. The window stays
//! with the caller and is passed in at creation and once per frame.

use std::sync::Arc;

use ash::vk;
use glam::Mat4;
use tracing::{error, info, warn};

use wrap_core::EngineConfig;
use wrap_platform::{Surface, Window, WindowState};
use wrap_rhi::command::{CommandBuffer, CommandPool};
use wrap_rhi::descriptor::DescriptorSetLayout;
use wrap_rhi::device::Device;
use wrap_rhi::instance::Instance;
use wrap_rhi::physical_device::{PhysicalDeviceInfo, select_physical_device};
use wrap_rhi::swapchain::Swapchain;
use wrap_rhi::sync::Fence;
use wrap_rhi::RhiResult;
use wrap_scene::Mesh;
use wrap_shader::ShaderCompiler;

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::error::RenderResult;
use crate::frame_scheduler::{
    FrameContext, FrameOutcome, FrameRecorder, FrameScheduler, VulkanFrameTarget,
};
use crate::hot_reload::ShaderReload;
use crate::pipeline_manager::{PipelineManager, RebuildOutcome, VulkanPipelineFactory};
use crate::resource_set::ResourceSet;
use crate::ubo::{CameraUbo, ModelUbo};

/// Instance, surface and device.
///
/// Fields drop in declaration order: the device, then the surface, then
/// the instance (which tears down the debug messenger first).
pub struct DeviceContext {
    device: Arc<Device>,
    physical_device: PhysicalDeviceInfo,
    surface: Surface,
    instance: Instance,
}

impl DeviceContext {
    /// Creates the instance with the window's extensions, a surface for the
    /// window, and a device on the best GPU that can present to it.
    pub fn initialize(window: &Window, enable_validation: bool) -> RenderResult<Self> {
        let extensions = window.required_extensions()?;
        let instance = Instance::new(&extensions, enable_validation)?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical_device =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device)?;

        Ok(Self {
            device,
            physical_device,
            surface,
            instance,
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    #[inline]
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }
}

/// Records one frame: uniform updates, then every mesh in one render pass.
struct MeshRecorder<'a> {
    command_buffers: &'a [CommandBuffer],
    pipelines: &'a PipelineManager<VulkanPipelineFactory>,
    resources: &'a ResourceSet,
    camera: &'a CameraUbo,
    model_transforms: &'a [Mat4],
    clear_color: [f32; 4],
}

impl FrameRecorder for MeshRecorder<'_> {
    fn record(&mut self, frame: &FrameContext) -> RhiResult<vk::CommandBuffer> {
        // The slot's fence has signaled, so its uniforms are no longer read.
        self.resources.update_camera(frame.slot, self.camera)?;
        for (index, transform) in self.model_transforms.iter().enumerate() {
            self.resources
                .update_model(frame.slot, index, &ModelUbo::new(*transform))?;
        }

        let cmd = &self.command_buffers[frame.slot];
        let state = self.pipelines.lock();
        let pipeline = state.pipeline();

        cmd.reset()?;
        cmd.begin()?;
        cmd.begin_render_pass(
            frame.render_pass,
            frame.framebuffer,
            frame.extent,
            self.clear_color,
        );
        cmd.bind_graphics_pipeline(pipeline.handle());
        cmd.set_viewport_and_scissor(frame.extent);
        self.resources
            .record_draws(cmd, frame.slot, pipeline.layout());
        cmd.end_render_pass();
        cmd.end()?;

        Ok(cmd.handle())
    }
}

/// The rendering engine.
///
/// # Resource Destruction Order
///
/// `Drop` waits for the device to go idle, then fields drop in declaration
/// order:
/// 1. Slot fences and command buffers
/// 2. Frame target (semaphores, framebuffers, views, swapchain, render pass)
/// 3. Mesh buffers, uniform buffers and the descriptor pool
/// 4. Pipeline, pipeline layout and descriptor set layout
/// 5. Command pool
/// 6. Device, surface, instance
pub struct Renderer {
    frames: FrameScheduler<Fence>,
    command_buffers: Vec<CommandBuffer>,
    target: VulkanFrameTarget,
    resources: ResourceSet,
    pipelines: PipelineManager<VulkanPipelineFactory>,
    command_pool: CommandPool,
    reload: Option<ShaderReload>,
    camera: CameraUbo,
    model_transforms: Vec<Mat4>,
    clear_color: [f32; 4],
    context: DeviceContext,
}

impl Renderer {
    /// Brings up the device, swapchain, pipeline and per-frame resources.
    ///
    /// Every failure here is fatal: there is no degraded mode without a
    /// device or a first working pipeline.
    pub fn new(window: &Window, config: &EngineConfig) -> RenderResult<Self> {
        info!("Initializing renderer");

        let context = DeviceContext::initialize(window, config.validation)?;
        let device = context.device().clone();
        let framebuffer_size = window.state().framebuffer_size();

        let swapchain = Swapchain::new(
            context.instance(),
            device.clone(),
            context.surface().handle(),
            framebuffer_size,
        )?;

        let set_layout = Arc::new(DescriptorSetLayout::for_mesh(device.clone())?);

        let factory = VulkanPipelineFactory::new(
            device.clone(),
            ShaderCompiler::new(&config.shaders.source_dir),
            config.vertex_shader_path(),
            config.fragment_shader_path(),
            &config.shaders.output_dir,
            set_layout.clone(),
        );
        let pipelines = PipelineManager::build(factory, swapchain.render_pass())?;

        let resources = ResourceSet::new(
            device.clone(),
            set_layout,
            MAX_FRAMES_IN_FLIGHT,
            config.render.max_meshes,
        )?;

        let command_pool = CommandPool::new(device.clone(), device.graphics_family())?;
        let command_buffers =
            CommandBuffer::allocate(&device, &command_pool, MAX_FRAMES_IN_FLIGHT as u32)?;

        let target = VulkanFrameTarget::new(
            device.clone(),
            swapchain,
            MAX_FRAMES_IN_FLIGHT,
            framebuffer_size,
        )?;
        let frames = FrameScheduler::new(Fence::signaled_set(&device, MAX_FRAMES_IN_FLIGHT)?);

        let reload = if config.shaders.hot_reload {
            match ShaderReload::start(&config.shaders.source_dir) {
                Ok(reload) => Some(reload),
                Err(e) => {
                    warn!("Shader hot reload disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        info!(
            "Renderer ready: {}x{}, {} swapchain images, {} frames in flight",
            target.swapchain().extent().width,
            target.swapchain().extent().height,
            target.swapchain().image_count(),
            MAX_FRAMES_IN_FLIGHT
        );

        Ok(Self {
            frames,
            command_buffers,
            target,
            resources,
            pipelines,
            command_pool,
            reload,
            camera: CameraUbo::default(),
            model_transforms: Vec::new(),
            clear_color: config.render.clear_color,
            context,
        })
    }

    // =========================================================================
    // Scene
    // =========================================================================

    /// Rebuilds the GPU mesh list from `meshes`, keeping their order.
    pub fn load_meshes(&mut self, meshes: &[Mesh]) -> RenderResult<()> {
        self.resources.load_meshes(meshes)?;
        self.model_transforms = meshes.iter().map(Mesh::transform).collect();
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if no mesh called `name` is loaded.
    pub fn remove_mesh(&mut self, name: &str) -> RenderResult<()> {
        let Some(index) = self.resources.mesh_names().position(|n| n == name) else {
            panic!("no GPU mesh named {name:?}");
        };
        self.resources.remove_mesh(name)?;
        self.model_transforms.remove(index);
        Ok(())
    }

    /// Camera matrices used from the next recorded frame on.
    pub fn set_camera(&mut self, camera: CameraUbo) {
        self.camera = camera;
    }

    /// # Panics
    ///
    /// Panics if `index` is not a loaded mesh.
    pub fn set_model_transform(&mut self, index: usize, transform: Mat4) {
        let count = self.model_transforms.len();
        let Some(slot) = self.model_transforms.get_mut(index) else {
            panic!("mesh index {index} out of range ({count} loaded)");
        };
        *slot = transform;
    }

    /// Copies each mesh's transform. `meshes` must be the list last loaded.
    pub fn sync_transforms(&mut self, meshes: &[Mesh]) {
        assert_eq!(
            meshes.len(),
            self.model_transforms.len(),
            "mesh list differs from the loaded one"
        );
        for (slot, mesh) in self.model_transforms.iter_mut().zip(meshes) {
            *slot = mesh.transform();
        }
    }

    // =========================================================================
    // Frame Loop
    // =========================================================================

    /// Draws one frame.
    ///
    /// Pending shader changes are applied first. A resize seen by `window`
    /// is forwarded to the swapchain.
    pub fn draw_frame(&mut self, window: &mut WindowState) -> RenderResult<FrameOutcome> {
        if let Some(reload) = &self.reload
            && !reload.pending().is_empty()
        {
            self.pipelines.rebuild()?;
        }

        if window.take_resized() {
            self.target.request_resize(window.framebuffer_size());
        }

        let mut recorder = MeshRecorder {
            command_buffers: &self.command_buffers,
            pipelines: &self.pipelines,
            resources: &self.resources,
            camera: &self.camera,
            model_transforms: &self.model_transforms,
            clear_color: self.clear_color,
        };
        let outcome = self.frames.draw_frame(&mut self.target, &mut recorder)?;

        if self.target.take_render_pass_change() {
            self.pipelines
                .set_render_pass(self.target.swapchain().render_pass())?;
        }

        Ok(outcome)
    }

    /// Recompiles the shaders now. Failures keep the current pipeline.
    pub fn rebuild_pipeline(&self) -> RenderResult<RebuildOutcome> {
        self.pipelines.rebuild()
    }

    pub fn current_pipeline(&self) -> vk::Pipeline {
        self.pipelines.current_pipeline()
    }

    pub fn wait_idle(&self) -> RenderResult<()> {
        self.frames.wait_all()?;
        self.context.device().wait_idle()?;
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn extent(&self) -> vk::Extent2D {
        self.target.swapchain().extent()
    }

    pub fn format(&self) -> vk::Format {
        self.target.swapchain().format()
    }

    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    pub fn resources(&self) -> &ResourceSet {
        &self.resources
    }

    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        info!("Destroying renderer");
        if let Err(e) = self.context.device().wait_idle() {
            error!("Failed to wait for device idle: {}", e);
        }
    }
}
