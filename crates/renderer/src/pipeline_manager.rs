//! Graphics pipeline ownership and shader hot reload.
//!
//! [`PipelineManager`] keeps exactly one live pipeline behind a mutex that
//! command recording also holds. A rebuild compiles both stages before
//! touching that mutex, so a broken shader never replaces a working
//! pipeline.
//!
//! Object creation goes through [`PipelineFactory`];
//! [`VulkanPipelineFactory`] is the implementation used by the renderer.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk;
use tracing::{debug, error, info, warn};

use wrap_rhi::descriptor::DescriptorSetLayout;
use wrap_rhi::device::Device;
use wrap_rhi::pipeline::{ColorBlendAttachment, GraphicsPipelineBuilder, Pipeline, PipelineLayout};
use wrap_rhi::shader::{Shader, ShaderStage};
use wrap_rhi::vertex::Vertex;
use wrap_rhi::RhiResult;
use wrap_shader::{ShaderCompiler, ShaderError, ShaderResult, spirv_path};

use crate::error::RenderResult;

/// Builds pipelines from compiled shader code.
pub trait PipelineFactory {
    /// Compiled code for both stages, kept so the pipeline can be recreated
    /// against a new render pass without recompiling.
    type Compiled;
    type Pipeline;

    fn compile(&self) -> ShaderResult<Self::Compiled>;

    fn create(
        &self,
        compiled: &Self::Compiled,
        render_pass: vk::RenderPass,
    ) -> RhiResult<Self::Pipeline>;

    /// Blocks until no submitted work can reference the current pipeline.
    fn wait_idle(&self) -> RhiResult<()>;

    fn handle(pipeline: &Self::Pipeline) -> vk::Pipeline;
}

/// Result of [`PipelineManager::rebuild`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// A new pipeline replaced the old one.
    Rebuilt,
    /// The previous pipeline is still current.
    Kept,
}

/// Everything the lock protects.
pub struct PipelineState<F: PipelineFactory> {
    pipeline: F::Pipeline,
    compiled: F::Compiled,
    render_pass: vk::RenderPass,
}

impl<F: PipelineFactory> PipelineState<F> {
    pub fn pipeline(&self) -> &F::Pipeline {
        &self.pipeline
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }
}

pub struct PipelineManager<F: PipelineFactory> {
    factory: F,
    state: Mutex<PipelineState<F>>,
}

impl<F: PipelineFactory> PipelineManager<F> {
    /// Compiles the shaders and creates the first pipeline.
    ///
    /// Unlike [`rebuild`](Self::rebuild), a compile error here is returned,
    /// since there is nothing to fall back to.
    pub fn build(factory: F, render_pass: vk::RenderPass) -> RenderResult<Self> {
        let compiled = factory.compile()?;
        let pipeline = factory.create(&compiled, render_pass)?;
        info!("Pipeline created");

        Ok(Self {
            factory,
            state: Mutex::new(PipelineState {
                pipeline,
                compiled,
                render_pass,
            }),
        })
    }

    /// Takes the pipeline lock. Hold the guard for the whole recording.
    pub fn lock(&self) -> MutexGuard<'_, PipelineState<F>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_pipeline(&self) -> vk::Pipeline {
        F::handle(&self.lock().pipeline)
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Recompiles both stages and swaps in a new pipeline.
    ///
    /// Compile or creation failures are logged and leave the current
    /// pipeline untouched. Only a failed idle wait is returned as an error.
    pub fn rebuild(&self) -> RenderResult<RebuildOutcome> {
        let compiled = match self.factory.compile() {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!("Keeping current pipeline, shader compilation failed: {}", e);
                return Ok(RebuildOutcome::Kept);
            }
        };

        let mut state = self.lock();
        self.factory.wait_idle()?;

        let pipeline = match self.factory.create(&compiled, state.render_pass) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!("Keeping current pipeline, creation failed: {}", e);
                return Ok(RebuildOutcome::Kept);
            }
        };

        // The old pipeline drops here, after the idle wait.
        state.pipeline = pipeline;
        state.compiled = compiled;
        info!("Pipeline rebuilt");

        Ok(RebuildOutcome::Rebuilt)
    }

    /// Recreates the pipeline for a new render pass from the last good
    /// compilation. A no-op when the render pass is unchanged.
    pub fn set_render_pass(&self, render_pass: vk::RenderPass) -> RenderResult<()> {
        let mut state = self.lock();
        if state.render_pass == render_pass {
            return Ok(());
        }

        self.factory.wait_idle()?;
        let pipeline = self.factory.create(&state.compiled, render_pass)?;
        state.pipeline = pipeline;
        state.render_pass = render_pass;
        debug!("Pipeline recreated for new render pass");

        Ok(())
    }
}

// =============================================================================
// Vulkan
// =============================================================================

/// Pipeline plus its layout. Field order drops the pipeline first.
pub struct GraphicsPipeline {
    pipeline: Pipeline,
    layout: PipelineLayout,
}

impl GraphicsPipeline {
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline.handle()
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }
}

/// SPIR-V for both stages.
pub struct CompiledShaders {
    pub vertex: Vec<u8>,
    pub fragment: Vec<u8>,
}

/// Compiles the configured GLSL sources to `.spv` files and builds the
/// fixed mesh pipeline from them.
pub struct VulkanPipelineFactory {
    device: Arc<Device>,
    compiler: ShaderCompiler,
    vertex_source: PathBuf,
    fragment_source: PathBuf,
    output_dir: PathBuf,
    set_layout: Arc<DescriptorSetLayout>,
}

impl VulkanPipelineFactory {
    pub fn new(
        device: Arc<Device>,
        compiler: ShaderCompiler,
        vertex_source: impl Into<PathBuf>,
        fragment_source: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        set_layout: Arc<DescriptorSetLayout>,
    ) -> Self {
        Self {
            device,
            compiler,
            vertex_source: vertex_source.into(),
            fragment_source: fragment_source.into(),
            output_dir: output_dir.into(),
            set_layout,
        }
    }

    pub fn vertex_source(&self) -> &Path {
        &self.vertex_source
    }

    pub fn fragment_source(&self) -> &Path {
        &self.fragment_source
    }

    fn compile_stage(&self, source: &Path) -> ShaderResult<Vec<u8>> {
        let dest = spirv_path(&self.output_dir, source);
        self.compiler.compile_to(source, &dest)?;
        std::fs::read(&dest).map_err(|e| ShaderError::Io {
            path: dest.clone(),
            source: e,
        })
    }
}

impl PipelineFactory for VulkanPipelineFactory {
    type Compiled = CompiledShaders;
    type Pipeline = GraphicsPipeline;

    fn compile(&self) -> ShaderResult<CompiledShaders> {
        Ok(CompiledShaders {
            vertex: self.compile_stage(&self.vertex_source)?,
            fragment: self.compile_stage(&self.fragment_source)?,
        })
    }

    fn create(
        &self,
        compiled: &CompiledShaders,
        render_pass: vk::RenderPass,
    ) -> RhiResult<GraphicsPipeline> {
        let vertex = Shader::from_spirv_bytes(self.device.clone(), &compiled.vertex, ShaderStage::Vertex)?;
        let fragment =
            Shader::from_spirv_bytes(self.device.clone(), &compiled.fragment, ShaderStage::Fragment)?;

        let layout = PipelineLayout::new(self.device.clone(), &[self.set_layout.handle()])?;

        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex)
            .fragment_shader(&fragment)
            .vertex_binding(Vertex::binding_description())
            .vertex_attributes(&Vertex::attribute_descriptions())
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .color_blend(ColorBlendAttachment::alpha_blend())
            .render_pass(render_pass, 0)
            .build(self.device.clone(), &layout)?;

        // Shader modules are no longer needed once the pipeline exists.
        Ok(GraphicsPipeline { pipeline, layout })
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }

    fn handle(pipeline: &GraphicsPipeline) -> vk::Pipeline {
        pipeline.handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

    struct MockPipeline {
        handle: vk::Pipeline,
        render_pass: vk::RenderPass,
        source: u32,
        live: Arc<AtomicUsize>,
    }

    impl Drop for MockPipeline {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct MockFactory {
        fail_compile: AtomicBool,
        fail_create: AtomicBool,
        next_handle: AtomicU64,
        source_version: AtomicU64,
        live: Arc<AtomicUsize>,
        idle_waits: AtomicUsize,
        events: Mutex<Vec<&'static str>>,
    }

    impl MockFactory {
        fn event(&self, name: &'static str) {
            self.events.lock().unwrap().push(name);
        }
    }

    impl PipelineFactory for MockFactory {
        type Compiled = u32;
        type Pipeline = MockPipeline;

        fn compile(&self) -> ShaderResult<u32> {
            if self.fail_compile.load(Ordering::SeqCst) {
                return Err(ShaderError::Parse {
                    name: "shader.frag".to_string(),
                    message: "expected ';'".to_string(),
                });
            }
            Ok(self.source_version.load(Ordering::SeqCst) as u32)
        }

        fn create(&self, compiled: &u32, render_pass: vk::RenderPass) -> RhiResult<MockPipeline> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(wrap_rhi::RhiError::Pipeline("mock".to_string()));
            }
            let raw = self.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(MockPipeline {
                handle: vk::Pipeline::from_raw(raw),
                render_pass,
                source: *compiled,
                live: self.live.clone(),
            })
        }

        fn wait_idle(&self) -> RhiResult<()> {
            self.idle_waits.fetch_add(1, Ordering::SeqCst);
            self.event("wait-idle");
            Ok(())
        }

        fn handle(pipeline: &MockPipeline) -> vk::Pipeline {
            pipeline.handle
        }
    }

    fn render_pass(raw: u64) -> vk::RenderPass {
        vk::RenderPass::from_raw(raw)
    }

    fn manager() -> PipelineManager<MockFactory> {
        PipelineManager::build(MockFactory::default(), render_pass(1)).unwrap()
    }

    #[test]
    fn test_build_fails_on_compile_error() {
        let factory = MockFactory::default();
        factory.fail_compile.store(true, Ordering::SeqCst);
        assert!(PipelineManager::build(factory, render_pass(1)).is_err());
    }

    #[test]
    fn test_failed_compile_keeps_same_handle() {
        let manager = manager();
        let before = manager.current_pipeline();

        manager.factory().fail_compile.store(true, Ordering::SeqCst);
        assert_eq!(manager.rebuild().unwrap(), RebuildOutcome::Kept);

        assert_eq!(manager.current_pipeline(), before);
        // The device is never stalled for a rebuild that cannot happen.
        assert_eq!(manager.factory().idle_waits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_successful_rebuild_yields_new_handle() {
        let manager = manager();
        let mut seen = vec![manager.current_pipeline()];

        for version in 1..=3 {
            manager.factory().source_version.store(version, Ordering::SeqCst);
            assert_eq!(manager.rebuild().unwrap(), RebuildOutcome::Rebuilt);

            let current = manager.current_pipeline();
            assert!(!seen.contains(&current));
            seen.push(current);
            assert_eq!(manager.lock().pipeline().source, version as u32);
        }
        assert_eq!(manager.factory().idle_waits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_only_one_pipeline_is_live() {
        let manager = manager();
        for _ in 0..4 {
            manager.rebuild().unwrap();
            assert_eq!(manager.factory().live.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_failed_create_keeps_same_handle() {
        let manager = manager();
        let before = manager.current_pipeline();

        manager.factory().fail_create.store(true, Ordering::SeqCst);
        assert_eq!(manager.rebuild().unwrap(), RebuildOutcome::Kept);
        assert_eq!(manager.current_pipeline(), before);
        assert_eq!(manager.factory().live.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recovers_after_failed_compile() {
        let manager = manager();
        manager.factory().fail_compile.store(true, Ordering::SeqCst);
        manager.rebuild().unwrap();

        manager.factory().fail_compile.store(false, Ordering::SeqCst);
        let before = manager.current_pipeline();
        assert_eq!(manager.rebuild().unwrap(), RebuildOutcome::Rebuilt);
        assert_ne!(manager.current_pipeline(), before);
    }

    #[test]
    fn test_set_render_pass_reuses_last_compilation() {
        let manager = manager();
        manager.factory().source_version.store(7, Ordering::SeqCst);
        manager.rebuild().unwrap();

        // Newer source on disk is only picked up by an explicit rebuild.
        manager.factory().source_version.store(8, Ordering::SeqCst);
        let before = manager.current_pipeline();
        manager.set_render_pass(render_pass(2)).unwrap();

        let state = manager.lock();
        assert_eq!(state.render_pass(), render_pass(2));
        assert_eq!(state.pipeline().render_pass, render_pass(2));
        assert_eq!(state.pipeline().source, 7);
        assert_ne!(PipelineManager::<MockFactory>::handle_of(&state), before);
    }

    #[test]
    fn test_set_same_render_pass_is_noop() {
        let manager = manager();
        let before = manager.current_pipeline();
        manager.set_render_pass(render_pass(1)).unwrap();
        assert_eq!(manager.current_pipeline(), before);
        assert_eq!(manager.factory().idle_waits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rebuild_waits_for_recording_to_finish() {
        let manager = manager();

        std::thread::scope(|scope| {
            let guard = manager.lock();
            let rebuild = scope.spawn(|| manager.rebuild().unwrap());

            std::thread::sleep(std::time::Duration::from_millis(50));
            manager.factory().event("record-end");
            drop(guard);

            assert_eq!(rebuild.join().unwrap(), RebuildOutcome::Rebuilt);
        });

        let events = manager.factory().events.lock().unwrap().clone();
        assert_eq!(events, vec!["record-end", "wait-idle"]);
    }

    impl<F: PipelineFactory> PipelineManager<F> {
        fn handle_of(state: &PipelineState<F>) -> vk::Pipeline {
            F::handle(state.pipeline())
        }
    }
}
