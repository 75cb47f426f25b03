//! wrap demo: two quads, one spinning, with shader hot reload.

use anyhow::{Context, Result};
use glam::{Mat4, Vec3};
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::event_loop::ControlFlow;
use winit::window::WindowId;

use wrap_core::{EngineConfig, FrameTimer};
use wrap_platform::{ActiveEventLoop, EventLoop, KeyCode, PhysicalKey, Window, WindowEvent};
use wrap_renderer::{CameraUbo, FrameOutcome, Renderer};
use wrap_scene::{Camera, MeshHandle, MeshKind, Scene};

const QUAD_OFFSET: f32 = 0.6;

/// Radians per second for the spinning quad.
const SPIN_SPEED: f32 = 1.0;

struct Demo {
    scene: Scene,
    camera: Camera,
    spinning: MeshHandle,
}

impl Demo {
    fn new() -> Self {
        let mut scene = Scene::new();
        scene.add_primitive(
            "left",
            MeshKind::Quad,
            Mat4::from_translation(Vec3::new(-QUAD_OFFSET, 0.0, 0.0)),
        );
        let spinning = scene.add_primitive(
            "right",
            MeshKind::Quad,
            Mat4::from_translation(Vec3::new(QUAD_OFFSET, 0.0, 0.0)),
        );

        Self {
            scene,
            camera: Camera::default(),
            spinning,
        }
    }

    fn update(&mut self, elapsed: f32) {
        let transform = Mat4::from_translation(Vec3::new(QUAD_OFFSET, 0.0, 0.0))
            * Mat4::from_rotation_z(elapsed * SPIN_SPEED);
        self.scene.mesh_mut(self.spinning).set_transform(transform);
    }
}

// Field order: the renderer goes before the window its surface belongs to.
struct App {
    config: EngineConfig,
    renderer: Option<Renderer>,
    window: Option<Window>,
    demo: Demo,
    timer: FrameTimer,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            demo: Demo::new(),
            timer: FrameTimer::new(),
            fatal: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Window::new(event_loop, &self.config.window).context("creating window")?;
        let renderer = Renderer::new(&window, &self.config).context("creating renderer")?;

        self.demo.camera.set_aspect(window.state().aspect_ratio());
        self.renderer = Some(renderer);
        self.window = Some(window);
        info!("Initialization complete, entering main loop");
        Ok(())
    }

    fn redraw(&mut self) -> Result<()> {
        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_mut()) else {
            return Ok(());
        };

        let demo = &mut self.demo;
        demo.update(self.timer.elapsed().as_secs_f32());

        if demo.scene.take_dirty() {
            renderer.load_meshes(demo.scene.meshes())?;
        } else {
            renderer.sync_transforms(demo.scene.meshes());
        }
        renderer.set_camera(CameraUbo::from_camera(&demo.camera));

        let outcome = renderer.draw_frame(window.state_mut())?;
        if outcome == FrameOutcome::Skipped {
            return Ok(());
        }

        let (_, fps) = self.timer.tick();
        if let Some(fps) = fps {
            debug!("{:.1} FPS", fps);
        }
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{:#}", err);
        self.fatal = Some(err);
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none()
            && let Err(e) = self.init(event_loop)
        {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                if let Some(window) = self.window.as_mut() {
                    window.state_mut().request_close();
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                    && let Some(window) = self.window.as_mut()
                {
                    window.state_mut().request_close();
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.state_mut().handle_resize(size.width, size.height);
                    if !window.state().is_minimized() {
                        self.demo.camera.set_aspect(window.state().aspect_ratio());
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }

        if self.window.as_ref().is_some_and(|w| w.state().should_close()) {
            event_loop.exit();
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Tear down GPU state while the window still exists.
        self.renderer = None;
    }
}

fn main() -> Result<()> {
    let config = EngineConfig::load_default().context("loading configuration")?;
    wrap_core::init_logging(&config.logging);
    info!("Starting wrap");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
