//! Platform layer for the wrap engine.
//!
//! Wraps the winit window, tracks resize and close requests, and creates the
//! Vulkan surface for it.

mod window;

pub use window::{Surface, Window, WindowState};

pub use winit::event::{ElementState, KeyEvent, WindowEvent};
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
pub use winit::keyboard::{KeyCode, PhysicalKey};
