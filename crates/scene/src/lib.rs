//! Scene-side data for the wrap engine.
//!
//! - [`Mesh`] geometry and the [`MeshKind`] primitive factory
//! - [`Scene`], the ordered mesh list with stable [`MeshHandle`]s
//! - [`Camera`], producing view and projection matrices

pub mod camera;
pub mod mesh;
pub mod scene;

pub use camera::Camera;
pub use mesh::{Mesh, MeshKind};
pub use scene::{MeshHandle, Scene};
