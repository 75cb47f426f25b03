//! Scene bookkeeping: the ordered mesh list handed to the renderer.

use glam::Mat4;
use tracing::debug;

use crate::mesh::{Mesh, MeshKind};

/// Stable identifier for a mesh added to a [`Scene`]. Never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshHandle(u32);

/// Ordered collection of uniquely named meshes.
///
/// Structural changes (add, remove) mark the scene dirty so the caller
/// knows to hand the mesh list to the renderer again. Lookups of unknown
/// names or handles are programming errors and panic.
#[derive(Debug, Default)]
pub struct Scene {
    next_id: u32,
    handles: Vec<MeshHandle>,
    meshes: Vec<Mesh>,
    dirty: bool,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// Panics if a mesh with the same name is already present.
    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshHandle {
        assert!(
            self.position_by_name(mesh.name()).is_none(),
            "mesh {:?} already exists",
            mesh.name()
        );

        let handle = MeshHandle(self.next_id);
        self.next_id += 1;

        debug!("Adding mesh {:?} as {:?}", mesh.name(), handle);
        self.handles.push(handle);
        self.meshes.push(mesh);
        self.dirty = true;
        handle
    }

    pub fn add_primitive(&mut self, name: &str, kind: MeshKind, transform: Mat4) -> MeshHandle {
        self.add_mesh(kind.build(name).with_transform(transform))
    }

    /// Removes the named mesh, keeping the order of the rest.
    ///
    /// # Panics
    ///
    /// Panics if no mesh has that name.
    pub fn remove_mesh(&mut self, name: &str) -> Mesh {
        let index = self
            .position_by_name(name)
            .unwrap_or_else(|| panic!("no mesh named {name:?} in scene"));

        debug!("Removing mesh {:?}", name);
        self.handles.remove(index);
        self.dirty = true;
        self.meshes.remove(index)
    }

    /// # Panics
    ///
    /// Panics if no mesh has that name.
    pub fn mesh(&self, name: &str) -> &Mesh {
        let index = self
            .position_by_name(name)
            .unwrap_or_else(|| panic!("no mesh named {name:?} in scene"));
        &self.meshes[index]
    }

    /// # Panics
    ///
    /// Panics if the handle was never issued or its mesh was removed.
    pub fn mesh_by_handle(&self, handle: MeshHandle) -> &Mesh {
        &self.meshes[self.expect_position(handle)]
    }

    /// Mutable access for transform updates. Does not mark the scene dirty.
    pub fn mesh_mut(&mut self, handle: MeshHandle) -> &mut Mesh {
        let index = self.expect_position(handle);
        &mut self.meshes[index]
    }

    /// Current position of the mesh in [`meshes`](Self::meshes).
    pub fn index_of(&self, handle: MeshHandle) -> Option<usize> {
        self.handles.iter().position(|&h| h == handle)
    }

    pub fn contains(&self, handle: MeshHandle) -> bool {
        self.index_of(handle).is_some()
    }

    /// Meshes in insertion order.
    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Returns and clears the dirty flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn position_by_name(&self, name: &str) -> Option<usize> {
        self.meshes.iter().position(|m| m.name() == name)
    }

    fn expect_position(&self, handle: MeshHandle) -> usize {
        self.index_of(handle)
            .unwrap_or_else(|| panic!("{handle:?} does not refer to a mesh in scene"))
    }
}
