//! GPU resources derived from the scene's meshes.
//!
//! The GPU mesh list mirrors the order of the meshes last handed to
//! [`ResourceSet::load_meshes`]; position `i` on the GPU is mesh `i` in the
//! scene. Each mesh owns device-local vertex and index buffers plus one
//! model uniform buffer and one descriptor set per frame in flight. The
//! camera uniform buffer is per frame and shared by every mesh.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use wrap_rhi::RhiResult;
use wrap_rhi::buffer::{Buffer, BufferUsage, UniformBuffer};
use wrap_rhi::command::{CommandBuffer, CommandPool};
use wrap_rhi::descriptor::{DescriptorPool, DescriptorSetLayout, write_mesh_set};
use wrap_rhi::device::Device;
use wrap_scene::Mesh;

use crate::ubo::{CameraUbo, ModelUbo};

/// Mesh capacity for a pool currently sized for `current` meshes that must
/// now hold `required`. Grows to the next power of two, never shrinks.
pub fn pool_capacity(current: u32, required: u32) -> u32 {
    if required <= current {
        current
    } else {
        required.checked_next_power_of_two().unwrap_or(u32::MAX)
    }
}

/// Ordered name-keyed list.
#[derive(Debug)]
pub struct MeshSlots<T> {
    entries: Vec<(String, T)>,
}

impl<T> Default for MeshSlots<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> MeshSlots<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn push(&mut self, name: impl Into<String>, value: T) {
        self.entries.push((name.into(), value));
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    /// Removes the entry called `name`, keeping the others in order.
    ///
    /// # Panics
    ///
    /// Panics if there is no such entry.
    pub fn remove(&mut self, name: &str) -> T {
        let Some(index) = self.index_of(name) else {
            panic!("no GPU mesh named {name:?}");
        };
        self.entries.remove(index).1
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index).map(|(_, value)| value)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// GPU side of one mesh.
pub struct GpuMesh {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
    model_ubos: Vec<UniformBuffer<ModelUbo>>,
    descriptor_sets: Vec<vk::DescriptorSet>,
}

impl GpuMesh {
    fn upload(
        device: &Arc<Device>,
        upload_pool: &CommandPool,
        descriptor_pool: &DescriptorPool,
        set_layout: &DescriptorSetLayout,
        camera_ubos: &[UniformBuffer<CameraUbo>],
        mesh: &Mesh,
    ) -> RhiResult<Self> {
        let vertex_buffer =
            Buffer::upload_static(device, upload_pool, BufferUsage::Vertex, mesh.vertex_bytes())?;
        let index_buffer =
            Buffer::upload_static(device, upload_pool, BufferUsage::Index, mesh.index_bytes())?;

        let model = ModelUbo::new(mesh.transform());
        let model_ubos = camera_ubos
            .iter()
            .map(|_| UniformBuffer::new(device.clone(), &model))
            .collect::<RhiResult<Vec<_>>>()?;

        let layouts = vec![set_layout.handle(); camera_ubos.len()];
        let descriptor_sets = descriptor_pool.allocate(&layouts)?;
        for ((set, camera), model) in descriptor_sets.iter().zip(camera_ubos).zip(&model_ubos) {
            write_mesh_set(device, *set, camera.descriptor_info(), model.descriptor_info());
        }

        debug!(
            "Uploaded mesh {:?}: {} vertices, {} indices",
            mesh.name(),
            mesh.vertices().len(),
            mesh.index_count()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count(),
            model_ubos,
            descriptor_sets,
        })
    }

    pub fn vertex_buffer(&self) -> &Buffer {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &Buffer {
        &self.index_buffer
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn model(&self, frame: usize) -> RhiResult<ModelUbo> {
        self.model_ubos[frame].read()
    }
}

/// Buffers and descriptor sets for everything the renderer draws.
pub struct ResourceSet {
    meshes: MeshSlots<GpuMesh>,
    camera_ubos: Vec<UniformBuffer<CameraUbo>>,
    descriptor_pool: DescriptorPool,
    upload_pool: CommandPool,
    set_layout: Arc<DescriptorSetLayout>,
    mesh_capacity: u32,
    device: Arc<Device>,
}

impl ResourceSet {
    /// Creates the per-frame camera buffers and a descriptor pool for
    /// `max_meshes` meshes. No meshes are loaded yet.
    pub fn new(
        device: Arc<Device>,
        set_layout: Arc<DescriptorSetLayout>,
        frames_in_flight: usize,
        max_meshes: u32,
    ) -> RhiResult<Self> {
        let upload_pool = CommandPool::new_transient(device.clone(), device.graphics_family())?;

        let camera_ubos = (0..frames_in_flight)
            .map(|_| UniformBuffer::new(device.clone(), &CameraUbo::default()))
            .collect::<RhiResult<Vec<_>>>()?;

        let mesh_capacity = max_meshes.max(1);
        let descriptor_pool = DescriptorPool::for_uniform_sets(
            device.clone(),
            set_count(mesh_capacity, frames_in_flight),
        )?;

        Ok(Self {
            meshes: MeshSlots::new(),
            camera_ubos,
            descriptor_pool,
            upload_pool,
            set_layout,
            mesh_capacity,
            device,
        })
    }

    /// Replaces every GPU mesh with fresh uploads of `meshes`, in order.
    pub fn load_meshes(&mut self, meshes: &[Mesh]) -> RhiResult<()> {
        self.device.wait_idle()?;
        self.meshes.clear();

        let required = u32::try_from(meshes.len()).unwrap_or(u32::MAX);
        let capacity = pool_capacity(self.mesh_capacity, required);
        if capacity != self.mesh_capacity {
            info!(
                "Growing descriptor pool from {} to {} meshes",
                self.mesh_capacity, capacity
            );
            self.descriptor_pool = DescriptorPool::for_uniform_sets(
                self.device.clone(),
                set_count(capacity, self.frames_in_flight()),
            )?;
            self.mesh_capacity = capacity;
        } else {
            self.descriptor_pool.reset()?;
        }

        for mesh in meshes {
            let gpu_mesh = GpuMesh::upload(
                &self.device,
                &self.upload_pool,
                &self.descriptor_pool,
                &self.set_layout,
                &self.camera_ubos,
                mesh,
            )?;
            self.meshes.push(mesh.name(), gpu_mesh);
        }

        info!("Loaded {} mesh(es)", self.meshes.len());
        Ok(())
    }

    /// Drops the GPU mesh called `name`; later meshes move up one place.
    ///
    /// Its descriptor sets return to the pool on the next
    /// [`load_meshes`](Self::load_meshes).
    ///
    /// # Panics
    ///
    /// Panics if no mesh called `name` is loaded.
    pub fn remove_mesh(&mut self, name: &str) -> RhiResult<()> {
        if self.meshes.index_of(name).is_none() {
            panic!("no GPU mesh named {name:?}");
        }

        self.device.wait_idle()?;
        drop(self.meshes.remove(name));
        debug!("Removed mesh {:?}", name);
        Ok(())
    }

    /// Must only be called for a frame slot whose fence has signaled.
    pub fn update_camera(&self, frame: usize, camera: &CameraUbo) -> RhiResult<()> {
        self.camera_ubos[frame].write(camera)
    }

    /// Writes mesh `index`'s model matrix for one frame slot.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a loaded mesh.
    pub fn update_model(&self, frame: usize, index: usize, model: &ModelUbo) -> RhiResult<()> {
        let Some(mesh) = self.meshes.get(index) else {
            panic!(
                "mesh index {index} out of range ({} loaded)",
                self.meshes.len()
            );
        };
        mesh.model_ubos[frame].write(model)
    }

    /// Binds and draws every mesh with frame slot `frame`'s descriptor set.
    pub fn record_draws(&self, cmd: &CommandBuffer, frame: usize, layout: vk::PipelineLayout) {
        for mesh in self.meshes.iter() {
            cmd.bind_vertex_buffers(0, &[mesh.vertex_buffer.handle()], &[0]);
            cmd.bind_index_buffer(mesh.index_buffer.handle(), 0, vk::IndexType::UINT16);
            cmd.bind_graphics_descriptor_sets(layout, 0, &[mesh.descriptor_sets[frame]]);
            cmd.draw_indexed(mesh.index_count, 1, 0, 0, 0);
        }
    }

    pub fn mesh(&self, index: usize) -> Option<&GpuMesh> {
        self.meshes.get(index)
    }

    pub fn mesh_names(&self) -> impl Iterator<Item = &str> {
        self.meshes.names()
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn mesh_capacity(&self) -> u32 {
        self.mesh_capacity
    }

    pub fn frames_in_flight(&self) -> usize {
        self.camera_ubos.len()
    }

    /// Pool for one-off transfers such as debug readbacks.
    pub fn upload_pool(&self) -> &CommandPool {
        &self.upload_pool
    }
}

fn set_count(mesh_capacity: u32, frames_in_flight: usize) -> u32 {
    mesh_capacity.saturating_mul(u32::try_from(frames_in_flight).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_capacity_keeps_room() {
        assert_eq!(pool_capacity(64, 0), 64);
        assert_eq!(pool_capacity(64, 64), 64);
    }

    #[test]
    fn test_pool_capacity_grows_to_power_of_two() {
        assert_eq!(pool_capacity(64, 65), 128);
        assert_eq!(pool_capacity(1, 3), 4);
        assert_eq!(pool_capacity(10, 100), 128);
        assert_eq!(pool_capacity(1, u32::MAX), u32::MAX);
    }

    #[test]
    fn test_set_count() {
        assert_eq!(set_count(64, 2), 128);
        assert_eq!(set_count(u32::MAX, 2), u32::MAX);
    }

    fn slots(names: &[&str]) -> MeshSlots<usize> {
        let mut slots = MeshSlots::new();
        for (i, name) in names.iter().enumerate() {
            slots.push(*name, i);
        }
        slots
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut slots = slots(&["a", "b", "c", "d"]);
        assert_eq!(slots.remove("b"), 1);

        assert_eq!(slots.names().collect::<Vec<_>>(), vec!["a", "c", "d"]);
        assert_eq!(slots.iter().copied().collect::<Vec<_>>(), vec![0, 2, 3]);
        assert_eq!(slots.index_of("c"), Some(1));
    }

    #[test]
    fn test_slots_stay_in_lockstep_with_scene() {
        use glam::Mat4;
        use wrap_scene::{MeshKind, Scene};

        let mut scene = Scene::new();
        let mut gpu = MeshSlots::new();
        for name in ["left", "middle", "right"] {
            scene.add_primitive(name, MeshKind::Quad, Mat4::IDENTITY);
        }
        for mesh in scene.meshes() {
            gpu.push(mesh.name(), mesh.index_count());
        }

        scene.remove_mesh("middle");
        gpu.remove("middle");

        let scene_names: Vec<&str> = scene.meshes().iter().map(|m| m.name()).collect();
        assert_eq!(gpu.names().collect::<Vec<_>>(), scene_names);
    }

    #[test]
    #[should_panic(expected = "no GPU mesh named")]
    fn test_remove_unknown_panics() {
        let mut slots = slots(&["a"]);
        slots.remove("missing");
    }

    #[test]
    fn test_clear_and_get() {
        let mut slots = slots(&["a", "b"]);
        assert_eq!(slots.get(1), Some(&1));
        assert_eq!(slots.get(2), None);

        slots.clear();
        assert!(slots.is_empty());
        assert_eq!(slots.len(), 0);
    }
}
