//! ResourceSet against a real device.
//!
//! Each test skips when no Vulkan driver with a graphics queue is present.

use std::sync::Arc;

use glam::{Mat4, Vec3};
use wrap_renderer::resource_set::ResourceSet;
use wrap_renderer::{MAX_FRAMES_IN_FLIGHT, ModelUbo};
use wrap_rhi::descriptor::DescriptorSetLayout;
use wrap_rhi::device::Device;
use wrap_rhi::instance::Instance;
use wrap_rhi::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};
use wrap_rhi::vk;
use wrap_scene::{Mesh, MeshKind};

struct Headless {
    // Device before instance.
    device: Arc<Device>,
    _instance: Instance,
}

fn headless() -> Option<Headless> {
    let instance = match Instance::new(&[], false) {
        Ok(instance) => instance,
        Err(e) => {
            println!("Skipping test: no Vulkan instance ({e})");
            return None;
        }
    };

    let physical_devices = unsafe { instance.handle().enumerate_physical_devices().ok()? };
    let info = physical_devices.into_iter().find_map(|device| {
        let families = unsafe {
            instance
                .handle()
                .get_physical_device_queue_family_properties(device)
        };
        let graphics = families
            .iter()
            .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))? as u32;

        Some(PhysicalDeviceInfo {
            device,
            properties: unsafe { instance.handle().get_physical_device_properties(device) },
            features: unsafe { instance.handle().get_physical_device_features(device) },
            memory_properties: unsafe {
                instance
                    .handle()
                    .get_physical_device_memory_properties(device)
            },
            queue_families: QueueFamilyIndices {
                graphics_family: Some(graphics),
                present_family: Some(graphics),
            },
        })
    });

    let Some(info) = info else {
        println!("Skipping test: no device with a graphics queue");
        return None;
    };

    match Device::new(&instance, &info) {
        Ok(device) => Some(Headless {
            device,
            _instance: instance,
        }),
        Err(e) => {
            println!("Skipping test: device creation failed ({e})");
            None
        }
    }
}

fn resource_set(device: &Arc<Device>, max_meshes: u32) -> ResourceSet {
    let layout = Arc::new(DescriptorSetLayout::for_mesh(device.clone()).unwrap());
    ResourceSet::new(device.clone(), layout, MAX_FRAMES_IN_FLIGHT, max_meshes).unwrap()
}

fn scene_meshes() -> Vec<Mesh> {
    vec![
        MeshKind::Quad.build("left").with_transform(Mat4::from_translation(Vec3::new(-1.0, 0.0, 0.0))),
        MeshKind::Triangle.build("middle"),
        MeshKind::Quad.build("right").with_transform(Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0))),
    ]
}

#[test]
fn test_remove_keeps_gpu_meshes_in_scene_order() {
    let Some(gpu) = headless() else { return };
    let mut resources = resource_set(&gpu.device, 8);
    let meshes = scene_meshes();

    resources.load_meshes(&meshes).unwrap();
    assert_eq!(resources.mesh_count(), 3);

    resources.remove_mesh("middle").unwrap();
    assert_eq!(resources.mesh_names().collect::<Vec<_>>(), vec!["left", "right"]);

    let right = resources.mesh(1).unwrap();
    let pool = resources.upload_pool();
    assert_eq!(right.vertex_buffer().read_back(pool).unwrap(), meshes[2].vertex_bytes());
    assert_eq!(right.index_buffer().read_back(pool).unwrap(), meshes[2].index_bytes());
    assert_eq!(right.index_count(), 6);
    assert_eq!(right.model(0).unwrap().model, meshes[2].transform());
}

#[test]
fn test_loading_past_capacity_grows_pool() {
    let Some(gpu) = headless() else { return };
    let mut resources = resource_set(&gpu.device, 1);

    resources.load_meshes(&scene_meshes()).unwrap();
    assert_eq!(resources.mesh_capacity(), 4);
    assert_eq!(resources.mesh_count(), 3);

    // Reloading within capacity reuses the pool.
    resources.load_meshes(&scene_meshes()[..1]).unwrap();
    assert_eq!(resources.mesh_capacity(), 4);
    assert_eq!(resources.mesh_names().collect::<Vec<_>>(), vec!["left"]);
}

#[test]
fn test_update_model_is_per_frame() {
    let Some(gpu) = headless() else { return };
    let mut resources = resource_set(&gpu.device, 4);
    resources.load_meshes(&scene_meshes()).unwrap();

    let spun = Mat4::from_rotation_z(0.5);
    resources.update_model(1, 0, &ModelUbo::new(spun)).unwrap();

    let mesh = resources.mesh(0).unwrap();
    assert_eq!(mesh.model(1).unwrap().model, spun);
    assert_eq!(mesh.model(0).unwrap().model, scene_meshes()[0].transform());
}
