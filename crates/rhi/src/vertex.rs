//! Vertex format and its input description.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// 2D position plus RGB color.
///
/// Memory layout (`#[repr(C)]`, 20 bytes):
/// - offset 0: position, location 0 (`vec2`)
/// - offset 8: color, location 1 (`vec3`)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec2,
    pub color: Vec3,
}

impl Vertex {
    #[inline]
    pub const fn new(position: Vec2, color: Vec3) -> Self {
        Self { position, color }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, color) as u32,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout() {
        assert_eq!(std::mem::size_of::<Vertex>(), 20);

        let binding = Vertex::binding_description();
        assert_eq!(binding.stride, 20);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);

        let [position, color] = Vertex::attribute_descriptions();
        assert_eq!((position.location, position.offset), (0, 0));
        assert_eq!(position.format, vk::Format::R32G32_SFLOAT);
        assert_eq!((color.location, color.offset), (1, 8));
        assert_eq!(color.format, vk::Format::R32G32B32_SFLOAT);
    }

    #[test]
    fn test_vertex_bytes() {
        let vertices = [Vertex::new(Vec2::new(-0.5, 0.5), Vec3::new(1.0, 0.0, 0.0))];
        let floats: &[f32] = bytemuck::cast_slice(&vertices);
        assert_eq!(floats, &[-0.5, 0.5, 1.0, 0.0, 0.0]);
    }
}
