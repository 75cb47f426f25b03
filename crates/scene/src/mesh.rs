//! Mesh geometry and the primitive mesh factory.

use glam::{Mat4, Vec2, Vec3};
use wrap_rhi::vertex::Vertex;

/// Named geometry with a model transform.
///
/// Indices are 16-bit; a mesh holds at most 65 536 vertices.
#[derive(Clone, Debug, PartialEq)]
pub struct Mesh {
    name: String,
    vertices: Vec<Vertex>,
    indices: Vec<u16>,
    transform: Mat4,
}

impl Mesh {
    /// # Panics
    ///
    /// Panics if the vertex or index list is empty, or if an index points
    /// past the vertex list.
    pub fn new(name: impl Into<String>, vertices: Vec<Vertex>, indices: Vec<u16>) -> Self {
        let name = name.into();
        assert!(
            !vertices.is_empty() && !indices.is_empty(),
            "mesh {name:?} has empty geometry ({} vertices, {} indices)",
            vertices.len(),
            indices.len()
        );
        assert!(
            indices.iter().all(|&i| (i as usize) < vertices.len()),
            "mesh {name:?} has an index past its {} vertices",
            vertices.len()
        );

        Self {
            name,
            vertices,
            indices,
            transform: Mat4::IDENTITY,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    #[inline]
    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    #[inline]
    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Built-in primitive shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MeshKind {
    Triangle,
    Quad,
}

impl MeshKind {
    pub fn build(self, name: impl Into<String>) -> Mesh {
        match self {
            MeshKind::Triangle => Mesh::new(
                name,
                vec![
                    Vertex::new(Vec2::new(0.0, -0.5), Vec3::new(1.0, 0.0, 0.0)),
                    Vertex::new(Vec2::new(0.5, 0.5), Vec3::new(0.0, 1.0, 0.0)),
                    Vertex::new(Vec2::new(-0.5, 0.5), Vec3::new(0.0, 0.0, 1.0)),
                ],
                vec![0, 1, 2],
            ),
            MeshKind::Quad => Mesh::new(
                name,
                vec![
                    Vertex::new(Vec2::new(-0.5, -0.5), Vec3::new(1.0, 0.0, 0.0)),
                    Vertex::new(Vec2::new(0.5, -0.5), Vec3::new(0.0, 1.0, 0.0)),
                    Vertex::new(Vec2::new(0.5, 0.5), Vec3::new(0.0, 0.0, 1.0)),
                    Vertex::new(Vec2::new(-0.5, 0.5), Vec3::new(1.0, 1.0, 1.0)),
                ],
                vec![0, 1, 2, 2, 3, 0],
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_geometry() {
        let quad = MeshKind::Quad.build("quad");
        assert_eq!(quad.name(), "quad");
        assert_eq!(quad.indices(), &[0, 1, 2, 2, 3, 0]);
        assert_eq!(quad.vertices()[0].position, Vec2::new(-0.5, -0.5));
        assert_eq!(quad.vertices()[3].color, Vec3::ONE);
        assert_eq!(quad.transform(), Mat4::IDENTITY);
        assert_eq!(quad.vertex_bytes().len(), 4 * 20);
        assert_eq!(quad.index_bytes().len(), 12);
    }

    #[test]
    fn test_triangle_geometry() {
        let triangle = MeshKind::Triangle.build("tri");
        assert_eq!(triangle.index_count(), 3);
        assert_eq!(triangle.vertices()[1].color, Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    #[should_panic(expected = "empty geometry")]
    fn test_empty_indices_panic() {
        Mesh::new("flat", vec![Vertex::default(); 3], Vec::new());
    }

    #[test]
    #[should_panic(expected = "empty geometry")]
    fn test_empty_vertices_panic() {
        Mesh::new("void", Vec::new(), Vec::new());
    }

    #[test]
    #[should_panic(expected = "index past")]
    fn test_out_of_range_index_panics() {
        Mesh::new("bad", vec![Vertex::default()], vec![0, 1]);
    }
}
