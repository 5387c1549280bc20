//! Procedural geometry and textures for the demo scenes

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::Vec3;
use crate::render::backends::vulkan::resources::geometry_store::Index;

/// Vertex layout shared by the forward and shadow pipelines
///
/// Matches the `vertex_bindings`/`vertex_attributes` of the bundled pipeline
/// definitions: stride 32, position at 0, normal at 12, uv at 24.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinate
    pub uv: [f32; 2],
}

impl Vertex {
    /// Create a vertex
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self { position, normal, uv }
    }
}

/// CPU-side triangle list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    /// Vertices
    pub vertices: Vec<Vertex>,
    /// Triangle indices, counter-clockwise when seen from the front
    pub indices: Vec<Index>,
}

impl MeshData {
    /// Append a quad centred at `center` spanning `u` and `v` (half extents), facing `u x v`
    fn push_quad(&mut self, center: Vec3, u: Vec3, v: Vec3, uv_scale: f32) {
        let normal = u.cross(&v).normalize();
        let base = self.vertices.len() as Index;
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
        for (su, sv) in corners {
            let p = center + u * su + v * sv;
            self.vertices.push(Vertex::new(
                [p.x, p.y, p.z],
                [normal.x, normal.y, normal.z],
                [(su + 1.0) * 0.5 * uv_scale, (1.0 - sv) * 0.5 * uv_scale],
            ));
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    /// Number of triangles
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Axis-aligned cube centred at the origin, four vertices per face
pub fn cube(half_extent: f32) -> MeshData {
    let h = half_extent;
    let faces = [
        (Vec3::x(), -Vec3::z(), Vec3::y()),
        (-Vec3::x(), Vec3::z(), Vec3::y()),
        (Vec3::y(), Vec3::x(), -Vec3::z()),
        (-Vec3::y(), Vec3::x(), Vec3::z()),
        (Vec3::z(), Vec3::x(), Vec3::y()),
        (-Vec3::z(), -Vec3::x(), Vec3::y()),
    ];

    let mut mesh = MeshData::default();
    for (normal, u, v) in faces {
        mesh.push_quad(normal * h, u * h, v * h, 1.0);
    }
    mesh
}

/// Ground plane in XZ facing +Y, texture repeated `uv_repeat` times
pub fn plane(half_extent: f32, uv_repeat: f32) -> MeshData {
    let mut mesh = MeshData::default();
    mesh.push_quad(
        Vec3::zeros(),
        Vec3::x() * half_extent,
        -Vec3::z() * half_extent,
        uv_repeat,
    );
    mesh
}

/// RGBA8 checkerboard of `size` x `size` texels with `cells` squares per side
pub fn checkerboard_rgba8(size: u32, cells: u32, even: [u8; 4], odd: [u8; 4]) -> Vec<u8> {
    let cell = (size / cells.max(1)).max(1);
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let texel = if (x / cell + y / cell) % 2 == 0 { even } else { odd };
            pixels.extend_from_slice(&texel);
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(mesh: &MeshData, index: Index) -> Vec3 {
        Vec3::from(mesh.vertices[index as usize].position)
    }

    fn assert_front_faces_outward(mesh: &MeshData) {
        for triangle in mesh.indices.chunks(3) {
            let a = position(mesh, triangle[0]);
            let b = position(mesh, triangle[1]);
            let c = position(mesh, triangle[2]);
            let normal = Vec3::from(mesh.vertices[triangle[0] as usize].normal);
            assert!((b - a).cross(&(c - a)).dot(&normal) > 0.0);
        }
    }

    #[test]
    fn test_vertex_stride() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(std::mem::offset_of!(Vertex, normal), 12);
        assert_eq!(std::mem::offset_of!(Vertex, uv), 24);
    }

    #[test]
    fn test_cube_winding_matches_normals() {
        let mesh = cube(1.0);
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.triangle_count(), 12);
        assert_front_faces_outward(&mesh);
        for vertex in &mesh.vertices {
            let p = Vec3::from(vertex.position);
            let n = Vec3::from(vertex.normal);
            assert!((p.dot(&n) - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_plane_faces_up() {
        let mesh = plane(5.0, 4.0);
        assert_eq!(mesh.triangle_count(), 2);
        assert_front_faces_outward(&mesh);
        assert!(mesh.vertices.iter().all(|v| v.normal == [0.0, 1.0, 0.0]));
        assert!(mesh.vertices.iter().any(|v| v.uv == [4.0, 0.0]));
    }

    #[test]
    fn test_checkerboard_alternates() {
        let pixels = checkerboard_rgba8(4, 2, [255; 4], [0, 0, 0, 255]);
        assert_eq!(pixels.len(), 4 * 4 * 4);
        assert_eq!(&pixels[0..4], &[255; 4]);
        assert_eq!(&pixels[8..12], &[0, 0, 0, 255]);
    }
}
