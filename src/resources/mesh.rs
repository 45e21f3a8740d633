//! Mesh data structures and the geometry shared by the precompute passes

use crate::backend::traits::*;
use crate::backend::types::*;
use glam::{Vec2, Vec3};

/// Attribute name for vertex positions in every precompute program
pub const POSITION_ATTRIBUTE: &str = "a_position";
/// Attribute name for texture coordinates
pub const TEX_COORD_ATTRIBUTE: &str = "a_texCoord";

/// A mesh with separate attribute streams and 16-bit indices
#[derive(Debug, Clone)]
pub struct Mesh {
    pub positions: Vec<Vec3>,
    pub tex_coords: Vec<Vec2>,
    pub indices: Vec<u16>,
    pub name: String,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            positions: Vec::new(),
            tex_coords: Vec::new(),
            indices: Vec::new(),
            name: name.to_string(),
        }
    }

    /// Calculate vertex count
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Calculate index count
    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Calculate triangle count
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Cube spanning -1..1 on every axis, shared corners only
    ///
    /// Rendered from the inside by the capture cameras, so winding is irrelevant and the
    /// interpolated position doubles as the sampling direction.
    pub fn unit_cube() -> Self {
        let mut mesh = Mesh::new("unit_cube");

        for corner in 0..8u32 {
            let sign = |bit: u32| if corner & bit != 0 { 1.0 } else { -1.0 };
            mesh.positions.push(Vec3::new(sign(1), sign(2), sign(4)));
        }

        // Corner index bits: x = 1, y = 2, z = 4
        let faces: [[u16; 4]; 6] = [
            [1, 3, 7, 5], // +X
            [0, 4, 6, 2], // -X
            [2, 6, 7, 3], // +Y
            [0, 1, 5, 4], // -Y
            [4, 5, 7, 6], // +Z
            [0, 2, 3, 1], // -Z
        ];
        for [a, b, c, d] in faces {
            mesh.indices.extend_from_slice(&[a, b, c, a, c, d]);
        }

        mesh
    }

    /// Full-viewport quad with texture coordinates
    ///
    /// `(0, 0)` maps to the first texel row, so a quad render writes texel `(x, y)` with
    /// `uv = ((x + 0.5) / w, (y + 0.5) / h)`.
    pub fn unit_quad() -> Self {
        let mut mesh = Mesh::new("unit_quad");
        mesh.positions = vec![
            Vec3::new(-1.0, 1.0, 0.0),
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
        ];
        mesh.tex_coords = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
        ];
        mesh.indices = vec![0, 1, 2, 2, 1, 3];
        mesh
    }
}

/// Mesh uploaded to the GPU
#[derive(Debug)]
pub struct GpuMesh {
    pub positions: BufferHandle,
    pub tex_coords: Option<BufferHandle>,
    pub indices: BufferHandle,
    pub index_count: u32,
    pub name: String,
}

impl GpuMesh {
    pub fn upload<B: GraphicsBackend>(backend: &mut B, mesh: &Mesh) -> BackendResult<Self> {
        let positions = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} positions", mesh.name)),
                size: (mesh.positions.len() * std::mem::size_of::<Vec3>()) as u64,
                usage: BufferUsage::VERTEX,
            },
            bytemuck::cast_slice(&mesh.positions),
        )?;

        let tex_coords = if mesh.tex_coords.is_empty() {
            None
        } else {
            Some(backend.create_buffer_init(
                &BufferDescriptor {
                    label: Some(format!("{} tex coords", mesh.name)),
                    size: (mesh.tex_coords.len() * std::mem::size_of::<Vec2>()) as u64,
                    usage: BufferUsage::VERTEX,
                },
                bytemuck::cast_slice(&mesh.tex_coords),
            )?)
        };

        // Index buffers must be a multiple of 4 bytes on some backends
        let mut index_bytes: Vec<u8> = bytemuck::cast_slice(&mesh.indices).to_vec();
        index_bytes.resize(index_bytes.len().next_multiple_of(4), 0);
        let indices = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} indices", mesh.name)),
                size: index_bytes.len() as u64,
                usage: BufferUsage::INDEX,
            },
            &index_bytes,
        )?;

        Ok(Self {
            positions,
            tex_coords,
            indices,
            index_count: mesh.indices.len() as u32,
            name: mesh.name.clone(),
        })
    }

    /// Point the program's attributes at this mesh. Attributes the program lacks are logged.
    pub fn bind<B: GraphicsBackend>(&self, backend: &mut B, program: ProgramHandle) {
        if let Err(e) = backend.set_attribute(program, POSITION_ATTRIBUTE, self.positions) {
            log::error!("{}: {}", self.name, e);
        }
        if let Some(tex_coords) = self.tex_coords {
            if let Err(e) = backend.set_attribute(program, TEX_COORD_ATTRIBUTE, tex_coords) {
                log::error!("{}: {}", self.name, e);
            }
        }
    }

    pub fn draw<B: GraphicsBackend>(&self, backend: &mut B) -> BackendResult<()> {
        backend.draw_indexed(self.indices, IndexFormat::Uint16, self.index_count)
    }

    pub fn destroy<B: GraphicsBackend>(self, backend: &mut B) {
        backend.destroy_buffer(self.positions);
        if let Some(tex_coords) = self.tex_coords {
            backend.destroy_buffer(tex_coords);
        }
        backend.destroy_buffer(self.indices);
    }
}

/// The two meshes every precompute pass draws, uploaded once
#[derive(Debug)]
pub struct GeometryCache {
    pub cube: GpuMesh,
    pub quad: GpuMesh,
}

impl GeometryCache {
    pub fn new<B: GraphicsBackend>(backend: &mut B) -> BackendResult<Self> {
        let cube = GpuMesh::upload(backend, &Mesh::unit_cube())?;
        let quad = match GpuMesh::upload(backend, &Mesh::unit_quad()) {
            Ok(quad) => quad,
            Err(e) => {
                cube.destroy(backend);
                return Err(e);
            }
        };
        Ok(Self { cube, quad })
    }

    pub fn destroy<B: GraphicsBackend>(self, backend: &mut B) {
        self.cube.destroy(backend);
        self.quad.destroy(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_cube_covers_every_face() {
        let cube = Mesh::unit_cube();
        assert_eq!(cube.vertex_count(), 8);
        assert_eq!(cube.index_count(), 36);
        assert!(cube.indices.iter().all(|&i| (i as usize) < cube.vertex_count()));

        // Every face's triangles lie on the plane of that face
        for (face, axis) in [Vec3::X, -Vec3::X, Vec3::Y, -Vec3::Y, Vec3::Z, -Vec3::Z]
            .iter()
            .enumerate()
        {
            for &index in &cube.indices[face * 6..face * 6 + 6] {
                assert_eq!(cube.positions[index as usize].dot(*axis), 1.0);
            }
        }
    }

    #[test]
    fn unit_quad_maps_corners_to_uv() {
        let quad = Mesh::unit_quad();
        assert_eq!(quad.triangle_count(), 2);
        for (position, uv) in quad.positions.iter().zip(&quad.tex_coords) {
            assert_eq!(uv.x, (position.x + 1.0) * 0.5);
            assert_eq!(uv.y, (1.0 - position.y) * 0.5);
        }
    }
}
