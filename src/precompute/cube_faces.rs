//! Rendering the unit cube into every face of a cubemap

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::precompute::capture::CaptureMatrices;
use crate::precompute::offscreen::OffscreenPass;
use crate::resources::GpuMesh;
use crate::shaders::VIEW_PROJECTION_UNIFORM;

/// Draws the unit cube once per face, each time through that face's capture camera.
pub struct CubeFaceRenderer<'a> {
    cube: &'a GpuMesh,
    matrices: &'a CaptureMatrices,
}

impl<'a> CubeFaceRenderer<'a> {
    pub fn new(cube: &'a GpuMesh, matrices: &'a CaptureMatrices) -> Self {
        Self { cube, matrices }
    }

    /// Render mip `mip_level` of all six faces of `cubemap` in layer order.
    ///
    /// The pass must already be sized to that mip. A face whose attachment or draw fails is
    /// logged and skipped. Returns the number of faces drawn.
    pub fn render<B: GraphicsBackend>(
        &self,
        pass: &mut OffscreenPass<'_, B>,
        cubemap: TextureHandle,
        mip_level: u32,
    ) -> usize {
        let program = pass.program();
        let mut drawn = 0;
        for (face, view_projection) in self.matrices.iter() {
            pass.set_uniform(VIEW_PROJECTION_UNIFORM, view_projection.into());
            if let Err(e) = pass.attach_and_clear(cubemap, AttachmentTarget::CubeFace(face), mip_level)
            {
                log::error!("Cannot attach {:?} mip {}: {}", face, mip_level, e);
                continue;
            }
            self.cube.bind(&mut **pass, program);
            match self.cube.draw(&mut **pass) {
                Ok(()) => drawn += 1,
                Err(e) => log::error!("Drawing {:?} mip {} failed: {}", face, mip_level, e),
            }
        }
        log::debug!("Rendered {} cube faces at mip {}", drawn, mip_level);
        drawn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::precompute::offscreen::OffscreenTarget;
    use crate::resources::{Mesh, POSITION_ATTRIBUTE};

    fn cube_program(backend: &mut DummyBackend) -> ProgramHandle {
        backend
            .create_program(
                &ProgramDescriptor::new(
                    "cube",
                    ShaderSource::Wgsl(String::new()),
                    TextureFormat::Rgba16Float,
                )
                .with_attribute(POSITION_ATTRIBUTE, VertexFormat::Float32x3)
                .with_uniform(VIEW_PROJECTION_UNIFORM, UniformType::Mat4)
                .with_depth(TextureFormat::Depth24Plus),
            )
            .unwrap()
    }

    #[test]
    fn draws_every_face_in_layer_order() {
        let mut backend = DummyBackend::new();
        let program = cube_program(&mut backend);
        let cube = GpuMesh::upload(&mut backend, &Mesh::unit_cube()).unwrap();
        let matrices = CaptureMatrices::new();
        let cubemap = backend
            .create_texture(
                &TextureDescriptor::new_cube(64, TextureFormat::Rgba16Float)
                    .with_mip_levels(3)
                    .with_usage(TextureUsage::TEXTURE_BINDING | TextureUsage::RENDER_ATTACHMENT),
            )
            .unwrap();
        let target = OffscreenTarget::new(&mut backend, TextureFormat::Rgba16Float, 16).unwrap();

        let drawn = {
            let mut pass = target.begin_pass(&mut backend, program).unwrap();
            CubeFaceRenderer::new(&cube, &matrices).render(&mut pass, cubemap, 2)
        };
        assert_eq!(drawn, 6);

        let draws: Vec<_> = backend.draws().cloned().collect();
        assert_eq!(draws.len(), 6);
        for (draw, face) in draws.iter().zip(CubeFace::ALL) {
            assert_eq!(draw.target, Some((cubemap, AttachmentTarget::CubeFace(face), 2)));
            assert_eq!(draw.index_count, 36);
            assert_eq!(
                draw.uniforms.get(VIEW_PROJECTION_UNIFORM),
                Some(&UniformValue::Mat4(matrices.for_face(face)))
            );
        }
    }

    #[test]
    fn mismatched_target_size_skips_every_face() {
        let mut backend = DummyBackend::new();
        let program = cube_program(&mut backend);
        let cube = GpuMesh::upload(&mut backend, &Mesh::unit_cube()).unwrap();
        let matrices = CaptureMatrices::new();
        let cubemap = backend
            .create_texture(
                &TextureDescriptor::new_cube(64, TextureFormat::Rgba16Float)
                    .with_usage(TextureUsage::TEXTURE_BINDING | TextureUsage::RENDER_ATTACHMENT),
            )
            .unwrap();
        // Depth stays at 32 while the faces are 64
        let target = OffscreenTarget::new(&mut backend, TextureFormat::Rgba16Float, 32).unwrap();

        let drawn = {
            let mut pass = target.begin_pass(&mut backend, program).unwrap();
            CubeFaceRenderer::new(&cube, &matrices).render(&mut pass, cubemap, 0)
        };
        assert_eq!(drawn, 0);
        assert_eq!(backend.draws().count(), 0);
    }
}
