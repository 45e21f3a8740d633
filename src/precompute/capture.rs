//! Capture cameras for rendering into cubemap faces

use glam::{Mat4, Vec3};

use crate::backend::types::CubeFace;

pub const CAPTURE_FOV_Y_DEGREES: f32 = 90.0;
pub const CAPTURE_NEAR: f32 = 0.1;
pub const CAPTURE_FAR: f32 = 10.0;

/// Up vector of the capture camera looking through `face`.
///
/// These follow the cube map face orientation, whose `t` axis points down on the side faces.
pub fn capture_up(face: CubeFace) -> Vec3 {
    match face {
        CubeFace::PositiveY => Vec3::Z,
        CubeFace::NegativeY => Vec3::NEG_Z,
        _ => Vec3::NEG_Y,
    }
}

/// View-projection matrices of the six capture cameras, one per face in layer order.
///
/// The cameras sit at the origin with a 90 degree square frustum. Render targets here have
/// their first texel row at the top, so clip space is flipped vertically to land each face
/// in the orientation cube sampling reads it back with.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureMatrices {
    view_projections: [Mat4; 6],
}

impl Default for CaptureMatrices {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureMatrices {
    pub fn new() -> Self {
        let projection = Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0))
            * Mat4::perspective_rh(
                CAPTURE_FOV_Y_DEGREES.to_radians(),
                1.0,
                CAPTURE_NEAR,
                CAPTURE_FAR,
            );
        let view_projections = CubeFace::ALL
            .map(|face| projection * Mat4::look_at_rh(Vec3::ZERO, face.forward(), capture_up(face)));
        Self { view_projections }
    }

    pub fn for_face(&self, face: CubeFace) -> Mat4 {
        self.view_projections[face.layer() as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (CubeFace, Mat4)> + '_ {
        CubeFace::ALL
            .into_iter()
            .zip(self.view_projections.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    /// Face-local (s, t) in -1..1 of a direction on `face`, per the cube map lookup table.
    fn cube_st(face: CubeFace, dir: Vec3) -> Vec2 {
        let (sc, tc, ma) = match face {
            CubeFace::PositiveX => (-dir.z, -dir.y, dir.x),
            CubeFace::NegativeX => (dir.z, -dir.y, -dir.x),
            CubeFace::PositiveY => (dir.x, dir.z, dir.y),
            CubeFace::NegativeY => (dir.x, -dir.z, -dir.y),
            CubeFace::PositiveZ => (dir.x, -dir.y, dir.z),
            CubeFace::NegativeZ => (-dir.x, -dir.y, -dir.z),
        };
        Vec2::new(sc, tc) / ma
    }

    fn project(matrix: Mat4, point: Vec3) -> (Vec3, f32) {
        let clip = matrix * point.extend(1.0);
        (clip.truncate() / clip.w, clip.w)
    }

    #[test]
    fn forward_axis_lands_in_viewport_centre() {
        let matrices = CaptureMatrices::new();
        for (face, matrix) in matrices.iter() {
            let (ndc, w) = project(matrix, face.forward());
            assert!(w > 0.0, "{face:?} behind the camera");
            assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5, "{face:?}: {ndc:?}");
            assert!((0.0..=1.0).contains(&ndc.z));
        }
    }

    #[test]
    fn faces_match_cube_sampling_orientation() {
        let matrices = CaptureMatrices::new();
        for (face, matrix) in matrices.iter() {
            let forward = face.forward();
            let (a, b) = forward.any_orthonormal_pair();
            let dir = forward + a * 0.3 + b * 0.6;
            let (ndc, _) = project(matrix, dir);
            let st = cube_st(face, dir);
            // Rows grow downwards while clip-space y grows upwards
            assert!((ndc.x - st.x).abs() < 1e-4, "{face:?}: {ndc:?} vs {st:?}");
            assert!((ndc.y + st.y).abs() < 1e-4, "{face:?}: {ndc:?} vs {st:?}");
        }
    }
}
