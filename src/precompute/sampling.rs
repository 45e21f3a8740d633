//! CPU reference for the sampling math in the precompute shaders.
//!
//! The WGSL programs and these functions implement the same formulas, so the shader behavior
//! can be pinned down with unit tests and reproduced without a GPU.

use std::f32::consts::{FRAC_1_PI, FRAC_PI_2, PI, TAU};

use glam::{Vec2, Vec3};

/// Texture coordinate of direction `dir` in an equirectangular panorama.
///
/// `u` follows the azimuth `atan2(z, x)`, `v` runs from the zenith (0) to the nadir (1).
pub fn equirect_uv(dir: Vec3) -> Vec2 {
    let dir = dir.normalize();
    let uv = Vec2::new(dir.z.atan2(dir.x), dir.y.clamp(-1.0, 1.0).asin())
        * Vec2::new(0.5 * FRAC_1_PI, FRAC_1_PI)
        + 0.5;
    Vec2::new(uv.x, 1.0 - uv.y)
}

/// Roughness a prefilter mip level is convolved with, linear from 0 at mip 0 to 1 at the last.
pub fn roughness_for_mip(mip: u32, mip_count: u32) -> f32 {
    if mip_count <= 1 {
        return 0.0;
    }
    mip as f32 / (mip_count - 1) as f32
}

/// Side length of `mip` for a base size, never below one texel.
pub fn mip_size(base: u32, mip: u32) -> u32 {
    base.checked_shr(mip).unwrap_or(0).max(1)
}

/// Van der Corput radical inverse in base 2.
pub fn radical_inverse(index: u32) -> f32 {
    index.reverse_bits() as f32 * (1.0 / 4_294_967_296.0)
}

/// Point `i` of an `n`-point Hammersley set on the unit square.
pub fn hammersley(i: u32, n: u32) -> Vec2 {
    Vec2::new(i as f32 / n as f32, radical_inverse(i))
}

/// GGX half vector around `n` for the sample point `xi`, with `a = roughness²`.
pub fn importance_sample_ggx(xi: Vec2, n: Vec3, roughness: f32) -> Vec3 {
    let a = roughness * roughness;

    let phi = TAU * xi.x;
    let cos_theta = ((1.0 - xi.y) / (1.0 + (a * a - 1.0) * xi.y)).sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let local = Vec3::new(phi.cos() * sin_theta, phi.sin() * sin_theta, cos_theta);

    let up = if n.z.abs() < 0.999 { Vec3::Z } else { Vec3::X };
    let tangent = up.cross(n).normalize();
    let bitangent = n.cross(tangent);
    (tangent * local.x + bitangent * local.y + n * local.z).normalize()
}

/// GGX / Trowbridge-Reitz normal distribution.
pub fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let denom = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    a2 / (PI * denom * denom)
}

/// Schlick-GGX geometry term with the image-based lighting remap `k = roughness² / 2`.
pub fn geometry_schlick_ggx(n_dot_v: f32, roughness: f32) -> f32 {
    let k = roughness * roughness / 2.0;
    n_dot_v / (n_dot_v * (1.0 - k) + k)
}

pub fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    geometry_schlick_ggx(n_dot_v, roughness) * geometry_schlick_ggx(n_dot_l, roughness)
}

/// Cosine-weighted hemisphere integral of `env` around `normal` on a uniform
/// `(phi, theta)` grid with step `delta`.
pub fn convolve_irradiance(normal: Vec3, delta: f32, env: impl Fn(Vec3) -> Vec3) -> Vec3 {
    let normal = normal.normalize();
    let reference = if normal.y.abs() < 0.999 { Vec3::Y } else { Vec3::Z };
    let right = reference.cross(normal).normalize();
    let up = normal.cross(right);

    let mut irradiance = Vec3::ZERO;
    let mut sample_count = 0u32;
    let mut phi = 0.0f32;
    while phi < TAU {
        let mut theta = 0.0f32;
        while theta < FRAC_PI_2 {
            let (sin_theta, cos_theta) = theta.sin_cos();
            let local = Vec3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta);
            let dir = local.x * right + local.y * up + local.z * normal;
            irradiance += env(dir) * cos_theta * sin_theta;
            sample_count += 1;
            theta += delta;
        }
        phi += delta;
    }

    PI * irradiance / sample_count.max(1) as f32
}

/// Environment mip sampled for a GGX sample with probability density `pdf`.
///
/// Matches the solid angle of one sample to the solid angle of one texel of a
/// `resolution`-sized cubemap face.
pub fn prefilter_source_lod(pdf: f32, sample_count: u32, resolution: f32) -> f32 {
    let texel_solid_angle = 4.0 * PI / (6.0 * resolution * resolution);
    let sample_solid_angle = 1.0 / (sample_count as f32 * pdf + 0.0001);
    (0.5 * (sample_solid_angle / texel_solid_angle).log2()).max(0.0)
}

/// Fixed environment mip the irradiance convolution samples from.
///
/// A grid step of `delta` radians spans about `delta / (π/2 / size)` texels of a face.
pub fn irradiance_source_lod(environment_size: u32, delta: f32) -> f32 {
    let texel_angle = FRAC_PI_2 / environment_size.max(1) as f32;
    (delta / texel_angle).log2().max(0.0)
}

/// Probability density of a GGX sample reflected into `l`, with the same offset the shader adds.
pub fn ggx_sample_pdf(n_dot_h: f32, h_dot_v: f32, roughness: f32) -> f32 {
    distribution_ggx(n_dot_h, roughness) * n_dot_h / (4.0 * h_dot_v) + 0.0001
}

/// GGX-prefiltered radiance along `normal` (with `N = V = R`).
///
/// `env` receives each sample direction and the source mip picked from its PDF for
/// `resolution`-sized faces. Smooth surfaces always read mip 0.
pub fn prefilter(
    normal: Vec3,
    roughness: f32,
    sample_count: u32,
    resolution: f32,
    env: impl Fn(Vec3, f32) -> Vec3,
) -> Vec3 {
    let n = normal.normalize();
    let v = n;
    let mut radiance = Vec3::ZERO;
    let mut total_weight = 0.0;
    for i in 0..sample_count {
        let h = importance_sample_ggx(hammersley(i, sample_count), n, roughness);
        let l = (2.0 * v.dot(h) * h - v).normalize();
        let n_dot_l = n.dot(l);
        if n_dot_l > 0.0 {
            let lod = if roughness > 0.0 {
                let pdf = ggx_sample_pdf(n.dot(h).max(0.0), h.dot(v).max(0.0), roughness);
                prefilter_source_lod(pdf, sample_count, resolution)
            } else {
                0.0
            };
            radiance += env(l, lod) * n_dot_l;
            total_weight += n_dot_l;
        }
    }
    radiance / total_weight.max(0.0001)
}

/// Split-sum scale and bias applied to F0 for view angle `n_dot_v` and `roughness`.
pub fn integrate_brdf(n_dot_v: f32, roughness: f32, sample_count: u32) -> Vec2 {
    let n_dot_v = n_dot_v.max(0.0001);
    let v = Vec3::new((1.0 - n_dot_v * n_dot_v).max(0.0).sqrt(), 0.0, n_dot_v);
    let n = Vec3::Z;

    let mut scale = 0.0;
    let mut bias = 0.0;
    for i in 0..sample_count {
        let h = importance_sample_ggx(hammersley(i, sample_count), n, roughness);
        let l = (2.0 * v.dot(h) * h - v).normalize();

        let n_dot_l = l.z.max(0.0);
        let n_dot_h = h.z.max(0.0);
        let v_dot_h = v.dot(h).max(0.0);
        if n_dot_l > 0.0 {
            let g = geometry_smith(n_dot_v, n_dot_l, roughness);
            let g_vis = g * v_dot_h / (n_dot_h * n_dot_v);
            let fresnel = (1.0 - v_dot_h).powi(5);
            scale += (1.0 - fresnel) * g_vis;
            bias += fresnel * g_vis;
        }
    }
    Vec2::new(scale, bias) / sample_count.max(1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: Vec2, expected: Vec2) {
        assert!(
            actual.abs_diff_eq(expected, 1e-5),
            "{actual:?} != {expected:?}"
        );
    }

    #[test]
    fn equirect_uv_of_principal_directions() {
        assert_close(equirect_uv(Vec3::Y), Vec2::new(0.5, 0.0));
        assert_close(equirect_uv(Vec3::NEG_Y), Vec2::new(0.5, 1.0));
        assert_close(equirect_uv(Vec3::X), Vec2::new(0.5, 0.5));
        assert_close(equirect_uv(Vec3::Z), Vec2::new(0.75, 0.5));
        assert_close(equirect_uv(Vec3::NEG_Z), Vec2::new(0.25, 0.5));
    }

    #[test]
    fn roughness_spans_mip_chain() {
        assert_eq!(roughness_for_mip(0, 5), 0.0);
        assert_eq!(roughness_for_mip(1, 5), 0.25);
        assert_eq!(roughness_for_mip(2, 5), 0.5);
        assert_eq!(roughness_for_mip(4, 5), 1.0);
        assert_eq!(roughness_for_mip(0, 1), 0.0);
    }

    #[test]
    fn mip_sizes_halve_and_clamp() {
        let sizes: Vec<u32> = (0..5).map(|mip| mip_size(128, mip)).collect();
        assert_eq!(sizes, vec![128, 64, 32, 16, 8]);
        assert_eq!(mip_size(4, 5), 1);
        assert_eq!(mip_size(4, 40), 1);
    }

    #[test]
    fn radical_inverse_mirrors_bits() {
        assert_eq!(radical_inverse(0), 0.0);
        assert_eq!(radical_inverse(1), 0.5);
        assert_eq!(radical_inverse(2), 0.25);
        assert_eq!(radical_inverse(3), 0.75);
    }

    #[test]
    fn smooth_ggx_sample_is_the_normal() {
        let n = Vec3::new(0.3, -0.5, 0.8).normalize();
        for i in 0..16 {
            let h = importance_sample_ggx(hammersley(i, 16), n, 0.0);
            assert!(h.abs_diff_eq(n, 1e-4), "{h:?} != {n:?}");
        }
    }

    #[test]
    fn constant_environment_irradiance_matches_radiance() {
        let radiance = Vec3::new(1.0, 0.5, 2.0);
        for normal in [Vec3::X, Vec3::NEG_Z, Vec3::new(1.0, 1.0, 1.0), Vec3::Y] {
            let irradiance = convolve_irradiance(normal, 0.025, |_| radiance);
            assert!(
                irradiance.abs_diff_eq(radiance, radiance.max_element() * 0.02),
                "{irradiance:?} for {normal:?}"
            );
        }
    }

    #[test]
    fn irradiance_favours_the_lit_hemisphere() {
        let sky = |dir: Vec3| if dir.y > 0.0 { Vec3::ONE } else { Vec3::ZERO };
        let up = convolve_irradiance(Vec3::Y, 0.05, sky);
        let down = convolve_irradiance(Vec3::NEG_Y, 0.05, sky);
        assert!(up.x > 0.95);
        assert!(down.x < 0.05);
    }

    #[test]
    fn prefilter_of_constant_environment_is_constant() {
        for roughness in [0.0, 0.5, 1.0] {
            let value = prefilter(Vec3::X, roughness, 256, 1024.0, |_, _| Vec3::splat(3.0));
            assert!(value.abs_diff_eq(Vec3::splat(3.0), 1e-3), "{value:?}");
        }
    }

    #[test]
    fn prefilter_reads_coarser_mips_when_rough() {
        use std::cell::Cell;

        let max_lod = Cell::new(0.0f32);
        let track = |_: Vec3, lod: f32| {
            max_lod.set(max_lod.get().max(lod));
            Vec3::ONE
        };
        prefilter(Vec3::Y, 0.0, 64, 1024.0, track);
        assert_eq!(max_lod.get(), 0.0);

        prefilter(Vec3::Y, 1.0, 64, 1024.0, track);
        assert!(max_lod.get() > 1.0, "{}", max_lod.get());
    }

    #[test]
    fn ggx_distribution_is_normalised() {
        // Integral of D(h) cos(theta) over the hemisphere is one
        for roughness in [0.3f32, 0.6, 1.0] {
            let steps = 4096;
            let d_theta = FRAC_PI_2 / steps as f32;
            let integral: f32 = (0..steps)
                .map(|i| {
                    let theta = (i as f32 + 0.5) * d_theta;
                    let (sin_theta, cos_theta) = theta.sin_cos();
                    distribution_ggx(cos_theta, roughness) * cos_theta * sin_theta * d_theta * TAU
                })
                .sum();
            assert!((integral - 1.0).abs() < 0.01, "{integral} at {roughness}");
        }
    }

    #[test]
    fn source_lod_grows_as_pdf_shrinks() {
        let sharp = prefilter_source_lod(100.0, 1024, 1024.0);
        let blurry = prefilter_source_lod(0.1, 1024, 1024.0);
        assert!(blurry > sharp);
        assert!(prefilter_source_lod(1.0e6, 1024, 1024.0) >= 0.0);
    }

    #[test]
    fn irradiance_lod_for_default_sizes() {
        let lod = irradiance_source_lod(1024, 0.025);
        assert!((4.0..4.1).contains(&lod), "{lod}");
        assert_eq!(irradiance_source_lod(16, 0.025), 0.0);
    }

    #[test]
    fn brdf_at_normal_incidence_without_roughness() {
        let lut = integrate_brdf(1.0, 0.0, 1024);
        assert!(lut.abs_diff_eq(Vec2::new(1.0, 0.0), 1e-3), "{lut:?}");
    }

    #[test]
    fn brdf_terms_stay_in_unit_range() {
        for n_dot_v in [0.3, 0.7, 1.0] {
            for roughness in [0.1, 0.5, 1.0] {
                let lut = integrate_brdf(n_dot_v, roughness, 1024);
                assert!(lut.x >= 0.0 && lut.y >= 0.0);
                assert!(lut.x + lut.y <= 1.02, "{lut:?} at {n_dot_v}, {roughness}");
            }
        }
    }
}
