//! Specular prefilter for one roughness level

/// GGX importance-sampled convolution with `N = V = R`.
///
/// The source mip is picked per sample from its PDF so the sample footprint matches the
/// texel footprint of `u_resolution`-sized faces. Expects `SAMPLE_COUNT` in the preamble.
pub const PREFILTER_SHADER: &str = r#"
@group(0) @binding(1) var u_envMap: texture_cube<f32>;
@group(0) @binding(2) var u_envMap_sampler: sampler;

fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let denom = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    return a2 / (PI * denom * denom);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let n = normalize(input.local_position);
    let v = n;
    let roughness = uniforms.u_roughness;
    let texel_solid_angle = 4.0 * PI / (6.0 * uniforms.u_resolution * uniforms.u_resolution);

    var color = vec3<f32>(0.0);
    var total_weight = 0.0;
    for (var i = 0u; i < SAMPLE_COUNT; i++) {
        let xi = hammersley(i, SAMPLE_COUNT);
        let h = importance_sample_ggx(xi, n, roughness);
        let l = normalize(2.0 * dot(v, h) * h - v);

        let n_dot_l = dot(n, l);
        if n_dot_l > 0.0 {
            let n_dot_h = max(dot(n, h), 0.0);
            let h_dot_v = max(dot(h, v), 0.0);
            let pdf = distribution_ggx(n_dot_h, roughness) * n_dot_h / (4.0 * h_dot_v) + 0.0001;
            let sample_solid_angle = 1.0 / (f32(SAMPLE_COUNT) * pdf + 0.0001);
            var lod = 0.0;
            if roughness > 0.0 {
                lod = max(0.5 * log2(sample_solid_angle / texel_solid_angle), 0.0);
            }
            color += textureSampleLevel(u_envMap, u_envMap_sampler, l, lod).rgb * n_dot_l;
            total_weight += n_dot_l;
        }
    }

    return vec4<f32>(color / max(total_weight, 0.0001), 1.0);
}
"#;
