//! Diffuse irradiance convolution

/// Cosine-weighted hemisphere integral over a uniform grid.
///
/// Expects `SAMPLE_DELTA` and `SOURCE_LOD` constants in the preamble.
pub const IRRADIANCE_SHADER: &str = r#"
@group(0) @binding(1) var u_envMap: texture_cube<f32>;
@group(0) @binding(2) var u_envMap_sampler: sampler;

const PI: f32 = 3.14159265359;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let normal = normalize(input.local_position);

    var reference = vec3<f32>(0.0, 1.0, 0.0);
    if abs(normal.y) >= 0.999 {
        reference = vec3<f32>(0.0, 0.0, 1.0);
    }
    let right = normalize(cross(reference, normal));
    let up = cross(normal, right);

    var irradiance = vec3<f32>(0.0);
    var sample_count = 0.0;
    for (var phi = 0.0; phi < 2.0 * PI; phi += SAMPLE_DELTA) {
        for (var theta = 0.0; theta < 0.5 * PI; theta += SAMPLE_DELTA) {
            let local = vec3<f32>(sin(theta) * cos(phi), sin(theta) * sin(phi), cos(theta));
            let dir = local.x * right + local.y * up + local.z * normal;
            let radiance = textureSampleLevel(u_envMap, u_envMap_sampler, dir, SOURCE_LOD).rgb;
            irradiance += radiance * cos(theta) * sin(theta);
            sample_count += 1.0;
        }
    }

    return vec4<f32>(PI * irradiance / max(sample_count, 1.0), 1.0);
}
"#;
