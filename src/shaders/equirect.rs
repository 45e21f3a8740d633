//! Equirectangular panorama to cubemap face

/// Samples `u_sphereMap` along the direction of each cube fragment.
pub const EQUIRECT_TO_CUBE_SHADER: &str = r#"
@group(0) @binding(1) var u_sphereMap: texture_2d<f32>;
@group(0) @binding(2) var u_sphereMap_sampler: sampler;

const INV_ATAN: vec2<f32> = vec2<f32>(0.15915494, 0.31830988);

fn sample_spherical_map(v: vec3<f32>) -> vec2<f32> {
    var uv = vec2<f32>(atan2(v.z, v.x), asin(clamp(v.y, -1.0, 1.0)));
    uv = uv * INV_ATAN + 0.5;
    return vec2<f32>(uv.x, 1.0 - uv.y);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let uv = sample_spherical_map(normalize(input.local_position));
    let color = textureSampleLevel(u_sphereMap, u_sphereMap_sampler, uv, 0.0).rgb;
    return vec4<f32>(color, 1.0);
}
"#;
