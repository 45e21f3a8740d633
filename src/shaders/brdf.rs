//! Split-sum BRDF integration

/// Writes `(scale, bias)` for `NdotV = uv.x`, `roughness = uv.y`.
///
/// Expects `SAMPLE_COUNT` in the preamble.
pub const BRDF_INTEGRATION_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) tex_coord: vec2<f32>,
}

@vertex
fn vs_main(@location(0) a_position: vec3<f32>, @location(1) a_texCoord: vec2<f32>) -> VertexOutput {
    var output: VertexOutput;
    output.clip_position = vec4<f32>(a_position, 1.0);
    output.tex_coord = a_texCoord;
    return output;
}

fn geometry_schlick_ggx(n_dot_v: f32, roughness: f32) -> f32 {
    let k = roughness * roughness / 2.0;
    return n_dot_v / (n_dot_v * (1.0 - k) + k);
}

fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    return geometry_schlick_ggx(n_dot_v, roughness) * geometry_schlick_ggx(n_dot_l, roughness);
}

fn integrate_brdf(n_dot_v_in: f32, roughness: f32) -> vec2<f32> {
    let n_dot_v = max(n_dot_v_in, 0.0001);
    let v = vec3<f32>(sqrt(max(1.0 - n_dot_v * n_dot_v, 0.0)), 0.0, n_dot_v);
    let n = vec3<f32>(0.0, 0.0, 1.0);

    var scale = 0.0;
    var bias = 0.0;
    for (var i = 0u; i < SAMPLE_COUNT; i++) {
        let xi = hammersley(i, SAMPLE_COUNT);
        let h = importance_sample_ggx(xi, n, roughness);
        let l = normalize(2.0 * dot(v, h) * h - v);

        let n_dot_l = max(l.z, 0.0);
        let n_dot_h = max(h.z, 0.0);
        let v_dot_h = max(dot(v, h), 0.0);
        if n_dot_l > 0.0 {
            let g = geometry_smith(n_dot_v, n_dot_l, roughness);
            let g_vis = g * v_dot_h / (n_dot_h * n_dot_v);
            let fresnel = pow(1.0 - v_dot_h, 5.0);
            scale += (1.0 - fresnel) * g_vis;
            bias += fresnel * g_vis;
        }
    }
    return vec2<f32>(scale, bias) / f32(SAMPLE_COUNT);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let lut = integrate_brdf(input.tex_coord.x, input.tex_coord.y);
    return vec4<f32>(lut, 0.0, 1.0);
}
"#;
