//! The four precompute programs and the names they expose
//!
//! Each program is assembled from a generated header (tunable constants, the uniform block
//! and shared helpers) followed by a body. Bodies are built in, or read from
//! `<shader_dir>/<label>.wgsl` when a shader directory is configured.

mod brdf;
mod equirect;
mod irradiance;
mod prefilter;

pub use brdf::BRDF_INTEGRATION_SHADER;
pub use equirect::EQUIRECT_TO_CUBE_SHADER;
pub use irradiance::IRRADIANCE_SHADER;
pub use prefilter::PREFILTER_SHADER;

use std::fmt::Write;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::precompute::config::PrecomputeConfig;
use crate::precompute::sampling::irradiance_source_lod;
use crate::resources::{POSITION_ATTRIBUTE, TEX_COORD_ATTRIBUTE};

pub const VIEW_PROJECTION_UNIFORM: &str = "u_viewProjMatrix";
pub const ROUGHNESS_UNIFORM: &str = "u_roughness";
pub const RESOLUTION_UNIFORM: &str = "u_resolution";
pub const SPHERE_MAP_SAMPLER: &str = "u_sphereMap";
pub const ENVIRONMENT_MAP_SAMPLER: &str = "u_envMap";

/// Format the capture depth renderbuffer and cube programs use
pub const CAPTURE_DEPTH_FORMAT: TextureFormat = TextureFormat::Depth24Plus;

/// Vertex stage shared by every program that draws the unit cube
pub const CUBE_VERTEX_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) local_position: vec3<f32>,
}

@vertex
fn vs_main(@location(0) a_position: vec3<f32>) -> VertexOutput {
    var output: VertexOutput;
    output.local_position = a_position;
    output.clip_position = uniforms.u_viewProjMatrix * vec4<f32>(a_position, 1.0);
    return output;
}
"#;

/// Hammersley points and GGX half-vector sampling
pub const GGX_SAMPLING_SHADER: &str = r#"
const PI: f32 = 3.14159265359;

fn radical_inverse(index: u32) -> f32 {
    return f32(reverseBits(index)) * 2.3283064365386963e-10;
}

fn hammersley(i: u32, n: u32) -> vec2<f32> {
    return vec2<f32>(f32(i) / f32(n), radical_inverse(i));
}

fn importance_sample_ggx(xi: vec2<f32>, n: vec3<f32>, roughness: f32) -> vec3<f32> {
    let a = roughness * roughness;
    let phi = 2.0 * PI * xi.x;
    let cos_theta = sqrt((1.0 - xi.y) / (1.0 + (a * a - 1.0) * xi.y));
    let sin_theta = sqrt(max(1.0 - cos_theta * cos_theta, 0.0));
    let local = vec3<f32>(cos(phi) * sin_theta, sin(phi) * sin_theta, cos_theta);

    var up = vec3<f32>(1.0, 0.0, 0.0);
    if abs(n.z) < 0.999 {
        up = vec3<f32>(0.0, 0.0, 1.0);
    }
    let tangent = normalize(cross(up, n));
    let bitangent = cross(n, tangent);
    return normalize(tangent * local.x + bitangent * local.y + n * local.z);
}
"#;

/// One of the precompute programs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    EquirectToCube,
    Irradiance,
    Prefilter,
    BrdfIntegration,
}

impl ProgramKind {
    pub const ALL: [ProgramKind; 4] = [
        ProgramKind::EquirectToCube,
        ProgramKind::Irradiance,
        ProgramKind::Prefilter,
        ProgramKind::BrdfIntegration,
    ];

    /// Program label, also the file stem of an override body
    pub fn label(&self) -> &'static str {
        match self {
            ProgramKind::EquirectToCube => "equirect_to_cube",
            ProgramKind::Irradiance => "irradiance_convolution",
            ProgramKind::Prefilter => "specular_prefilter",
            ProgramKind::BrdfIntegration => "brdf_integration",
        }
    }

    fn builtin_body(&self) -> &'static str {
        match self {
            ProgramKind::EquirectToCube => EQUIRECT_TO_CUBE_SHADER,
            ProgramKind::Irradiance => IRRADIANCE_SHADER,
            ProgramKind::Prefilter => PREFILTER_SHADER,
            ProgramKind::BrdfIntegration => BRDF_INTEGRATION_SHADER,
        }
    }

    /// Attribute, uniform and sampler contract of the program, without its source
    fn interface(&self, source: ShaderSource) -> ProgramDescriptor {
        match self {
            ProgramKind::EquirectToCube => {
                ProgramDescriptor::new(self.label(), source, TextureFormat::Rgba16Float)
                    .with_attribute(POSITION_ATTRIBUTE, VertexFormat::Float32x3)
                    .with_uniform(VIEW_PROJECTION_UNIFORM, UniformType::Mat4)
                    .with_sampler(SPHERE_MAP_SAMPLER, TextureKind::D2)
                    .with_depth(CAPTURE_DEPTH_FORMAT)
            }
            ProgramKind::Irradiance => {
                ProgramDescriptor::new(self.label(), source, TextureFormat::Rgba16Float)
                    .with_attribute(POSITION_ATTRIBUTE, VertexFormat::Float32x3)
                    .with_uniform(VIEW_PROJECTION_UNIFORM, UniformType::Mat4)
                    .with_sampler(ENVIRONMENT_MAP_SAMPLER, TextureKind::Cube)
                    .with_depth(CAPTURE_DEPTH_FORMAT)
            }
            ProgramKind::Prefilter => {
                ProgramDescriptor::new(self.label(), source, TextureFormat::Rgba16Float)
                    .with_attribute(POSITION_ATTRIBUTE, VertexFormat::Float32x3)
                    .with_uniform(VIEW_PROJECTION_UNIFORM, UniformType::Mat4)
                    .with_uniform(ROUGHNESS_UNIFORM, UniformType::Float)
                    .with_uniform(RESOLUTION_UNIFORM, UniformType::Float)
                    .with_sampler(ENVIRONMENT_MAP_SAMPLER, TextureKind::Cube)
                    .with_depth(CAPTURE_DEPTH_FORMAT)
            }
            ProgramKind::BrdfIntegration => {
                ProgramDescriptor::new(self.label(), source, TextureFormat::Rg16Float)
                    .with_attribute(POSITION_ATTRIBUTE, VertexFormat::Float32x3)
                    .with_attribute(TEX_COORD_ATTRIBUTE, VertexFormat::Float32x2)
                    .with_depth(CAPTURE_DEPTH_FORMAT)
            }
        }
    }

    /// Tunable constants prepended to the program, as `(name, type, value)`
    fn constants(&self, config: &PrecomputeConfig) -> Vec<(&'static str, &'static str, String)> {
        match self {
            ProgramKind::EquirectToCube => Vec::new(),
            ProgramKind::Irradiance => {
                let lod =
                    irradiance_source_lod(config.environment_size, config.irradiance_sample_delta);
                vec![
                    ("SAMPLE_DELTA", "f32", format!("{:.6}", config.irradiance_sample_delta)),
                    ("SOURCE_LOD", "f32", format!("{:.6}", lod)),
                ]
            }
            ProgramKind::Prefilter => vec![(
                "SAMPLE_COUNT",
                "u32",
                format!("{}u", config.prefilter_sample_count),
            )],
            ProgramKind::BrdfIntegration => {
                vec![("SAMPLE_COUNT", "u32", format!("{}u", config.brdf_sample_count))]
            }
        }
    }

    /// Everything that precedes the body: constants, uniform block and shared helpers
    pub fn header(&self, config: &PrecomputeConfig) -> String {
        let interface = self.interface(ShaderSource::Wgsl(String::new()));
        let mut header = String::new();
        for (name, ty, value) in self.constants(config) {
            let _ = writeln!(header, "const {}: {} = {};", name, ty, value);
        }
        header.push_str(&uniform_block_wgsl(&interface.uniforms));
        match self {
            ProgramKind::EquirectToCube | ProgramKind::Irradiance => {
                header.push_str(CUBE_VERTEX_SHADER);
            }
            ProgramKind::Prefilter => {
                header.push_str(CUBE_VERTEX_SHADER);
                header.push_str(GGX_SAMPLING_SHADER);
            }
            ProgramKind::BrdfIntegration => header.push_str(GGX_SAMPLING_SHADER),
        }
        header
    }

    /// Descriptor with the full built-in source, or with a file body when `shader_dir` is set
    pub fn descriptor(&self, config: &PrecomputeConfig) -> ProgramDescriptor {
        let header = self.header(config);
        let source = match &config.shader_dir {
            Some(dir) => ShaderSource::File {
                path: dir.join(format!("{}.wgsl", self.label())),
                preamble: header,
            },
            None => ShaderSource::Wgsl(header + self.builtin_body()),
        };
        self.interface(source)
    }
}

/// WGSL struct for a uniform list, bound as `uniforms` at group 0 binding 0
pub fn uniform_block_wgsl(uniforms: &[(String, UniformType)]) -> String {
    if uniforms.is_empty() {
        return String::new();
    }
    let mut block = String::from("\nstruct Uniforms {\n");
    for (name, ty) in uniforms {
        let wgsl_ty = match ty {
            UniformType::Float => "f32",
            UniformType::Vec2 => "vec2<f32>",
            UniformType::Vec3 => "vec3<f32>",
            UniformType::Vec4 => "vec4<f32>",
            UniformType::Mat4 => "mat4x4<f32>",
        };
        let _ = writeln!(block, "    {}: {},", name, wgsl_ty);
    }
    block.push_str("}\n\n@group(0) @binding(0) var<uniform> uniforms: Uniforms;\n");
    block
}

/// Handles of the four programs, requested together
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecomputePrograms {
    handles: [ProgramHandle; 4],
}

impl PrecomputePrograms {
    pub fn create<B: GraphicsBackend>(
        backend: &mut B,
        config: &PrecomputeConfig,
    ) -> BackendResult<Self> {
        let mut handles = [ProgramHandle(0); 4];
        for (index, kind) in ProgramKind::ALL.into_iter().enumerate() {
            match backend.create_program(&kind.descriptor(config)) {
                Ok(handle) => handles[index] = handle,
                Err(e) => {
                    for handle in &handles[..index] {
                        backend.destroy_program(*handle);
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self { handles })
    }

    pub fn get(&self, kind: ProgramKind) -> ProgramHandle {
        self.handles[kind as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProgramKind, ProgramHandle)> + '_ {
        ProgramKind::ALL.into_iter().zip(self.handles.iter().copied())
    }

    pub fn destroy<B: GraphicsBackend>(self, backend: &mut B) {
        for handle in self.handles {
            backend.destroy_program(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> naga::Module {
        match naga::front::wgsl::parse_str(source) {
            Ok(module) => module,
            Err(e) => panic!("{}", e.emit_to_string(source)),
        }
    }

    fn validate(source: &str) {
        let module = parse(source);
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::empty(),
        )
        .validate(&module)
        .unwrap_or_else(|e| panic!("{:?}", e));
    }

    #[test]
    fn builtin_programs_validate() {
        let config = PrecomputeConfig::default();
        for kind in ProgramKind::ALL {
            let ShaderSource::Wgsl(source) = kind.descriptor(&config).source else {
                panic!("expected inline source for {:?}", kind);
            };
            validate(&source);
        }
    }

    #[test]
    fn entry_points_and_bindings_follow_the_descriptor() {
        let config = PrecomputeConfig::default();
        for kind in ProgramKind::ALL {
            let desc = kind.descriptor(&config);
            let ShaderSource::Wgsl(source) = &desc.source else {
                panic!("expected inline source");
            };
            let module = parse(source);
            let names: Vec<_> = module.entry_points.iter().map(|e| e.name.as_str()).collect();
            assert!(names.contains(&"vs_main") && names.contains(&"fs_main"));

            for (index, (name, _)) in desc.samplers.iter().enumerate() {
                let binding = module
                    .global_variables
                    .iter()
                    .find(|(_, var)| var.name.as_deref() == Some(name.as_str()))
                    .and_then(|(_, var)| var.binding.clone())
                    .unwrap_or_else(|| panic!("{} missing from {:?}", name, kind));
                assert_eq!(binding.binding, 1 + 2 * index as u32);
            }
        }
    }

    #[test]
    fn constants_reflect_config() {
        let config = PrecomputeConfig::default().with_sample_counts(64, 32);
        let header = ProgramKind::Prefilter.header(&config);
        assert!(header.contains("const SAMPLE_COUNT: u32 = 64u;"));
        let header = ProgramKind::Irradiance.header(&config);
        assert!(header.contains("const SAMPLE_DELTA: f32 = 0.025000;"));
    }

    #[test]
    fn shader_dir_switches_to_file_sources() {
        let config = PrecomputeConfig::default().with_shader_dir("/assets/ibl");
        match ProgramKind::Irradiance.descriptor(&config).source {
            ShaderSource::File { path, preamble } => {
                assert!(path.ends_with("irradiance_convolution.wgsl"));
                assert!(preamble.contains("struct Uniforms"));
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn uniform_block_lists_members_in_order() {
        let block = uniform_block_wgsl(&[
            ("u_viewProjMatrix".into(), UniformType::Mat4),
            ("u_roughness".into(), UniformType::Float),
        ]);
        let matrix = block.find("u_viewProjMatrix").unwrap();
        let roughness = block.find("u_roughness").unwrap();
        assert!(matrix < roughness);
        assert!(uniform_block_wgsl(&[]).is_empty());
    }
}
