//! Core backend abstraction traits
//!
//! A GL-style graphics context: named uniforms, samplers and attributes on program objects,
//! framebuffers with swappable attachments and an implicit current program/framebuffer.
//! Both the wgpu backend and the recording dummy backend implement it.

use crate::backend::types::*;
use std::path::PathBuf;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Missing capability: {0}")]
    MissingCapability(&'static str),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("Unknown buffer {0:?}")]
    BufferNotFound(BufferHandle),
    #[error("Unknown texture {0:?}")]
    TextureNotFound(TextureHandle),
    #[error("Unknown renderbuffer {0:?}")]
    RenderbufferNotFound(RenderbufferHandle),
    #[error("Unknown framebuffer {0:?}")]
    FramebufferNotFound(FramebufferHandle),
    #[error("Unknown program {0:?}")]
    ProgramNotFound(ProgramHandle),
    #[error("Program {program:?} has no uniform named `{name}`")]
    UniformNotFound { program: ProgramHandle, name: String },
    #[error("Program {program:?} has no sampler named `{name}`")]
    SamplerNotFound { program: ProgramHandle, name: String },
    #[error("Program {program:?} has no attribute named `{name}`")]
    AttributeNotFound { program: ProgramHandle, name: String },
    #[error("Uniform `{name}` expects {expected:?}, got {actual:?}")]
    UniformTypeMismatch {
        name: String,
        expected: UniformType,
        actual: UniformType,
    },
    #[error("Program {0:?} is not ready")]
    ProgramNotReady(ProgramHandle),
    #[error("No program in use")]
    NoProgramBound,
    #[error("No framebuffer bound")]
    NoFramebufferBound,
    #[error("Incomplete framebuffer: {0}")]
    IncompleteFramebuffer(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a renderbuffer (an attachment-only image with resizable storage)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderbufferHandle(pub(crate) u64);

/// Handle to a framebuffer object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferHandle(pub(crate) u64);

/// Handle to a shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) u64);

/// Compilation state of a program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramStatus {
    /// Sources are still loading or compiling.
    Pending,
    Ready,
    /// Compilation or linking failed. The program never becomes ready.
    Failed,
}

/// Features the precompute pipeline cannot run without
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Half-float textures can be created and sampled.
    pub float_textures: bool,
    /// Half-float textures support linear filtering.
    pub float_linear_filtering: bool,
    /// Half-float textures can be rendered to.
    pub float_render_targets: bool,
    pub max_texture_size: u32,
}

impl Capabilities {
    /// Checks the capabilities needed to render HDR cubemaps of up to `largest_target` texels.
    pub fn ensure_float_rendering(&self, largest_target: u32) -> BackendResult<()> {
        if !self.float_textures {
            return Err(BackendError::MissingCapability("half-float textures"));
        }
        if !self.float_linear_filtering {
            return Err(BackendError::MissingCapability("linear filtering of half-float textures"));
        }
        if !self.float_render_targets {
            return Err(BackendError::MissingCapability("half-float render targets"));
        }
        if largest_target > self.max_texture_size {
            return Err(BackendError::MissingCapability("texture size"));
        }
        Ok(())
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            float_textures: true,
            float_linear_filtering: true,
            float_render_targets: true,
            max_texture_size: 8192,
        }
    }
}

/// Where a program's WGSL comes from
#[derive(Debug, Clone, PartialEq)]
pub enum ShaderSource {
    Wgsl(String),
    /// Read on a background thread; `preamble` is prepended to the file contents.
    File { path: PathBuf, preamble: String },
}

/// Program descriptor
///
/// The shader module must expose `vs_main` and `fs_main`. Uniforms live in one block at
/// `@group(0) @binding(0)` in declaration order; sampler `i` binds its texture at
/// `1 + 2i` and its sampler at `2 + 2i`; attribute `i` reads from `@location(i)`.
#[derive(Debug, Clone)]
pub struct ProgramDescriptor {
    pub label: String,
    pub source: ShaderSource,
    pub attributes: Vec<(String, VertexFormat)>,
    pub uniforms: Vec<(String, UniformType)>,
    pub samplers: Vec<(String, TextureKind)>,
    pub color_format: TextureFormat,
    pub depth_format: Option<TextureFormat>,
}

impl ProgramDescriptor {
    pub fn new(label: impl Into<String>, source: ShaderSource, color_format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            source,
            attributes: Vec::new(),
            uniforms: Vec::new(),
            samplers: Vec::new(),
            color_format,
            depth_format: None,
        }
    }

    pub fn with_attribute(mut self, name: &str, format: VertexFormat) -> Self {
        self.attributes.push((name.to_string(), format));
        self
    }

    pub fn with_uniform(mut self, name: &str, ty: UniformType) -> Self {
        self.uniforms.push((name.to_string(), ty));
        self
    }

    pub fn with_sampler(mut self, name: &str, kind: TextureKind) -> Self {
        self.samplers.push((name.to_string(), kind));
        self
    }

    pub fn with_depth(mut self, format: TextureFormat) -> Self {
        self.depth_format = Some(format);
        self
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|(n, _)| n == name)
    }

    pub fn sampler_index(&self, name: &str) -> Option<usize> {
        self.samplers.iter().position(|(n, _)| n == name)
    }
}

/// Main graphics backend trait
pub trait GraphicsBackend {
    /// Get the backend name
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    // Buffers

    /// Create a buffer with initial data
    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8])
        -> BackendResult<BufferHandle>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    // Textures

    /// Create a texture. Contents are undefined until written or rendered.
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Write the whole of mip 0 of a 2D texture
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()>;

    /// Fill mips 1.. of every layer by successive downsampling of mip 0
    fn generate_mipmaps(&mut self, texture: TextureHandle) -> BackendResult<()>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    // Renderbuffers and framebuffers

    fn create_renderbuffer(&mut self, format: TextureFormat) -> BackendResult<RenderbufferHandle>;

    /// (Re)allocate renderbuffer storage. Previous contents are discarded.
    fn renderbuffer_storage(
        &mut self,
        renderbuffer: RenderbufferHandle,
        width: u32,
        height: u32,
    ) -> BackendResult<()>;

    fn destroy_renderbuffer(&mut self, renderbuffer: RenderbufferHandle);

    fn create_framebuffer(&mut self) -> BackendResult<FramebufferHandle>;

    fn framebuffer_renderbuffer(
        &mut self,
        framebuffer: FramebufferHandle,
        attachment: Attachment,
        renderbuffer: RenderbufferHandle,
    ) -> BackendResult<()>;

    /// Attach one mip of a texture image as the colour attachment
    fn framebuffer_texture(
        &mut self,
        framebuffer: FramebufferHandle,
        texture: TextureHandle,
        target: AttachmentTarget,
        mip_level: u32,
    ) -> BackendResult<()>;

    /// Bind a framebuffer for subsequent clears and draws, `None` unbinds
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) -> BackendResult<()>;

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    // Programs

    /// Request a program. Compilation may finish later, see [`GraphicsBackend::program_status`].
    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle>;

    /// Poll a program. Drives pending source loads and compilation.
    fn program_status(&mut self, program: ProgramHandle) -> ProgramStatus;

    /// Select the program used by subsequent draws, `None` unbinds
    fn use_program(&mut self, program: Option<ProgramHandle>) -> BackendResult<()>;

    fn set_uniform(
        &mut self,
        program: ProgramHandle,
        name: &str,
        value: UniformValue,
    ) -> BackendResult<()>;

    fn set_texture(
        &mut self,
        program: ProgramHandle,
        name: &str,
        texture: TextureHandle,
    ) -> BackendResult<()>;

    /// Source a vertex attribute from a tightly packed buffer
    fn set_attribute(
        &mut self,
        program: ProgramHandle,
        name: &str,
        buffer: BufferHandle,
    ) -> BackendResult<()>;

    fn destroy_program(&mut self, program: ProgramHandle);

    // Drawing

    fn set_viewport(&mut self, viewport: Viewport);

    /// Clear the bound framebuffer's attachments
    fn clear(&mut self, flags: ClearFlags, values: ClearValues);

    /// Draw indexed triangles with the current program into the bound framebuffer
    fn draw_indexed(
        &mut self,
        index_buffer: BufferHandle,
        index_format: IndexFormat,
        index_count: u32,
    ) -> BackendResult<()>;

    /// Submit recorded work
    fn flush(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_check_names_missing_feature() {
        let caps = Capabilities {
            float_linear_filtering: false,
            ..Capabilities::default()
        };
        let err = caps.ensure_float_rendering(1024).unwrap_err();
        assert!(matches!(err, BackendError::MissingCapability(name) if name.contains("filtering")));
    }

    #[test]
    fn capability_check_rejects_oversized_targets() {
        let caps = Capabilities {
            max_texture_size: 512,
            ..Capabilities::default()
        };
        assert!(caps.ensure_float_rendering(512).is_ok());
        assert!(caps.ensure_float_rendering(1024).is_err());
    }

    #[test]
    fn descriptor_indexes_by_declaration_order() {
        let desc = ProgramDescriptor::new("quad", ShaderSource::Wgsl(String::new()), TextureFormat::Rg16Float)
            .with_attribute("a_position", VertexFormat::Float32x3)
            .with_attribute("a_texCoord", VertexFormat::Float32x2);
        assert_eq!(desc.attribute_index("a_texCoord"), Some(1));
        assert_eq!(desc.attribute_index("a_normal"), None);
    }
}
