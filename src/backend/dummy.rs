//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. It validates handles and names the same
//! way a real context would, keeps track of live resources and records every call so tests can
//! assert on the exact sequence of work a caller issued.

use std::collections::{HashMap, HashSet};

use crate::backend::traits::*;
use crate::backend::types::*;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateBuffer(BufferHandle),
    DestroyBuffer(BufferHandle),
    CreateTexture { texture: TextureHandle, desc: TextureDescriptor },
    WriteTexture { texture: TextureHandle, bytes: usize },
    GenerateMipmaps(TextureHandle),
    DestroyTexture(TextureHandle),
    CreateRenderbuffer(RenderbufferHandle),
    RenderbufferStorage {
        renderbuffer: RenderbufferHandle,
        width: u32,
        height: u32,
    },
    DestroyRenderbuffer(RenderbufferHandle),
    CreateFramebuffer(FramebufferHandle),
    FramebufferRenderbuffer {
        framebuffer: FramebufferHandle,
        attachment: Attachment,
        renderbuffer: RenderbufferHandle,
    },
    FramebufferTexture {
        framebuffer: FramebufferHandle,
        texture: TextureHandle,
        target: AttachmentTarget,
        mip_level: u32,
    },
    BindFramebuffer(Option<FramebufferHandle>),
    DestroyFramebuffer(FramebufferHandle),
    CreateProgram { program: ProgramHandle, label: String },
    UseProgram(Option<ProgramHandle>),
    SetUniform {
        program: ProgramHandle,
        name: String,
        value: UniformValue,
    },
    SetTexture {
        program: ProgramHandle,
        name: String,
        texture: TextureHandle,
    },
    SetAttribute {
        program: ProgramHandle,
        name: String,
        buffer: BufferHandle,
    },
    DestroyProgram(ProgramHandle),
    SetViewport(Viewport),
    Clear(ClearFlags),
    DrawIndexed(DrawRecord),
    Flush,
}

/// Snapshot of the state a draw was issued with.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub program: ProgramHandle,
    pub framebuffer: FramebufferHandle,
    /// Colour attachment: texture image and mip, or `None` when a renderbuffer is attached.
    pub target: Option<(TextureHandle, AttachmentTarget, u32)>,
    pub viewport: Option<Viewport>,
    pub index_count: u32,
    pub uniforms: HashMap<String, UniformValue>,
}

#[derive(Debug)]
struct DummyProgram {
    desc: ProgramDescriptor,
    status: ProgramStatus,
    uniforms: HashMap<String, UniformValue>,
}

#[derive(Debug, Default)]
struct DummyFramebuffer {
    color_renderbuffer: Option<RenderbufferHandle>,
    color_texture: Option<(TextureHandle, AttachmentTarget, u32)>,
    depth: Option<RenderbufferHandle>,
}

#[derive(Debug)]
struct DummyRenderbuffer {
    format: TextureFormat,
    size: Option<(u32, u32)>,
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    capabilities: Capabilities,
    initial_program_status: ProgramStatus,
    next_id: u64,
    buffers: HashSet<u64>,
    textures: HashMap<u64, TextureDescriptor>,
    renderbuffers: HashMap<u64, DummyRenderbuffer>,
    framebuffers: HashMap<u64, DummyFramebuffer>,
    programs: HashMap<u64, DummyProgram>,
    bound_framebuffer: Option<FramebufferHandle>,
    current_program: Option<ProgramHandle>,
    viewport: Option<Viewport>,
    calls: Vec<Call>,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyBackend {
    /// Create a new dummy backend. Programs compile instantly.
    pub fn new() -> Self {
        Self {
            capabilities: Capabilities::default(),
            initial_program_status: ProgramStatus::Ready,
            next_id: 1,
            buffers: HashSet::new(),
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            bound_framebuffer: None,
            current_program: None,
            viewport: None,
            calls: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Programs created from now on start out `Pending` until [`Self::set_program_status`].
    pub fn with_pending_programs(mut self) -> Self {
        self.initial_program_status = ProgramStatus::Pending;
        self
    }

    pub fn set_program_status(&mut self, program: ProgramHandle, status: ProgramStatus) {
        if let Some(entry) = self.programs.get_mut(&program.0) {
            entry.status = status;
        }
    }

    /// Look up a live program by the label it was created with.
    pub fn program_by_label(&self, label: &str) -> Option<ProgramHandle> {
        self.programs
            .iter()
            .find(|(_, program)| program.desc.label == label)
            .map(|(id, _)| ProgramHandle(*id))
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }

    pub fn draws(&self) -> impl Iterator<Item = &DrawRecord> {
        self.calls.iter().filter_map(|call| match call {
            Call::DrawIndexed(draw) => Some(draw),
            _ => None,
        })
    }

    pub fn texture_alive(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(&texture.0)
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn live_renderbuffers(&self) -> usize {
        self.renderbuffers.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn renderbuffer_size(&self, renderbuffer: RenderbufferHandle) -> Option<(u32, u32)> {
        self.renderbuffers.get(&renderbuffer.0).and_then(|rb| rb.size)
    }

    pub fn bound_framebuffer(&self) -> Option<FramebufferHandle> {
        self.bound_framebuffer
    }

    pub fn current_program(&self) -> Option<ProgramHandle> {
        self.current_program
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn program(&self, program: ProgramHandle) -> BackendResult<&DummyProgram> {
        self.programs
            .get(&program.0)
            .ok_or(BackendError::ProgramNotFound(program))
    }

    fn framebuffer_mut(
        &mut self,
        framebuffer: FramebufferHandle,
    ) -> BackendResult<&mut DummyFramebuffer> {
        self.framebuffers
            .get_mut(&framebuffer.0)
            .ok_or(BackendError::FramebufferNotFound(framebuffer))
    }

    /// Mirrors GL framebuffer completeness: colour and depth must agree in size.
    fn check_complete(&self, framebuffer: FramebufferHandle) -> BackendResult<()> {
        let fb = self
            .framebuffers
            .get(&framebuffer.0)
            .ok_or(BackendError::FramebufferNotFound(framebuffer))?;

        let color_size = match (fb.color_texture, fb.color_renderbuffer) {
            (Some((texture, _, mip)), _) => {
                let desc = self
                    .textures
                    .get(&texture.0)
                    .ok_or(BackendError::TextureNotFound(texture))?;
                Some(((desc.width >> mip).max(1), (desc.height >> mip).max(1)))
            }
            (None, Some(rb)) => self.renderbuffer_size(rb),
            (None, None) => None,
        };
        let Some(color_size) = color_size else {
            return Err(BackendError::IncompleteFramebuffer("no colour attachment".into()));
        };

        if let Some(depth) = fb.depth {
            let depth_size = self.renderbuffer_size(depth);
            if depth_size != Some(color_size) {
                return Err(BackendError::IncompleteFramebuffer(format!(
                    "depth {:?} does not match colour {:?}",
                    depth_size, color_size
                )));
            }
        }
        Ok(())
    }
}

impl GraphicsBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            desc.label,
            data.len()
        );
        let handle = BufferHandle(self.allocate_id());
        self.buffers.insert(handle.0);
        self.calls.push(Call::CreateBuffer(handle));
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        log::trace!("DummyBackend: destroying buffer {:?}", buffer);
        self.buffers.remove(&buffer.0);
        self.calls.push(Call::DestroyBuffer(buffer));
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        log::trace!(
            "DummyBackend: creating texture {:?} ({:?} {}x{}, {} mips)",
            desc.label,
            desc.kind,
            desc.width,
            desc.height,
            desc.mip_levels
        );
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed("zero-sized texture".into()));
        }
        if desc.format.is_float() && !self.capabilities.float_textures {
            return Err(BackendError::MissingCapability("half-float textures"));
        }
        let handle = TextureHandle(self.allocate_id());
        self.textures.insert(handle.0, desc.clone());
        self.calls.push(Call::CreateTexture {
            texture: handle,
            desc: desc.clone(),
        });
        Ok(handle)
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        let desc = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::TextureNotFound(texture))?;
        if data.len() != desc.level_zero_bytes() {
            return Err(BackendError::TextureCreationFailed(format!(
                "expected {} bytes, got {}",
                desc.level_zero_bytes(),
                data.len()
            )));
        }
        log::trace!("DummyBackend: writing {} bytes to {:?}", data.len(), texture);
        self.calls.push(Call::WriteTexture {
            texture,
            bytes: data.len(),
        });
        Ok(())
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) -> BackendResult<()> {
        if !self.textures.contains_key(&texture.0) {
            return Err(BackendError::TextureNotFound(texture));
        }
        log::trace!("DummyBackend: generating mipmaps for {:?}", texture);
        self.calls.push(Call::GenerateMipmaps(texture));
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        log::trace!("DummyBackend: destroying texture {:?}", texture);
        self.textures.remove(&texture.0);
        self.calls.push(Call::DestroyTexture(texture));
    }

    fn create_renderbuffer(&mut self, format: TextureFormat) -> BackendResult<RenderbufferHandle> {
        let handle = RenderbufferHandle(self.allocate_id());
        log::trace!("DummyBackend: creating renderbuffer {:?} ({:?})", handle, format);
        self.renderbuffers
            .insert(handle.0, DummyRenderbuffer { format, size: None });
        self.calls.push(Call::CreateRenderbuffer(handle));
        Ok(handle)
    }

    fn renderbuffer_storage(
        &mut self,
        renderbuffer: RenderbufferHandle,
        width: u32,
        height: u32,
    ) -> BackendResult<()> {
        let rb = self
            .renderbuffers
            .get_mut(&renderbuffer.0)
            .ok_or(BackendError::RenderbufferNotFound(renderbuffer))?;
        log::trace!(
            "DummyBackend: renderbuffer {:?} storage {}x{} ({:?})",
            renderbuffer,
            width,
            height,
            rb.format
        );
        rb.size = Some((width, height));
        self.calls.push(Call::RenderbufferStorage {
            renderbuffer,
            width,
            height,
        });
        Ok(())
    }

    fn destroy_renderbuffer(&mut self, renderbuffer: RenderbufferHandle) {
        log::trace!("DummyBackend: destroying renderbuffer {:?}", renderbuffer);
        self.renderbuffers.remove(&renderbuffer.0);
        self.calls.push(Call::DestroyRenderbuffer(renderbuffer));
    }

    fn create_framebuffer(&mut self) -> BackendResult<FramebufferHandle> {
        let handle = FramebufferHandle(self.allocate_id());
        log::trace!("DummyBackend: creating framebuffer {:?}", handle);
        self.framebuffers.insert(handle.0, DummyFramebuffer::default());
        self.calls.push(Call::CreateFramebuffer(handle));
        Ok(handle)
    }

    fn framebuffer_renderbuffer(
        &mut self,
        framebuffer: FramebufferHandle,
        attachment: Attachment,
        renderbuffer: RenderbufferHandle,
    ) -> BackendResult<()> {
        if !self.renderbuffers.contains_key(&renderbuffer.0) {
            return Err(BackendError::RenderbufferNotFound(renderbuffer));
        }
        let fb = self.framebuffer_mut(framebuffer)?;
        match attachment {
            Attachment::Color => {
                fb.color_renderbuffer = Some(renderbuffer);
                fb.color_texture = None;
            }
            Attachment::Depth => fb.depth = Some(renderbuffer),
        }
        self.calls.push(Call::FramebufferRenderbuffer {
            framebuffer,
            attachment,
            renderbuffer,
        });
        Ok(())
    }

    fn framebuffer_texture(
        &mut self,
        framebuffer: FramebufferHandle,
        texture: TextureHandle,
        target: AttachmentTarget,
        mip_level: u32,
    ) -> BackendResult<()> {
        let desc = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::TextureNotFound(texture))?;
        let kind_matches = matches!(
            (desc.kind, target),
            (TextureKind::D2, AttachmentTarget::Texture2D)
                | (TextureKind::Cube, AttachmentTarget::CubeFace(_))
        );
        if !kind_matches || mip_level >= desc.mip_levels {
            return Err(BackendError::IncompleteFramebuffer(format!(
                "{:?} mip {} is not an image of {:?}",
                target, mip_level, texture
            )));
        }
        log::trace!(
            "DummyBackend: attaching {:?} {:?} mip {} to {:?}",
            texture,
            target,
            mip_level,
            framebuffer
        );
        self.framebuffer_mut(framebuffer)?.color_texture = Some((texture, target, mip_level));
        self.calls.push(Call::FramebufferTexture {
            framebuffer,
            texture,
            target,
            mip_level,
        });
        Ok(())
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) -> BackendResult<()> {
        if let Some(fb) = framebuffer {
            if !self.framebuffers.contains_key(&fb.0) {
                return Err(BackendError::FramebufferNotFound(fb));
            }
        }
        self.bound_framebuffer = framebuffer;
        self.calls.push(Call::BindFramebuffer(framebuffer));
        Ok(())
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        log::trace!("DummyBackend: destroying framebuffer {:?}", framebuffer);
        self.framebuffers.remove(&framebuffer.0);
        if self.bound_framebuffer == Some(framebuffer) {
            self.bound_framebuffer = None;
        }
        self.calls.push(Call::DestroyFramebuffer(framebuffer));
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        let handle = ProgramHandle(self.allocate_id());
        log::trace!(
            "DummyBackend: creating program `{}` as {:?} ({:?})",
            desc.label,
            handle,
            self.initial_program_status
        );
        self.programs.insert(
            handle.0,
            DummyProgram {
                desc: desc.clone(),
                status: self.initial_program_status,
                uniforms: HashMap::new(),
            },
        );
        self.calls.push(Call::CreateProgram {
            program: handle,
            label: desc.label.clone(),
        });
        Ok(handle)
    }

    fn program_status(&mut self, program: ProgramHandle) -> ProgramStatus {
        self.programs
            .get(&program.0)
            .map(|p| p.status)
            .unwrap_or(ProgramStatus::Failed)
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) -> BackendResult<()> {
        if let Some(handle) = program {
            self.program(handle)?;
        }
        self.current_program = program;
        self.calls.push(Call::UseProgram(program));
        Ok(())
    }

    fn set_uniform(
        &mut self,
        program: ProgramHandle,
        name: &str,
        value: UniformValue,
    ) -> BackendResult<()> {
        let entry = self
            .programs
            .get_mut(&program.0)
            .ok_or(BackendError::ProgramNotFound(program))?;
        let declared = entry
            .desc
            .uniforms
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ty)| *ty)
            .ok_or_else(|| BackendError::UniformNotFound {
                program,
                name: name.to_string(),
            })?;
        if declared != value.ty() {
            return Err(BackendError::UniformTypeMismatch {
                name: name.to_string(),
                expected: declared,
                actual: value.ty(),
            });
        }
        log::trace!("DummyBackend: {:?}.{} = {:?}", program, name, value);
        entry.uniforms.insert(name.to_string(), value);
        self.calls.push(Call::SetUniform {
            program,
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    fn set_texture(
        &mut self,
        program: ProgramHandle,
        name: &str,
        texture: TextureHandle,
    ) -> BackendResult<()> {
        if self.program(program)?.desc.sampler_index(name).is_none() {
            return Err(BackendError::SamplerNotFound {
                program,
                name: name.to_string(),
            });
        }
        if !self.textures.contains_key(&texture.0) {
            return Err(BackendError::TextureNotFound(texture));
        }
        self.calls.push(Call::SetTexture {
            program,
            name: name.to_string(),
            texture,
        });
        Ok(())
    }

    fn set_attribute(
        &mut self,
        program: ProgramHandle,
        name: &str,
        buffer: BufferHandle,
    ) -> BackendResult<()> {
        if self.program(program)?.desc.attribute_index(name).is_none() {
            return Err(BackendError::AttributeNotFound {
                program,
                name: name.to_string(),
            });
        }
        if !self.buffers.contains(&buffer.0) {
            return Err(BackendError::BufferNotFound(buffer));
        }
        self.calls.push(Call::SetAttribute {
            program,
            name: name.to_string(),
            buffer,
        });
        Ok(())
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        log::trace!("DummyBackend: destroying program {:?}", program);
        self.programs.remove(&program.0);
        if self.current_program == Some(program) {
            self.current_program = None;
        }
        self.calls.push(Call::DestroyProgram(program));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
        self.calls.push(Call::SetViewport(viewport));
    }

    fn clear(&mut self, flags: ClearFlags, _values: ClearValues) {
        self.calls.push(Call::Clear(flags));
    }

    fn draw_indexed(
        &mut self,
        index_buffer: BufferHandle,
        _index_format: IndexFormat,
        index_count: u32,
    ) -> BackendResult<()> {
        let program = self.current_program.ok_or(BackendError::NoProgramBound)?;
        let framebuffer = self.bound_framebuffer.ok_or(BackendError::NoFramebufferBound)?;
        if !self.buffers.contains(&index_buffer.0) {
            return Err(BackendError::BufferNotFound(index_buffer));
        }
        let entry = self.program(program)?;
        if entry.status != ProgramStatus::Ready {
            return Err(BackendError::ProgramNotReady(program));
        }
        let uniforms = entry.uniforms.clone();
        self.check_complete(framebuffer)?;

        let target = self
            .framebuffers
            .get(&framebuffer.0)
            .and_then(|fb| fb.color_texture);
        log::trace!(
            "DummyBackend: draw {} indices with {:?} into {:?}",
            index_count,
            program,
            target
        );
        self.calls.push(Call::DrawIndexed(DrawRecord {
            program,
            framebuffer,
            target,
            viewport: self.viewport,
            index_count,
            uniforms,
        }));
        Ok(())
    }

    fn flush(&mut self) {
        log::trace!("DummyBackend: flush");
        self.calls.push(Call::Flush);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program_desc() -> ProgramDescriptor {
        ProgramDescriptor::new(
            "test",
            ShaderSource::Wgsl(String::new()),
            TextureFormat::Rgba16Float,
        )
        .with_attribute("a_position", VertexFormat::Float32x3)
        .with_uniform("u_roughness", UniformType::Float)
    }

    #[test]
    fn unknown_uniform_is_reported() {
        let mut backend = DummyBackend::new();
        let program = backend.create_program(&program_desc()).unwrap();
        let err = backend
            .set_uniform(program, "u_missing", UniformValue::Float(1.0))
            .unwrap_err();
        assert!(matches!(err, BackendError::UniformNotFound { .. }));
    }

    #[test]
    fn uniform_type_is_checked() {
        let mut backend = DummyBackend::new();
        let program = backend.create_program(&program_desc()).unwrap();
        let err = backend
            .set_uniform(program, "u_roughness", UniformValue::Mat4(glam::Mat4::IDENTITY))
            .unwrap_err();
        assert!(matches!(err, BackendError::UniformTypeMismatch { .. }));
    }

    #[test]
    fn draw_requires_matching_attachment_sizes() {
        let mut backend = DummyBackend::new();
        let program = backend.create_program(&program_desc()).unwrap();
        let indices = backend
            .create_buffer_init(
                &BufferDescriptor {
                    label: None,
                    size: 6,
                    usage: BufferUsage::INDEX,
                },
                &[0; 6],
            )
            .unwrap();
        let fb = backend.create_framebuffer().unwrap();
        let depth = backend.create_renderbuffer(TextureFormat::Depth24Plus).unwrap();
        backend.renderbuffer_storage(depth, 32, 32).unwrap();
        backend
            .framebuffer_renderbuffer(fb, Attachment::Depth, depth)
            .unwrap();
        let cube = backend
            .create_texture(&TextureDescriptor::new_cube(64, TextureFormat::Rgba16Float))
            .unwrap();
        backend
            .framebuffer_texture(fb, cube, AttachmentTarget::CubeFace(CubeFace::PositiveX), 0)
            .unwrap();
        backend.bind_framebuffer(Some(fb)).unwrap();
        backend.use_program(Some(program)).unwrap();

        assert!(matches!(
            backend.draw_indexed(indices, IndexFormat::Uint16, 3),
            Err(BackendError::IncompleteFramebuffer(_))
        ));

        backend.renderbuffer_storage(depth, 64, 64).unwrap();
        backend
            .draw_indexed(indices, IndexFormat::Uint16, 3)
            .unwrap();
        assert_eq!(backend.draws().count(), 1);
    }

    #[test]
    fn pending_programs_refuse_to_draw_until_ready() {
        let mut backend = DummyBackend::new().with_pending_programs();
        let program = backend.create_program(&program_desc()).unwrap();
        assert_eq!(backend.program_status(program), ProgramStatus::Pending);
        backend.set_program_status(program, ProgramStatus::Ready);
        assert_eq!(backend.program_status(program), ProgramStatus::Ready);
        assert_eq!(backend.program_by_label("test"), Some(program));
    }
}
