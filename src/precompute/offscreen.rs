//! The reusable offscreen render target

use std::ops::{Deref, DerefMut};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::shaders::CAPTURE_DEPTH_FORMAT;

/// One framebuffer with a colour and a depth renderbuffer.
///
/// Every stage resizes the renderbuffers to its target size and then attaches texture images
/// over the colour renderbuffer.
#[derive(Debug)]
pub struct OffscreenTarget {
    framebuffer: FramebufferHandle,
    color: RenderbufferHandle,
    depth: RenderbufferHandle,
    size: u32,
}

impl OffscreenTarget {
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        color_format: TextureFormat,
        size: u32,
    ) -> BackendResult<Self> {
        let framebuffer = backend.create_framebuffer()?;
        let color = match backend.create_renderbuffer(color_format) {
            Ok(color) => color,
            Err(e) => {
                backend.destroy_framebuffer(framebuffer);
                return Err(e);
            }
        };
        let depth = match backend.create_renderbuffer(CAPTURE_DEPTH_FORMAT) {
            Ok(depth) => depth,
            Err(e) => {
                backend.destroy_renderbuffer(color);
                backend.destroy_framebuffer(framebuffer);
                return Err(e);
            }
        };

        let mut target = Self {
            framebuffer,
            color,
            depth,
            size: 0,
        };
        let attached = target.resize(backend, size).and_then(|()| {
            backend.framebuffer_renderbuffer(framebuffer, Attachment::Color, color)?;
            backend.framebuffer_renderbuffer(framebuffer, Attachment::Depth, depth)
        });
        if let Err(e) = attached {
            target.destroy(backend);
            return Err(e);
        }

        log::debug!("Created {}x{} offscreen target", size, size);
        Ok(target)
    }

    pub fn framebuffer(&self) -> FramebufferHandle {
        self.framebuffer
    }

    pub fn color_renderbuffer(&self) -> RenderbufferHandle {
        self.color
    }

    pub fn depth_renderbuffer(&self) -> RenderbufferHandle {
        self.depth
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Re-specify renderbuffer storage for `size` square targets. No-op when unchanged.
    pub fn resize<B: GraphicsBackend>(&mut self, backend: &mut B, size: u32) -> BackendResult<()> {
        if self.size == size {
            return Ok(());
        }
        backend.renderbuffer_storage(self.color, size, size)?;
        backend.renderbuffer_storage(self.depth, size, size)?;
        self.size = size;
        Ok(())
    }

    /// Bind the target and `program` with a viewport covering the whole target.
    ///
    /// Both bindings are undone when the returned pass is dropped.
    pub fn begin_pass<'a, B: GraphicsBackend>(
        &self,
        backend: &'a mut B,
        program: ProgramHandle,
    ) -> BackendResult<OffscreenPass<'a, B>> {
        backend.bind_framebuffer(Some(self.framebuffer))?;
        if let Err(e) = backend.use_program(Some(program)) {
            let _ = backend.bind_framebuffer(None);
            return Err(e);
        }
        backend.set_viewport(Viewport::square(self.size));
        Ok(OffscreenPass {
            backend,
            framebuffer: self.framebuffer,
            program,
        })
    }

    pub fn destroy<B: GraphicsBackend>(self, backend: &mut B) {
        backend.destroy_framebuffer(self.framebuffer);
        backend.destroy_renderbuffer(self.color);
        backend.destroy_renderbuffer(self.depth);
        log::debug!("Destroyed offscreen target");
    }
}

/// Scoped binding of the offscreen framebuffer and a program.
///
/// Dereferences to the backend so draws go through the pass.
pub struct OffscreenPass<'a, B: GraphicsBackend> {
    backend: &'a mut B,
    framebuffer: FramebufferHandle,
    program: ProgramHandle,
}

impl<'a, B: GraphicsBackend> OffscreenPass<'a, B> {
    pub fn framebuffer(&self) -> FramebufferHandle {
        self.framebuffer
    }

    pub fn program(&self) -> ProgramHandle {
        self.program
    }

    /// Set a uniform on the pass program, logging instead of failing when it is unknown.
    pub fn set_uniform(&mut self, name: &str, value: UniformValue) {
        if let Err(e) = self.backend.set_uniform(self.program, name, value) {
            log::error!("{}", e);
        }
    }

    /// Bind a texture to a sampler of the pass program, logging when the sampler is unknown.
    pub fn set_texture(&mut self, name: &str, texture: TextureHandle) {
        if let Err(e) = self.backend.set_texture(self.program, name, texture) {
            log::error!("{}", e);
        }
    }

    /// Make `texture`'s image the colour attachment and clear it along with depth.
    pub fn attach_and_clear(
        &mut self,
        texture: TextureHandle,
        target: AttachmentTarget,
        mip_level: u32,
    ) -> BackendResult<()> {
        self.backend
            .framebuffer_texture(self.framebuffer, texture, target, mip_level)?;
        self.backend
            .clear(ClearFlags::COLOR | ClearFlags::DEPTH, ClearValues::default());
        Ok(())
    }
}

impl<B: GraphicsBackend> Deref for OffscreenPass<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        self.backend
    }
}

impl<B: GraphicsBackend> DerefMut for OffscreenPass<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        self.backend
    }
}

impl<B: GraphicsBackend> Drop for OffscreenPass<'_, B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.use_program(None) {
            log::warn!("Failed to unbind program: {}", e);
        }
        if let Err(e) = self.backend.bind_framebuffer(None) {
            log::warn!("Failed to unbind framebuffer: {}", e);
        }
    }
}
