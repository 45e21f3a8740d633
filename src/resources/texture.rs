//! Texture loading and management

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::loader::{LoadError, LoadHandle};
use half::f16;
use image::ImageError;
use std::path::{Path, PathBuf};

/// Decoded high dynamic range image, RGBA 32-bit float, rows top to bottom
#[derive(Debug, Clone)]
pub struct HdrImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<f32>,
    pub name: String,
}

impl HdrImage {
    /// Decode an image file. Radiance `.hdr` keeps its full range; LDR formats map to 0..1.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let img = image::open(path).map_err(|e| match e {
            ImageError::IoError(source) => LoadError::Io {
                path: path.to_path_buf(),
                source,
            },
            other => LoadError::Decode {
                path: path.to_path_buf(),
                message: other.to_string(),
            },
        })?;
        let rgba = img.into_rgba32f();

        Ok(Self {
            width: rgba.width(),
            height: rgba.height(),
            pixels: rgba.into_raw(),
            name,
        })
    }

    /// Create a single color image
    pub fn solid_color(width: u32, height: u32, color: [f32; 4], name: &str) -> Self {
        let pixels = color
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect();
        Self {
            width,
            height,
            pixels,
            name: name.to_string(),
        }
    }

    /// Pixel data converted to half floats, as uploaded to an `Rgba16Float` texture.
    ///
    /// Values past the half-float range saturate at `f16::MAX` instead of becoming infinite.
    pub fn to_rgba16f_bytes(&self) -> Vec<u8> {
        let max = f16::MAX.to_f32();
        let halves: Vec<f16> = self
            .pixels
            .iter()
            .map(|v| f16::from_f32(v.min(max)))
            .collect();
        bytemuck::cast_slice(&halves).to_vec()
    }
}

/// Read-only description of a texture handed out to renderers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureInfo {
    /// `None` until the texture has been generated.
    pub handle: Option<TextureHandle>,
    pub kind: TextureKind,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
}

impl TextureInfo {
    /// Info for a texture that does not exist yet
    pub fn pending(kind: TextureKind, format: TextureFormat) -> Self {
        Self {
            handle: None,
            kind,
            format,
            width: 0,
            height: 0,
            mip_levels: 0,
        }
    }

    pub fn is_available(&self) -> bool {
        self.handle.is_some()
    }
}

/// GPU texture owned by the caller
#[derive(Debug)]
pub struct GpuTexture {
    pub handle: TextureHandle,
    pub kind: TextureKind,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub name: String,
}

impl GpuTexture {
    /// Allocate an uninitialised texture
    pub fn create<B: GraphicsBackend>(
        backend: &mut B,
        desc: &TextureDescriptor,
    ) -> BackendResult<Self> {
        let handle = backend.create_texture(desc)?;
        Ok(Self {
            handle,
            kind: desc.kind,
            format: desc.format,
            width: desc.width,
            height: desc.height,
            mip_levels: desc.mip_levels,
            name: desc.label.clone().unwrap_or_default(),
        })
    }

    /// Create and upload an HDR image as an `Rgba16Float` 2D texture
    pub fn from_hdr<B: GraphicsBackend>(
        backend: &mut B,
        image: &HdrImage,
    ) -> BackendResult<Self> {
        let desc = TextureDescriptor::new_2d(image.width, image.height, TextureFormat::Rgba16Float)
            .with_label(image.name.clone());
        let texture = Self::create(backend, &desc)?;
        if let Err(e) = backend.write_texture(texture.handle, &image.to_rgba16f_bytes()) {
            backend.destroy_texture(texture.handle);
            return Err(e);
        }
        Ok(texture)
    }

    pub fn info(&self) -> TextureInfo {
        TextureInfo {
            handle: Some(self.handle),
            kind: self.kind,
            format: self.format,
            width: self.width,
            height: self.height,
            mip_levels: self.mip_levels,
        }
    }

    pub fn destroy<B: GraphicsBackend>(self, backend: &mut B) {
        backend.destroy_texture(self.handle);
    }
}

enum RadianceState {
    Decoding(LoadHandle<Result<HdrImage, LoadError>>),
    Uploaded(GpuTexture),
    Failed,
}

/// Equirectangular radiance panorama, decoded off-thread and uploaded on the first poll after.
pub struct RadianceTexture {
    name: String,
    state: RadianceState,
}

impl RadianceTexture {
    /// Start decoding `path` on a background thread
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        let job_path = path.clone();
        match LoadHandle::spawn("radiance-decode", move || HdrImage::from_file(job_path)) {
            Ok(handle) => Self::from_handle(name, handle),
            Err(e) => {
                log::error!("Cannot load radiance panorama {}: {}", name, e);
                Self {
                    name,
                    state: RadianceState::Failed,
                }
            }
        }
    }

    /// Wrap an already decoded image; it uploads on the next poll
    pub fn from_image(image: HdrImage) -> Self {
        let name = image.name.clone();
        Self::from_handle(name, LoadHandle::ready(Ok(image)))
    }

    /// Wrap a decode that some other producer completes
    pub fn from_handle(
        name: impl Into<String>,
        handle: LoadHandle<Result<HdrImage, LoadError>>,
    ) -> Self {
        Self {
            name: name.into(),
            state: RadianceState::Decoding(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drive the load. Returns `true` once the panorama is resident on the GPU.
    ///
    /// A failed decode or upload is logged once and the texture never becomes ready.
    pub fn poll<B: GraphicsBackend>(&mut self, backend: &mut B) -> bool {
        let received = match &self.state {
            RadianceState::Uploaded(_) => return true,
            RadianceState::Failed => return false,
            RadianceState::Decoding(handle) => handle.try_recv(),
        };

        let image = match received {
            Ok(None) => return false,
            Ok(Some(Ok(image))) => image,
            Ok(Some(Err(e))) | Err(e) => {
                log::error!("Radiance panorama {} failed to load: {}", self.name, e);
                self.state = RadianceState::Failed;
                return false;
            }
        };

        match GpuTexture::from_hdr(backend, &image) {
            Ok(texture) => {
                log::info!(
                    "Radiance panorama {} uploaded ({}x{})",
                    self.name,
                    texture.width,
                    texture.height
                );
                self.state = RadianceState::Uploaded(texture);
                true
            }
            Err(e) => {
                log::error!("Radiance panorama {} failed to upload: {}", self.name, e);
                self.state = RadianceState::Failed;
                false
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, RadianceState::Uploaded(_))
    }

    pub fn has_failed(&self) -> bool {
        matches!(self.state, RadianceState::Failed)
    }

    pub fn texture(&self) -> Option<&GpuTexture> {
        match &self.state {
            RadianceState::Uploaded(texture) => Some(texture),
            _ => None,
        }
    }

    /// Destroy the GPU copy, if any. A decode still in flight is abandoned.
    pub fn release<B: GraphicsBackend>(self, backend: &mut B) {
        if let RadianceState::Uploaded(texture) = self.state {
            texture.destroy(backend);
        }
    }
}
