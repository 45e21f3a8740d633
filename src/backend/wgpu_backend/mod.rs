//! wgpu backend implementation
//!
//! A headless device that emulates the GL-style context on top of wgpu. Clears are deferred and
//! folded into the load op of the next render pass; each draw records its own pass.

mod mipmap;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::LoadHandle;
use mipmap::MipmapGenerator;
use std::collections::HashMap;
use wgpu::util::DeviceExt;

/// Adapter selection for [`WgpuBackend`]
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub power_preference: wgpu::PowerPreference,
    /// Use a software adapter, e.g. on CI machines without a GPU
    pub force_fallback_adapter: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
        }
    }
}

struct TextureEntry {
    texture: wgpu::Texture,
    /// Whole-resource view bound to samplers
    sample_view: wgpu::TextureView,
    desc: TextureDescriptor,
}

struct RenderbufferEntry {
    format: TextureFormat,
    /// `None` until storage is allocated
    storage: Option<(wgpu::TextureView, u32, u32)>,
}

enum ColorAttachment {
    Renderbuffer(RenderbufferHandle),
    Texture {
        view: wgpu::TextureView,
        width: u32,
        height: u32,
    },
}

#[derive(Default)]
struct FramebufferEntry {
    color: Option<ColorAttachment>,
    depth: Option<RenderbufferHandle>,
}

struct ProgramPipeline {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

enum ProgramState {
    Loading(LoadHandle<std::io::Result<String>>),
    Ready(ProgramPipeline),
    Failed,
}

struct ProgramEntry {
    desc: ProgramDescriptor,
    layout: UniformLayout,
    uniform_data: Vec<u8>,
    textures: Vec<Option<TextureHandle>>,
    attributes: Vec<Option<BufferHandle>>,
    state: ProgramState,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    capabilities: Capabilities,

    // Resource storage
    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, TextureEntry>,
    renderbuffers: HashMap<u64, RenderbufferEntry>,
    framebuffers: HashMap<u64, FramebufferEntry>,
    programs: HashMap<u64, ProgramEntry>,
    next_id: u64,

    clamp_sampler: wgpu::Sampler,
    repeat_sampler: wgpu::Sampler,
    mipmaps: MipmapGenerator,

    // Context state
    current_program: Option<ProgramHandle>,
    current_framebuffer: Option<FramebufferHandle>,
    viewport: Option<Viewport>,
    pending_clear: Option<(ClearFlags, ClearValues)>,

    // Command encoding
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuBackend {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::Depth24Plus => wgpu::TextureFormat::Depth24Plus,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }

    fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
        let mut result = wgpu::BufferUsages::empty();
        if usage.contains(BufferUsage::COPY_SRC) {
            result |= wgpu::BufferUsages::COPY_SRC;
        }
        if usage.contains(BufferUsage::COPY_DST) {
            result |= wgpu::BufferUsages::COPY_DST;
        }
        if usage.contains(BufferUsage::INDEX) {
            result |= wgpu::BufferUsages::INDEX;
        }
        if usage.contains(BufferUsage::VERTEX) {
            result |= wgpu::BufferUsages::VERTEX;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            result |= wgpu::BufferUsages::UNIFORM;
        }
        result
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        result
    }

    fn convert_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
        match format {
            VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        }
    }

    fn convert_index_format(format: IndexFormat) -> wgpu::IndexFormat {
        match format {
            IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
            IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
        }
    }

    fn view_dimension(kind: TextureKind) -> wgpu::TextureViewDimension {
        match kind {
            TextureKind::D2 => wgpu::TextureViewDimension::D2,
            TextureKind::Cube => wgpu::TextureViewDimension::Cube,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl WgpuBackend {
    /// Create a headless backend, blocking on adapter and device requests
    pub fn new_headless(config: &BackendConfig) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(config))
    }

    pub async fn new_async(config: &BackendConfig) -> BackendResult<Self> {
        let backends = if std::env::var("WGPU_BACKEND").is_ok() {
            wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all())
        } else {
            wgpu::Backends::all()
        };

        let mut instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let mut adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference,
                compatible_surface: None,
                force_fallback_adapter: config.force_fallback_adapter,
            })
            .await;

        // If no adapter found with the requested backends, try with all backends
        if adapter.is_none() && backends != wgpu::Backends::all() {
            log::warn!("Requested backend not available, falling back to all backends");
            instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: config.power_preference,
                    compatible_surface: None,
                    force_fallback_adapter: config.force_fallback_adapter,
                })
                .await;
        }
        let adapter = adapter
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("IBL Precompute Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        let capabilities = Self::query_capabilities(&adapter, &device);
        log::debug!("Device capabilities: {:?}", capabilities);

        let sampler = |label, address_mode| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: address_mode,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::FilterMode::Linear,
                ..Default::default()
            })
        };
        let clamp_sampler = sampler("clamp_sampler", wgpu::AddressMode::ClampToEdge);
        // Panoramas wrap around in longitude
        let repeat_sampler = sampler("repeat_sampler", wgpu::AddressMode::Repeat);
        let mipmaps = MipmapGenerator::new(&device);

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            capabilities,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            next_id: 1,
            clamp_sampler,
            repeat_sampler,
            mipmaps,
            current_program: None,
            current_framebuffer: None,
            viewport: None,
            pending_clear: None,
            encoder: None,
        })
    }

    fn query_capabilities(adapter: &wgpu::Adapter, device: &wgpu::Device) -> Capabilities {
        let hdr = adapter.get_texture_format_features(wgpu::TextureFormat::Rgba16Float);
        let lut = adapter.get_texture_format_features(wgpu::TextureFormat::Rg16Float);
        let renderable = |features: &wgpu::TextureFormatFeatures| {
            features
                .allowed_usages
                .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
        };

        Capabilities {
            float_textures: hdr
                .allowed_usages
                .contains(wgpu::TextureUsages::TEXTURE_BINDING),
            float_linear_filtering: hdr
                .flags
                .contains(wgpu::TextureFormatFeatureFlags::FILTERABLE),
            float_render_targets: renderable(&hdr) && renderable(&lut),
            max_texture_size: device.limits().max_texture_dimension_2d,
        }
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Underlying wgpu texture, for sharing the baked maps with a renderer
    pub fn texture(&self, texture: TextureHandle) -> Option<&wgpu::Texture> {
        self.textures.get(&texture.0).map(|entry| &entry.texture)
    }

    /// Execute a deferred clear as an empty render pass
    fn resolve_pending_clear(&mut self) {
        let Some((flags, values)) = self.pending_clear.take() else {
            return;
        };
        let Some(fb) = self
            .current_framebuffer
            .and_then(|handle| self.framebuffers.get(&handle.0))
        else {
            return;
        };
        let targets = color_target(&self.renderbuffers, fb).and_then(|(color, width, height)| {
            Ok((color, depth_target(&self.renderbuffers, fb, width, height)?))
        });
        match targets {
            Ok((color, depth)) => {
                let encoder = command_encoder(&mut self.encoder, &self.device);
                let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("clear_pass"),
                    color_attachments: &[Some(color_attachment(color, Some((flags, values))))],
                    depth_stencil_attachment: depth
                        .map(|view| depth_attachment(view, Some((flags, values)))),
                    occlusion_query_set: None,
                    timestamp_writes: None,
                });
            }
            Err(e) => log::warn!("Dropping clear of incomplete framebuffer: {}", e),
        }
    }

    fn poll_program(&mut self, program: ProgramHandle) -> ProgramStatus {
        let Some(entry) = self.programs.get_mut(&program.0) else {
            return ProgramStatus::Failed;
        };
        let source = match &entry.state {
            ProgramState::Ready(_) => return ProgramStatus::Ready,
            ProgramState::Failed => return ProgramStatus::Failed,
            ProgramState::Loading(handle) => match handle.try_recv() {
                Ok(None) => return ProgramStatus::Pending,
                Ok(Some(Ok(source))) => source,
                Ok(Some(Err(e))) => {
                    log::error!("Failed to read shader for `{}`: {}", entry.desc.label, e);
                    entry.state = ProgramState::Failed;
                    return ProgramStatus::Failed;
                }
                Err(e) => {
                    log::error!("Shader load for `{}` failed: {}", entry.desc.label, e);
                    entry.state = ProgramState::Failed;
                    return ProgramStatus::Failed;
                }
            },
        };

        let state = match compile_program(&self.device, &entry.desc, &entry.layout, &source) {
            Ok(pipeline) => {
                log::debug!("Program `{}` is ready", entry.desc.label);
                ProgramState::Ready(pipeline)
            }
            Err(e) => {
                log::error!("{}", e);
                ProgramState::Failed
            }
        };
        entry.state = state;
        match entry.state {
            ProgramState::Ready(_) => ProgramStatus::Ready,
            _ => ProgramStatus::Failed,
        }
    }
}

fn command_encoder<'a>(
    slot: &'a mut Option<wgpu::CommandEncoder>,
    device: &wgpu::Device,
) -> &'a mut wgpu::CommandEncoder {
    slot.get_or_insert_with(|| {
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Precompute Encoder"),
        })
    })
}

/// Colour view and size of a framebuffer's colour attachment
fn color_target<'a>(
    renderbuffers: &'a HashMap<u64, RenderbufferEntry>,
    fb: &'a FramebufferEntry,
) -> BackendResult<(&'a wgpu::TextureView, u32, u32)> {
    match &fb.color {
        Some(ColorAttachment::Texture {
            view, width, height, ..
        }) => Ok((view, *width, *height)),
        Some(ColorAttachment::Renderbuffer(rb)) => {
            let entry = renderbuffers
                .get(&rb.0)
                .ok_or(BackendError::RenderbufferNotFound(*rb))?;
            let (view, width, height) = entry.storage.as_ref().ok_or_else(|| {
                BackendError::IncompleteFramebuffer("colour renderbuffer has no storage".into())
            })?;
            Ok((view, *width, *height))
        }
        None => Err(BackendError::IncompleteFramebuffer("no colour attachment".into())),
    }
}

/// Depth view of a framebuffer, which must match the colour attachment in size
fn depth_target<'a>(
    renderbuffers: &'a HashMap<u64, RenderbufferEntry>,
    fb: &FramebufferEntry,
    width: u32,
    height: u32,
) -> BackendResult<Option<&'a wgpu::TextureView>> {
    let Some(rb) = fb.depth else {
        return Ok(None);
    };
    let entry = renderbuffers
        .get(&rb.0)
        .ok_or(BackendError::RenderbufferNotFound(rb))?;
    match &entry.storage {
        Some((view, w, h)) if *w == width && *h == height => Ok(Some(view)),
        Some((_, w, h)) => Err(BackendError::IncompleteFramebuffer(format!(
            "depth attachment is {}x{}, colour is {}x{}",
            w, h, width, height
        ))),
        None => Err(BackendError::IncompleteFramebuffer(
            "depth renderbuffer has no storage".into(),
        )),
    }
}

fn color_attachment(
    view: &wgpu::TextureView,
    clear: Option<(ClearFlags, ClearValues)>,
) -> wgpu::RenderPassColorAttachment<'_> {
    let load = match clear {
        Some((flags, values)) if flags.contains(ClearFlags::COLOR) => {
            let [r, g, b, a] = values.color;
            wgpu::LoadOp::Clear(wgpu::Color {
                r: r as f64,
                g: g as f64,
                b: b as f64,
                a: a as f64,
            })
        }
        _ => wgpu::LoadOp::Load,
    };
    wgpu::RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: wgpu::Operations {
            load,
            store: wgpu::StoreOp::Store,
        },
    }
}

fn depth_attachment(
    view: &wgpu::TextureView,
    clear: Option<(ClearFlags, ClearValues)>,
) -> wgpu::RenderPassDepthStencilAttachment<'_> {
    let load = match clear {
        Some((flags, values)) if flags.contains(ClearFlags::DEPTH) => {
            wgpu::LoadOp::Clear(values.depth)
        }
        _ => wgpu::LoadOp::Load,
    };
    wgpu::RenderPassDepthStencilAttachment {
        view,
        depth_ops: Some(wgpu::Operations {
            load,
            store: wgpu::StoreOp::Store,
        }),
        stencil_ops: None,
    }
}

/// Validate the WGSL with naga, then build the pipeline inside a validation error scope.
fn compile_program(
    device: &wgpu::Device,
    desc: &ProgramDescriptor,
    layout: &UniformLayout,
    source: &str,
) -> BackendResult<ProgramPipeline> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        BackendError::ShaderCreationFailed(format!(
            "{}: {}",
            desc.label,
            e.emit_to_string(source)
        ))
    })?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| BackendError::ShaderCreationFailed(format!("{}: {}", desc.label, e)))?;

    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(desc.label.as_str()),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let mut entries = Vec::with_capacity(1 + desc.samplers.len() * 2);
    if !layout.is_empty() {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
    }
    for (index, (_, kind)) in desc.samplers.iter().enumerate() {
        let binding = 1 + 2 * index as u32;
        entries.push(wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: WgpuBackend::view_dimension(*kind),
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: binding + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(desc.label.as_str()),
        entries: &entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(desc.label.as_str()),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    // One tightly packed buffer per attribute
    let vertex_attrs: Vec<[wgpu::VertexAttribute; 1]> = desc
        .attributes
        .iter()
        .enumerate()
        .map(|(location, (_, format))| {
            [wgpu::VertexAttribute {
                format: WgpuBackend::convert_vertex_format(*format),
                offset: 0,
                shader_location: location as u32,
            }]
        })
        .collect();
    let vertex_buffers: Vec<wgpu::VertexBufferLayout> = desc
        .attributes
        .iter()
        .zip(vertex_attrs.iter())
        .map(|((_, format), attrs)| wgpu::VertexBufferLayout {
            array_stride: format.size(),
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: attrs,
        })
        .collect();

    let depth_stencil = desc.depth_format.map(|format| wgpu::DepthStencilState {
        format: WgpuBackend::convert_texture_format(format),
        depth_write_enabled: true,
        depth_compare: wgpu::CompareFunction::LessEqual,
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    });

    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(desc.label.as_str()),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: "vs_main",
            buffers: &vertex_buffers,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: "fs_main",
            targets: &[Some(wgpu::ColorTargetState {
                format: WgpuBackend::convert_texture_format(desc.color_format),
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        // The capture camera sits inside the cube
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
    });

    if let Some(error) = pollster::block_on(device.pop_error_scope()) {
        return Err(BackendError::ShaderCreationFailed(format!(
            "{}: {}",
            desc.label, error
        )));
    }

    Ok(ProgramPipeline {
        pipeline,
        bind_group_layout,
    })
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: desc.label.as_deref(),
            contents: data,
            usage: Self::convert_buffer_usage(desc.usage),
        });

        let id = self.allocate_id();
        self.buffers.insert(id, buffer);

        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let max = self.capabilities.max_texture_size;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(BackendError::TextureCreationFailed(format!(
                "{}x{} is outside 1..={}",
                desc.width, desc.height, max
            )));
        }
        if desc.kind == TextureKind::Cube && desc.width != desc.height {
            return Err(BackendError::TextureCreationFailed(
                "cube faces must be square".into(),
            ));
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.kind.layer_count(),
            },
            mip_level_count: desc.mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(desc.format),
            usage: Self::convert_texture_usage(desc.usage),
            view_formats: &[],
        });
        let sample_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: desc.label.as_deref(),
            dimension: Some(Self::view_dimension(desc.kind)),
            ..Default::default()
        });

        let id = self.allocate_id();
        self.textures.insert(
            id,
            TextureEntry {
                texture,
                sample_view,
                desc: desc.clone(),
            },
        );

        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        let entry = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::TextureNotFound(texture))?;
        let desc = &entry.desc;
        if desc.kind != TextureKind::D2 {
            return Err(BackendError::TextureCreationFailed(
                "only 2D textures can be written from the CPU".into(),
            ));
        }
        if data.len() != desc.level_zero_bytes() {
            return Err(BackendError::TextureCreationFailed(format!(
                "expected {} bytes, got {}",
                desc.level_zero_bytes(),
                data.len()
            )));
        }

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(desc.width * desc.format.bytes_per_pixel()),
                rows_per_image: Some(desc.height),
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) -> BackendResult<()> {
        self.resolve_pending_clear();
        let entry = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::TextureNotFound(texture))?;
        if !entry.desc.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            return Err(BackendError::TextureCreationFailed(
                "mip generation needs a renderable texture".into(),
            ));
        }

        let encoder = command_encoder(&mut self.encoder, &self.device);
        self.mipmaps.generate(&self.device, encoder, &entry.texture);
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(entry) = self.textures.remove(&texture.0) {
            entry.texture.destroy();
        }
    }

    fn create_renderbuffer(&mut self, format: TextureFormat) -> BackendResult<RenderbufferHandle> {
        let id = self.allocate_id();
        self.renderbuffers.insert(
            id,
            RenderbufferEntry {
                format,
                storage: None,
            },
        );
        Ok(RenderbufferHandle(id))
    }

    fn renderbuffer_storage(
        &mut self,
        renderbuffer: RenderbufferHandle,
        width: u32,
        height: u32,
    ) -> BackendResult<()> {
        let max = self.capabilities.max_texture_size;
        let entry = self
            .renderbuffers
            .get_mut(&renderbuffer.0)
            .ok_or(BackendError::RenderbufferNotFound(renderbuffer))?;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(BackendError::TextureCreationFailed(format!(
                "renderbuffer {}x{} is outside 1..={}",
                width, height, max
            )));
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("renderbuffer"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(entry.format),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        entry.storage = Some((view, width, height));
        Ok(())
    }

    fn destroy_renderbuffer(&mut self, renderbuffer: RenderbufferHandle) {
        self.renderbuffers.remove(&renderbuffer.0);
    }

    fn create_framebuffer(&mut self) -> BackendResult<FramebufferHandle> {
        let id = self.allocate_id();
        self.framebuffers.insert(id, FramebufferEntry::default());
        Ok(FramebufferHandle(id))
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
        if self.current_framebuffer == Some(framebuffer) {
            self.resolve_pending_clear();
        }
        let fb = self
            .framebuffers
            .get_mut(&framebuffer.0)
            .ok_or(BackendError::FramebufferNotFound(framebuffer))?;
        match attachment {
            Attachment::Color => fb.color = Some(ColorAttachment::Renderbuffer(renderbuffer)),
            Attachment::Depth => fb.depth = Some(renderbuffer),
        }
        Ok(())
    }

    fn framebuffer_texture(
        &mut self,
        framebuffer: FramebufferHandle,
        texture: TextureHandle,
        target: AttachmentTarget,
        mip_level: u32,
    ) -> BackendResult<()> {
        if !self.framebuffers.contains_key(&framebuffer.0) {
            return Err(BackendError::FramebufferNotFound(framebuffer));
        }
        let entry = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::TextureNotFound(texture))?;
        let desc = &entry.desc;
        let layer = match (desc.kind, target) {
            (TextureKind::D2, AttachmentTarget::Texture2D) => 0,
            (TextureKind::Cube, AttachmentTarget::CubeFace(face)) => face.layer(),
            _ => {
                return Err(BackendError::IncompleteFramebuffer(format!(
                    "{:?} cannot be attached as {:?}",
                    desc.kind, target
                )))
            }
        };
        if mip_level >= desc.mip_levels {
            return Err(BackendError::IncompleteFramebuffer(format!(
                "mip {} of a {} level texture",
                mip_level, desc.mip_levels
            )));
        }
        if !desc.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            return Err(BackendError::IncompleteFramebuffer(
                "texture is not renderable".into(),
            ));
        }

        let view = entry.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("attachment"),
            format: Some(Self::convert_texture_format(desc.format)),
            dimension: Some(wgpu::TextureViewDimension::D2),
            aspect: wgpu::TextureAspect::All,
            base_mip_level: mip_level,
            mip_level_count: Some(1),
            base_array_layer: layer,
            array_layer_count: Some(1),
        });
        let attachment = ColorAttachment::Texture {
            view,
            width: (desc.width >> mip_level).max(1),
            height: (desc.height >> mip_level).max(1),
        };

        if self.current_framebuffer == Some(framebuffer) {
            self.resolve_pending_clear();
        }
        if let Some(fb) = self.framebuffers.get_mut(&framebuffer.0) {
            fb.color = Some(attachment);
        }
        Ok(())
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) -> BackendResult<()> {
        if let Some(fb) = framebuffer {
            if !self.framebuffers.contains_key(&fb.0) {
                return Err(BackendError::FramebufferNotFound(fb));
            }
        }
        if self.current_framebuffer != framebuffer {
            self.resolve_pending_clear();
        }
        self.current_framebuffer = framebuffer;
        Ok(())
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if self.current_framebuffer == Some(framebuffer) {
            self.resolve_pending_clear();
            self.current_framebuffer = None;
        }
        self.framebuffers.remove(&framebuffer.0);
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        let layout = UniformLayout::new(&desc.uniforms);
        let state = match &desc.source {
            ShaderSource::Wgsl(source) => {
                match compile_program(&self.device, desc, &layout, source) {
                    Ok(pipeline) => ProgramState::Ready(pipeline),
                    Err(e) => {
                        log::error!("{}", e);
                        ProgramState::Failed
                    }
                }
            }
            ShaderSource::File { path, preamble } => {
                let path = path.clone();
                let preamble = preamble.clone();
                let handle = LoadHandle::spawn("shader-loader", move || {
                    std::fs::read_to_string(&path).map(|body| format!("{}\n{}", preamble, body))
                })
                .map_err(|e| BackendError::ShaderCreationFailed(e.to_string()))?;
                ProgramState::Loading(handle)
            }
        };

        let id = self.allocate_id();
        self.programs.insert(
            id,
            ProgramEntry {
                uniform_data: vec![0; layout.size() as usize],
                textures: vec![None; desc.samplers.len()],
                attributes: vec![None; desc.attributes.len()],
                desc: desc.clone(),
                layout,
                state,
            },
        );

        Ok(ProgramHandle(id))
    }

    fn program_status(&mut self, program: ProgramHandle) -> ProgramStatus {
        self.poll_program(program)
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) -> BackendResult<()> {
        if let Some(p) = program {
            if !self.programs.contains_key(&p.0) {
                return Err(BackendError::ProgramNotFound(p));
            }
        }
        self.current_program = program;
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
        let slot = entry
            .layout
            .slot(name)
            .ok_or_else(|| BackendError::UniformNotFound {
                program,
                name: name.to_string(),
            })?;
        if slot.ty != value.ty() {
            return Err(BackendError::UniformTypeMismatch {
                name: name.to_string(),
                expected: slot.ty,
                actual: value.ty(),
            });
        }
        let bytes = value.to_bytes();
        let offset = slot.offset as usize;
        entry.uniform_data[offset..offset + bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }

    fn set_texture(
        &mut self,
        program: ProgramHandle,
        name: &str,
        texture: TextureHandle,
    ) -> BackendResult<()> {
        if !self.textures.contains_key(&texture.0) {
            return Err(BackendError::TextureNotFound(texture));
        }
        let entry = self
            .programs
            .get_mut(&program.0)
            .ok_or(BackendError::ProgramNotFound(program))?;
        let index = entry
            .desc
            .sampler_index(name)
            .ok_or_else(|| BackendError::SamplerNotFound {
                program,
                name: name.to_string(),
            })?;
        entry.textures[index] = Some(texture);
        Ok(())
    }

    fn set_attribute(
        &mut self,
        program: ProgramHandle,
        name: &str,
        buffer: BufferHandle,
    ) -> BackendResult<()> {
        if !self.buffers.contains_key(&buffer.0) {
            return Err(BackendError::BufferNotFound(buffer));
        }
        let entry = self
            .programs
            .get_mut(&program.0)
            .ok_or(BackendError::ProgramNotFound(program))?;
        let index = entry
            .desc
            .attribute_index(name)
            .ok_or_else(|| BackendError::AttributeNotFound {
                program,
                name: name.to_string(),
            })?;
        entry.attributes[index] = Some(buffer);
        Ok(())
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        if self.current_program == Some(program) {
            self.current_program = None;
        }
        self.programs.remove(&program.0);
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
    }

    fn clear(&mut self, flags: ClearFlags, values: ClearValues) {
        // A second clear before any draw still has to happen in order
        self.resolve_pending_clear();
        self.pending_clear = Some((flags, values));
    }

    fn draw_indexed(
        &mut self,
        index_buffer: BufferHandle,
        index_format: IndexFormat,
        index_count: u32,
    ) -> BackendResult<()> {
        let program = self.current_program.ok_or(BackendError::NoProgramBound)?;
        let fb_handle = self.current_framebuffer.ok_or(BackendError::NoFramebufferBound)?;

        let entry = self
            .programs
            .get(&program.0)
            .ok_or(BackendError::ProgramNotFound(program))?;
        let ProgramState::Ready(compiled) = &entry.state else {
            return Err(BackendError::ProgramNotReady(program));
        };
        let fb = self
            .framebuffers
            .get(&fb_handle.0)
            .ok_or(BackendError::FramebufferNotFound(fb_handle))?;
        let (color, width, height) = color_target(&self.renderbuffers, fb)?;
        let depth = depth_target(&self.renderbuffers, fb, width, height)?;
        if entry.desc.depth_format.is_some() != depth.is_some() {
            return Err(BackendError::IncompleteFramebuffer(format!(
                "`{}` and the framebuffer disagree on depth",
                entry.desc.label
            )));
        }
        let indices = self
            .buffers
            .get(&index_buffer.0)
            .ok_or(BackendError::BufferNotFound(index_buffer))?;

        let mut vertex_buffers = Vec::with_capacity(entry.attributes.len());
        for (index, attribute) in entry.attributes.iter().enumerate() {
            let buffer = attribute
                .and_then(|handle| self.buffers.get(&handle.0))
                .ok_or_else(|| BackendError::AttributeNotFound {
                    program,
                    name: entry.desc.attributes[index].0.clone(),
                })?;
            vertex_buffers.push(buffer);
        }

        let mut sampled = Vec::with_capacity(entry.textures.len());
        for (index, bound) in entry.textures.iter().enumerate() {
            let texture = bound
                .and_then(|handle| self.textures.get(&handle.0))
                .ok_or_else(|| BackendError::SamplerNotFound {
                    program,
                    name: entry.desc.samplers[index].0.clone(),
                })?;
            let sampler = match texture.desc.kind {
                TextureKind::D2 => &self.repeat_sampler,
                TextureKind::Cube => &self.clamp_sampler,
            };
            sampled.push((&texture.sample_view, sampler));
        }

        // A fresh buffer per draw keeps earlier draws' values intact in the same submission
        let uniform_buffer = (!entry.layout.is_empty()).then(|| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("uniforms"),
                contents: &entry.uniform_data,
                usage: wgpu::BufferUsages::UNIFORM,
            })
        });

        let mut bind_entries = Vec::with_capacity(1 + sampled.len() * 2);
        if let Some(buffer) = &uniform_buffer {
            bind_entries.push(wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            });
        }
        for (index, (view, sampler)) in sampled.iter().enumerate() {
            let binding = 1 + 2 * index as u32;
            bind_entries.push(wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
            bind_entries.push(wgpu::BindGroupEntry {
                binding: binding + 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(entry.desc.label.as_str()),
            layout: &compiled.bind_group_layout,
            entries: &bind_entries,
        });

        let viewport = self.viewport.unwrap_or(Viewport {
            x: 0,
            y: 0,
            width,
            height,
        });
        let x = viewport.x.min(width);
        let y = viewport.y.min(height);
        let vw = viewport.width.min(width - x);
        let vh = viewport.height.min(height - y);
        if vw == 0 || vh == 0 {
            log::warn!("Skipping draw with an empty viewport");
            return Ok(());
        }

        let clear = self.pending_clear.take();
        let encoder = command_encoder(&mut self.encoder, &self.device);
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("draw_pass"),
                color_attachments: &[Some(color_attachment(color, clear))],
                depth_stencil_attachment: depth.map(|view| depth_attachment(view, clear)),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&compiled.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            for (slot, buffer) in vertex_buffers.iter().enumerate() {
                pass.set_vertex_buffer(slot as u32, buffer.slice(..));
            }
            pass.set_index_buffer(indices.slice(..), Self::convert_index_format(index_format));
            pass.set_viewport(x as f32, y as f32, vw as f32, vh as f32, 0.0, 1.0);
            pass.draw_indexed(0..index_count, 0, 0..1);
        }
        Ok(())
    }

    fn flush(&mut self) {
        self.resolve_pending_clear();
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        self.device.poll(wgpu::Maintain::Wait);
    }
}
