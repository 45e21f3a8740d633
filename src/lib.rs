//! PBR IBL - image-based lighting precomputation for a physically-based renderer
//!
//! Converts an equirectangular HDR radiance panorama into the inputs of split-sum IBL:
//! - an environment cubemap with a full mip chain
//! - a diffuse irradiance cubemap
//! - a GGX-prefiltered specular cubemap, one roughness level per mip
//! - a BRDF integration lookup map
//!
//! The work is driven one stage per frame by [`PrecomputePipeline::update`] through a GL-style
//! [`GraphicsBackend`]. Two backends ship with the crate:
//! - **wgpu**: headless wgpu device, see [`WgpuBackend`]
//! - **dummy**: records calls without a GPU, for tests (`dummy` feature)
//!
//! ```no_run
//! use pbr_ibl::{BackendConfig, PrecomputeConfig, PrecomputePipeline, WgpuBackend};
//!
//! let mut backend = WgpuBackend::new_headless(&BackendConfig::default())?;
//! let mut pipeline = PrecomputePipeline::new(&mut backend, PrecomputeConfig::default())?;
//! pipeline.set_radiance_path(&mut backend, "studio.hdr");
//! while !pipeline.is_ready() {
//!     pipeline.update(&mut backend);
//! }
//! let irradiance = pipeline.irradiance_map();
//! # let _ = irradiance;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backend;
pub mod precompute;
pub mod resources;
pub mod shaders;

pub use backend::wgpu_backend::{BackendConfig, WgpuBackend};
pub use backend::{BackendError, BackendResult, Capabilities, GraphicsBackend};
pub use precompute::{
    PipelineState, PrecomputeConfig, PrecomputeError, PrecomputePipeline, Stall,
};
pub use resources::TextureInfo;
