//! IBL precomputation
//!
//! [`PrecomputePipeline`] renders an equirectangular radiance panorama into an environment
//! cubemap, then derives the diffuse irradiance map, the specular prefilter chain and the
//! BRDF lookup map from it, one stage per update.

pub mod capture;
pub mod config;
pub mod cube_faces;
pub mod error;
pub mod offscreen;
pub mod pipeline;
pub mod sampling;
pub mod state;

pub use capture::CaptureMatrices;
pub use config::PrecomputeConfig;
pub use cube_faces::CubeFaceRenderer;
pub use error::{PrecomputeError, PrecomputeResult};
pub use offscreen::{OffscreenPass, OffscreenTarget};
pub use pipeline::{PrecomputePipeline, Stall};
pub use state::PipelineState;
