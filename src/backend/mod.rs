//! Backend abstraction layer
//!
//! Provides the GL-style context trait and the types shared by the wgpu and dummy backends.

pub mod traits;
pub mod types;
pub mod wgpu_backend;

#[cfg(any(test, feature = "dummy"))]
pub mod dummy;

pub use traits::*;
pub use types::*;
