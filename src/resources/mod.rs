//! Resource management
//!
//! Handles background loading, the shared precompute geometry and textures.

pub mod loader;
mod mesh;
mod texture;

pub use loader::{LoadError, LoadHandle, LoadSender};
pub use mesh::*;
pub use texture::*;
