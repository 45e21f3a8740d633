//! Common utilities for precompute integration tests.
//!
//! Everything here runs against the recording backend, so tests see the exact call stream a
//! pipeline issues without a GPU.

use pbr_ibl::backend::dummy::{Call, DummyBackend};
use pbr_ibl::backend::{ProgramHandle, ProgramStatus, TextureHandle};
use pbr_ibl::precompute::{PipelineState, PrecomputeConfig, PrecomputePipeline};
use pbr_ibl::resources::{HdrImage, LoadError, LoadHandle, LoadSender, RadianceTexture};

pub const PANORAMA_NAME: &str = "studio";

/// Route `log` output through the test harness. Safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Small constant-radiance panorama
pub fn panorama() -> HdrImage {
    HdrImage::solid_color(64, 32, [4.0, 2.0, 1.0, 1.0], PANORAMA_NAME)
}

pub fn ready_radiance() -> RadianceTexture {
    RadianceTexture::from_image(panorama())
}

/// A radiance texture whose decode the test completes by hand
pub fn deferred_radiance() -> (LoadSender<Result<HdrImage, LoadError>>, RadianceTexture) {
    let (sender, handle) = LoadHandle::channel();
    (sender, RadianceTexture::from_handle(PANORAMA_NAME, handle))
}

pub fn pipeline(backend: &mut DummyBackend, config: PrecomputeConfig) -> PrecomputePipeline {
    match PrecomputePipeline::new(backend, config) {
        Ok(pipeline) => pipeline,
        Err(e) => panic!("pipeline construction failed: {}", e),
    }
}

/// Call `update` up to `frames` times and return the state after each call.
pub fn drive(
    pipeline: &mut PrecomputePipeline,
    backend: &mut DummyBackend,
    frames: usize,
) -> Vec<PipelineState> {
    (0..frames)
        .map(|_| {
            pipeline.update(backend);
            pipeline.state()
        })
        .collect()
}

/// Drive until finished, failing the test if that takes more than one frame per state.
pub fn run_to_completion(pipeline: &mut PrecomputePipeline, backend: &mut DummyBackend) {
    for _ in 0..PipelineState::ALL.len() {
        if pipeline.is_ready() {
            return;
        }
        pipeline.update(backend);
    }
    assert!(pipeline.is_ready(), "stuck in {}", pipeline.state());
}

pub fn mark_ready(backend: &mut DummyBackend, label: &str) -> ProgramHandle {
    let program = backend
        .program_by_label(label)
        .unwrap_or_else(|| panic!("no program labelled {}", label));
    backend.set_program_status(program, ProgramStatus::Ready);
    program
}

/// Handle of the uploaded panorama, found through its creation call
pub fn panorama_texture(backend: &DummyBackend) -> Option<TextureHandle> {
    backend.calls().iter().find_map(|call| match call {
        Call::CreateTexture { texture, desc } if desc.label.as_deref() == Some(PANORAMA_NAME) => {
            Some(*texture)
        }
        _ => None,
    })
}
